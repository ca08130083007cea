use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use notify_common::types::{ChannelType, Job, QueueStats};

use crate::error::QueueError;

/// Exclusive, time-limited ownership of one job.
#[derive(Debug, Clone)]
pub struct Lease {
    /// Snapshot of the job taken when the lease was granted.
    pub job: Job,
    pub token: Uuid,
}

impl Lease {
    pub fn id(&self) -> Uuid {
        self.job.id
    }
}

/// Durable, per-channel FIFO holding area for notification jobs.
///
/// Every mutation is atomic with respect to every other: a job is handed to
/// at most one leaseholder, and only the current leaseholder can finish it.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Short backend name for health output.
    fn backend(&self) -> &'static str;

    /// Append a fresh pending job to the tail of its channel partition.
    async fn enqueue(&self, job: Job) -> Result<(), QueueError>;

    /// Lease the oldest eligible job of `channel`, if any.
    ///
    /// Eligible means pending with `next_eligible_at <= now`, or leased with an
    /// expired lease.
    async fn lease(&self, channel: ChannelType) -> Result<Option<Lease>, QueueError>;

    /// Leased → Delivered. Records the successful attempt.
    async fn ack(&self, lease: &Lease) -> Result<Job, QueueError>;

    /// Leased → Pending, eligible again after `delay`. Records the failed attempt.
    async fn requeue(&self, lease: &Lease, delay: Duration, reason: &str)
    -> Result<Job, QueueError>;

    /// Leased → DeadLettered. Records the failed attempt.
    async fn dead_letter(&self, lease: &Lease, reason: &str) -> Result<Job, QueueError>;

    /// Pending → Cancelled. Leased and terminal jobs cannot be cancelled.
    async fn cancel(&self, id: Uuid) -> Result<Job, QueueError>;

    async fn get(&self, id: Uuid) -> Result<Option<Job>, QueueError>;

    /// Return every expired lease to pending. Returns the number reclaimed.
    async fn reclaim_expired(&self) -> Result<u64, QueueError>;

    /// Delete terminal jobs last updated before `before`. Returns the number deleted.
    async fn purge_terminal(&self, before: DateTime<Utc>) -> Result<u64, QueueError>;

    async fn stats(&self) -> Result<QueueStats, QueueError>;
}
