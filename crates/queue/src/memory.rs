//! In-memory delivery queue.
//!
//! All mutations go through one mutex, which makes the job table a single-writer
//! serialization point. State is lost on restart; use [`crate::PgQueue`] where
//! jobs must survive the process.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use notify_common::types::{ChannelType, Job, JobState, QueueStats};

use crate::clock::{Clock, SystemClock, deadline_after};
use crate::error::QueueError;
use crate::queue::{JobQueue, Lease};

#[derive(Default)]
struct Inner {
    jobs: HashMap<Uuid, Job>,
    /// Non-terminal job ids per channel, in enqueue order.
    partitions: HashMap<ChannelType, VecDeque<Uuid>>,
}

impl Inner {
    /// The job held by `lease`, provided the lease is still current.
    fn held_mut(&mut self, lease: &Lease) -> Result<&mut Job, QueueError> {
        let id = lease.id();
        let job = self.jobs.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        if job.state != JobState::Leased || job.lease_token != Some(lease.token) {
            return Err(QueueError::LeaseLost(id));
        }
        Ok(job)
    }

    fn unlink(&mut self, channel: ChannelType, id: Uuid) {
        if let Some(partition) = self.partitions.get_mut(&channel) {
            partition.retain(|queued| *queued != id);
        }
    }
}

pub struct MemoryQueue {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
    lease_timeout: Duration,
}

impl MemoryQueue {
    pub fn new(lease_timeout: Duration) -> Self {
        Self::with_clock(lease_timeout, Arc::new(SystemClock))
    }

    pub fn with_clock(lease_timeout: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            clock,
            lease_timeout,
        }
    }

    /// Finish a held job in `state`, recording the attempt.
    fn finish(
        &self,
        lease: &Lease,
        state: JobState,
        reason: Option<&str>,
    ) -> Result<Job, QueueError> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let job = inner.held_mut(lease)?;
        job.state = state;
        job.attempts += 1;
        job.leased_until = None;
        job.lease_token = None;
        job.updated_at = now;
        if let Some(reason) = reason {
            job.last_error = Some(reason.to_string());
        }
        let finished = job.clone();
        inner.unlink(finished.channel(), finished.id);
        Ok(finished)
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn enqueue(&self, job: Job) -> Result<(), QueueError> {
        if job.state != JobState::Pending || job.attempts != 0 {
            return Err(QueueError::InvalidTransition {
                id: job.id,
                state: job.state,
                op: "enqueue",
            });
        }

        let mut inner = self.inner.lock();
        if inner.jobs.contains_key(&job.id) {
            return Err(QueueError::Duplicate(job.id));
        }

        inner
            .partitions
            .entry(job.channel())
            .or_default()
            .push_back(job.id);
        tracing::debug!(job_id = %job.id, channel = %job.channel(), "Job enqueued");
        inner.jobs.insert(job.id, job);
        Ok(())
    }

    async fn lease(&self, channel: ChannelType) -> Result<Option<Lease>, QueueError> {
        let now = self.clock.now();
        let mut guard = self.inner.lock();
        let Inner { jobs, partitions } = &mut *guard;

        let Some(partition) = partitions.get(&channel) else {
            return Ok(None);
        };

        let Some(id) = partition
            .iter()
            .copied()
            .find(|id| jobs.get(id).is_some_and(|job| job.is_leasable(now)))
        else {
            return Ok(None);
        };

        let Some(job) = jobs.get_mut(&id) else {
            return Ok(None);
        };

        if job.state == JobState::Leased {
            tracing::warn!(job_id = %id, channel = %channel, "Reclaiming expired lease");
        }

        let token = Uuid::new_v4();
        job.state = JobState::Leased;
        job.lease_token = Some(token);
        job.leased_until = Some(deadline_after(now, self.lease_timeout));
        job.updated_at = now;

        Ok(Some(Lease {
            job: job.clone(),
            token,
        }))
    }

    async fn ack(&self, lease: &Lease) -> Result<Job, QueueError> {
        self.finish(lease, JobState::Delivered, None)
    }

    async fn requeue(
        &self,
        lease: &Lease,
        delay: Duration,
        reason: &str,
    ) -> Result<Job, QueueError> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let job = inner.held_mut(lease)?;
        job.state = JobState::Pending;
        job.attempts += 1;
        job.next_eligible_at = deadline_after(now, delay);
        job.leased_until = None;
        job.lease_token = None;
        job.last_error = Some(reason.to_string());
        job.updated_at = now;
        Ok(job.clone())
    }

    async fn dead_letter(&self, lease: &Lease, reason: &str) -> Result<Job, QueueError> {
        self.finish(lease, JobState::DeadLettered, Some(reason))
    }

    async fn cancel(&self, id: Uuid) -> Result<Job, QueueError> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let job = inner.jobs.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        if job.state != JobState::Pending {
            return Err(QueueError::InvalidTransition {
                id,
                state: job.state,
                op: "cancel",
            });
        }
        job.state = JobState::Cancelled;
        job.updated_at = now;
        let cancelled = job.clone();
        inner.unlink(cancelled.channel(), id);
        Ok(cancelled)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>, QueueError> {
        Ok(self.inner.lock().jobs.get(&id).cloned())
    }

    async fn reclaim_expired(&self) -> Result<u64, QueueError> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let mut reclaimed = 0;
        for job in inner.jobs.values_mut() {
            if job.state == JobState::Leased && job.is_leasable(now) {
                job.state = JobState::Pending;
                job.leased_until = None;
                job.lease_token = None;
                job.updated_at = now;
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }

    async fn purge_terminal(&self, before: DateTime<Utc>) -> Result<u64, QueueError> {
        let mut inner = self.inner.lock();
        let total = inner.jobs.len();
        inner
            .jobs
            .retain(|_, job| !(job.state.is_terminal() && job.updated_at < before));
        Ok((total - inner.jobs.len()) as u64)
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let inner = self.inner.lock();
        let mut stats = QueueStats::default();
        for job in inner.jobs.values() {
            stats.record(job.state);
        }
        Ok(stats)
    }
}
