//! PostgreSQL-backed delivery queue.
//!
//! Each operation is a single conditional statement, so the row state itself is
//! the compare-and-swap: leasing claims a row with `FOR UPDATE SKIP LOCKED`, and
//! finishing a job only matches while `state = 'leased'` and the lease token is
//! the caller's.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use notify_common::types::{ChannelType, Job, JobState, NotificationRequest, QueueStats};

use crate::clock::{Clock, SystemClock, deadline_after};
use crate::error::QueueError;
use crate::queue::{JobQueue, Lease};

const JOB_COLUMNS: &str = "id, channel, message, details, state, attempts, next_eligible_at, \
     leased_until, lease_token, last_error, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    channel: ChannelType,
    message: String,
    details: Option<String>,
    state: JobState,
    attempts: i32,
    next_eligible_at: DateTime<Utc>,
    leased_until: Option<DateTime<Utc>>,
    lease_token: Option<Uuid>,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<JobRow> for Job {
    fn from(row: JobRow) -> Self {
        Job {
            id: row.id,
            request: NotificationRequest {
                channel: row.channel,
                message: row.message,
                details: row.details,
            },
            state: row.state,
            attempts: row.attempts.max(0) as u32,
            next_eligible_at: row.next_eligible_at,
            leased_until: row.leased_until,
            lease_token: row.lease_token,
            last_error: row.last_error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

pub struct PgQueue {
    pool: PgPool,
    clock: Arc<dyn Clock>,
    lease_timeout: Duration,
}

impl PgQueue {
    pub fn new(pool: PgPool, lease_timeout: Duration) -> Self {
        Self::with_clock(pool, lease_timeout, Arc::new(SystemClock))
    }

    pub fn with_clock(pool: PgPool, lease_timeout: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            pool,
            clock,
            lease_timeout,
        }
    }

    /// Explain why a fenced update matched no row.
    async fn lease_failure(&self, id: Uuid) -> QueueError {
        match self.get(id).await {
            Ok(Some(_)) => QueueError::LeaseLost(id),
            Ok(None) => QueueError::NotFound(id),
            Err(e) => e,
        }
    }

    /// Move a held job to a terminal state, recording the attempt.
    async fn finish(
        &self,
        lease: &Lease,
        state: JobState,
        reason: Option<&str>,
    ) -> Result<Job, QueueError> {
        let row: Option<JobRow> = sqlx::query_as(&format!(
            r#"
            UPDATE notification_jobs
            SET state = $3, attempts = attempts + 1, leased_until = NULL, lease_token = NULL,
                last_error = COALESCE($4, last_error), updated_at = $5
            WHERE id = $1 AND state = 'leased' AND lease_token = $2
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(lease.id())
        .bind(lease.token)
        .bind(state.to_string())
        .bind(reason)
        .bind(self.clock.now())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(row.into()),
            None => Err(self.lease_failure(lease.id()).await),
        }
    }
}

#[async_trait]
impl JobQueue for PgQueue {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn enqueue(&self, job: Job) -> Result<(), QueueError> {
        if job.state != JobState::Pending || job.attempts != 0 {
            return Err(QueueError::InvalidTransition {
                id: job.id,
                state: job.state,
                op: "enqueue",
            });
        }

        let result = sqlx::query(
            r#"
            INSERT INTO notification_jobs
                (id, channel, message, details, state, attempts, next_eligible_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, 'pending', 0, $5, $6, $6)
            "#,
        )
        .bind(job.id)
        .bind(job.channel().to_string())
        .bind(&job.request.message)
        .bind(&job.request.details)
        .bind(job.next_eligible_at)
        .bind(job.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                tracing::debug!(job_id = %job.id, channel = %job.channel(), "Job enqueued");
                Ok(())
            }
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(QueueError::Duplicate(job.id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn lease(&self, channel: ChannelType) -> Result<Option<Lease>, QueueError> {
        let now = self.clock.now();
        let token = Uuid::new_v4();

        let row: Option<JobRow> = sqlx::query_as(&format!(
            r#"
            UPDATE notification_jobs
            SET state = 'leased', lease_token = $2, leased_until = $3, updated_at = $4
            WHERE id = (
                SELECT id FROM notification_jobs
                WHERE channel = $1
                  AND ((state = 'pending' AND next_eligible_at <= $4)
                    OR (state = 'leased' AND leased_until < $4))
                ORDER BY seq
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(channel.to_string())
        .bind(token)
        .bind(deadline_after(now, self.lease_timeout))
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| Lease {
            job: row.into(),
            token,
        }))
    }

    async fn ack(&self, lease: &Lease) -> Result<Job, QueueError> {
        self.finish(lease, JobState::Delivered, None).await
    }

    async fn requeue(
        &self,
        lease: &Lease,
        delay: Duration,
        reason: &str,
    ) -> Result<Job, QueueError> {
        let now = self.clock.now();
        let row: Option<JobRow> = sqlx::query_as(&format!(
            r#"
            UPDATE notification_jobs
            SET state = 'pending', attempts = attempts + 1, next_eligible_at = $3,
                leased_until = NULL, lease_token = NULL, last_error = $4, updated_at = $5
            WHERE id = $1 AND state = 'leased' AND lease_token = $2
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(lease.id())
        .bind(lease.token)
        .bind(deadline_after(now, delay))
        .bind(reason)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(row.into()),
            None => Err(self.lease_failure(lease.id()).await),
        }
    }

    async fn dead_letter(&self, lease: &Lease, reason: &str) -> Result<Job, QueueError> {
        self.finish(lease, JobState::DeadLettered, Some(reason)).await
    }

    async fn cancel(&self, id: Uuid) -> Result<Job, QueueError> {
        let row: Option<JobRow> = sqlx::query_as(&format!(
            r#"
            UPDATE notification_jobs
            SET state = 'cancelled', updated_at = $2
            WHERE id = $1 AND state = 'pending'
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(self.clock.now())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return Ok(row.into());
        }

        match self.get(id).await? {
            Some(job) => Err(QueueError::InvalidTransition {
                id,
                state: job.state,
                op: "cancel",
            }),
            None => Err(QueueError::NotFound(id)),
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>, QueueError> {
        let row: Option<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM notification_jobs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Job::from))
    }

    async fn reclaim_expired(&self) -> Result<u64, QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE notification_jobs
            SET state = 'pending', leased_until = NULL, lease_token = NULL, updated_at = $1
            WHERE state = 'leased' AND leased_until < $1
            "#,
        )
        .bind(self.clock.now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn purge_terminal(&self, before: DateTime<Utc>) -> Result<u64, QueueError> {
        let result = sqlx::query(
            r#"
            DELETE FROM notification_jobs
            WHERE state IN ('delivered', 'dead_lettered', 'cancelled') AND updated_at < $1
            "#,
        )
        .bind(before)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let rows: Vec<(JobState, i64)> =
            sqlx::query_as("SELECT state, COUNT(*) FROM notification_jobs GROUP BY state")
                .fetch_all(&self.pool)
                .await?;

        let mut stats = QueueStats::default();
        for (state, count) in rows {
            let count = count.max(0) as u64;
            match state {
                JobState::Pending => stats.pending = count,
                JobState::Leased => stats.leased = count,
                JobState::Delivered => stats.delivered = count,
                JobState::DeadLettered => stats.dead_lettered = count,
                JobState::Cancelled => stats.cancelled = count,
            }
        }
        Ok(stats)
    }
}
