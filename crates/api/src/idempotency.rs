//! Idempotency keys: a Redis-backed mapping from a client key to the job it created.
//!
//! The first request carrying a key reserves it with `SET key <job-id> NX EX ttl`
//! before enqueueing. Later requests with the same key get the reserved job id
//! back and enqueue nothing. The key expires after the configured TTL.
//!
//! A reservation exists briefly before its job is enqueued. A duplicate that
//! arrives in that window waits for the job to show up in the queue, and gets
//! 409 if the original enqueue fails and releases the key.

use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use uuid::Uuid;

use notify_common::error::{AppError, RejectReason};

/// Longest accepted `Idempotency-Key` header value.
pub const MAX_KEY_LEN: usize = 255;

/// Result of reserving an idempotency key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    /// The key is new and now maps to the caller's job id.
    Reserved,
    /// The key was already used for this job.
    Existing(Uuid),
}

#[derive(Clone)]
pub struct IdempotencyGuard {
    redis: ConnectionManager,
    ttl_secs: u64,
}

impl IdempotencyGuard {
    pub fn new(redis: ConnectionManager, ttl_secs: u64) -> Self {
        Self { redis, ttl_secs }
    }

    /// Reserve `key` for `job_id`, or return the job it already belongs to.
    pub async fn reserve(&self, key: &str, job_id: Uuid) -> Result<Reservation, AppError> {
        let mut redis = self.redis.clone();
        let redis_key = Self::redis_key(key);

        // SET key job_id NX EX ttl
        // Returns Some("OK") if the key was free, None if it is taken
        let result: Option<String> = redis::cmd("SET")
            .arg(&redis_key)
            .arg(job_id.to_string())
            .arg("NX")
            .arg("EX")
            .arg(self.ttl_secs)
            .query_async(&mut redis)
            .await?;

        if result.is_some() {
            return Ok(Reservation::Reserved);
        }

        let existing: Option<String> = redis.get(&redis_key).await?;
        match existing.and_then(|id| id.parse().ok()) {
            Some(id) => Ok(Reservation::Existing(id)),
            None => Err(AppError::Conflict(format!(
                "Idempotency key '{}' expired while being checked, retry the request",
                key
            ))),
        }
    }

    /// Drop a reservation whose job was never enqueued.
    pub async fn release(&self, key: &str) -> Result<(), AppError> {
        let mut redis = self.redis.clone();
        redis.del::<_, ()>(Self::redis_key(key)).await?;
        Ok(())
    }

    fn redis_key(key: &str) -> String {
        format!("notification:idempotency:{}", key)
    }
}

/// Validate a raw `Idempotency-Key` header value.
pub fn validate_key(raw: &str) -> Result<&str, AppError> {
    let key = raw.trim();
    if key.is_empty() || key.len() > MAX_KEY_LEN || !key.bytes().all(|b| b.is_ascii_graphic()) {
        return Err(AppError::validation(
            RejectReason::MalformedBody,
            format!(
                "Idempotency-Key must be 1-{} visible ASCII characters",
                MAX_KEY_LEN
            ),
        ));
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key() {
        assert_eq!(validate_key(" order-42 ").unwrap(), "order-42");
        assert!(validate_key("").is_err());
        assert!(validate_key("has space").is_err());
        assert!(validate_key(&"k".repeat(MAX_KEY_LEN + 1)).is_err());
    }

    #[test]
    fn test_redis_key_is_namespaced() {
        assert_eq!(
            IdempotencyGuard::redis_key("abc"),
            "notification:idempotency:abc"
        );
    }
}
