//! Shared application state for the Axum API server.

use std::sync::Arc;

use notify_notifier::DispatcherHandle;
use notify_queue::JobQueue;

use crate::idempotency::IdempotencyGuard;

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<dyn JobQueue>,
    pub dispatcher: DispatcherHandle,
    /// Present only when Redis is configured.
    pub idempotency: Option<IdempotencyGuard>,
}

impl AppState {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        dispatcher: DispatcherHandle,
        idempotency: Option<IdempotencyGuard>,
    ) -> Self {
        Self {
            queue,
            dispatcher,
            idempotency,
        }
    }
}
