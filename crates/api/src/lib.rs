//! Notify ingress API.
//!
//! Endpoints:
//! - POST   /notifications      — validate and enqueue a notification (202 + job id)
//! - GET    /notifications/{id} — job status
//! - DELETE /notifications/{id} — cancel a job that has not been leased yet
//! - GET    /healthz            — liveness of queue and dispatcher

pub mod idempotency;
pub mod routes;
pub mod state;
