//! Notification ingress routes.

use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use notify_common::error::{AppError, RejectReason};
use notify_common::types::{ChannelType, Job, JobView, NotificationRequest};
use notify_queue::JobQueue;

use crate::idempotency::{Reservation, validate_key};
use crate::state::AppState;

pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";

/// How often and how long a repeated key waits for the first request's job.
const EXISTING_POLL_INTERVAL: Duration = Duration::from_millis(50);
const EXISTING_POLL_ATTEMPTS: u32 = 10;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/notifications", post(create_notification))
        .route(
            "/notifications/{id}",
            get(get_notification).delete(cancel_notification),
        )
}

/// Wire shape of `POST /notifications`, before validation.
#[derive(Debug, Deserialize)]
struct NotificationBody {
    #[serde(rename = "type")]
    channel: String,
    message: String,
    #[serde(default)]
    details: Option<serde_json::Value>,
}

/// Response for an accepted notification.
#[derive(Debug, Serialize, Deserialize)]
pub struct Accepted {
    pub id: Uuid,
}

/// Validate a raw request body into a [`NotificationRequest`].
pub fn parse_request(body: &[u8]) -> Result<NotificationRequest, AppError> {
    let raw: NotificationBody = serde_json::from_slice(body).map_err(|e| {
        AppError::validation(
            RejectReason::MalformedBody,
            format!("Malformed request body: {}", e),
        )
    })?;

    let channel: ChannelType = raw.channel.parse().map_err(|_| {
        AppError::validation(
            RejectReason::InvalidType,
            format!(
                "Invalid type '{}'. Valid types: {}",
                raw.channel,
                ChannelType::ALL.map(|c| c.as_str()).join(", ")
            ),
        )
    })?;

    if raw.message.trim().is_empty() {
        return Err(AppError::validation(
            RejectReason::EmptyMessage,
            "message must not be empty",
        ));
    }

    // Structured details are kept as their compact JSON text.
    let details = match raw.details {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(text)) => Some(text),
        Some(other) => Some(other.to_string()),
    };

    Ok(NotificationRequest {
        channel,
        message: raw.message,
        details,
    })
}

/// Wait until the job reserved under a repeated key is visible in the queue.
///
/// The first request reserves the key before it enqueues, so a concurrent
/// duplicate can see the id early. If that enqueue fails the key is released
/// and the job never appears; the duplicate then gets 409 and may retry.
pub async fn confirm_existing(queue: &dyn JobQueue, id: Uuid) -> Result<Uuid, AppError> {
    for attempt in 0..EXISTING_POLL_ATTEMPTS {
        if queue.get(id).await?.is_some() {
            return Ok(id);
        }
        if attempt + 1 < EXISTING_POLL_ATTEMPTS {
            tokio::time::sleep(EXISTING_POLL_INTERVAL).await;
        }
    }
    Err(AppError::Conflict(
        "A request with this Idempotency-Key is still in progress".to_string(),
    ))
}

/// POST /notifications — Validate and enqueue a notification for asynchronous delivery.
async fn create_notification(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Accepted>), AppError> {
    let request = parse_request(&body)?;

    let key = match headers.get(IDEMPOTENCY_HEADER) {
        Some(value) => {
            let raw = value.to_str().map_err(|_| {
                AppError::validation(
                    RejectReason::MalformedBody,
                    "Idempotency-Key must be visible ASCII",
                )
            })?;
            Some(validate_key(raw)?.to_string())
        }
        None => None,
    };

    let id = Uuid::new_v4();
    let guard = match (&key, &state.idempotency) {
        (Some(key), Some(guard)) => {
            if let Reservation::Existing(existing) = guard.reserve(key, id).await? {
                let existing = confirm_existing(state.queue.as_ref(), existing).await?;
                tracing::info!(job_id = %existing, "Duplicate notification, returning existing job");
                return Ok((StatusCode::ACCEPTED, Json(Accepted { id: existing })));
            }
            Some((key.as_str(), guard))
        }
        (Some(_), None) => {
            tracing::debug!("Idempotency-Key ignored, Redis is not configured");
            None
        }
        _ => None,
    };

    let channel = request.channel;
    let job = Job::new(id, request, Utc::now());

    if let Err(e) = state.queue.enqueue(job).await {
        if let Some((key, guard)) = guard {
            if let Err(release_err) = guard.release(key).await {
                tracing::warn!(error = %release_err, "Failed to release idempotency key");
            }
        }
        return Err(e.into());
    }

    tracing::info!(job_id = %id, channel = %channel, "Notification accepted");
    Ok((StatusCode::ACCEPTED, Json(Accepted { id })))
}

/// GET /notifications/{id} — Current state of a notification job.
async fn get_notification(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobView>, AppError> {
    match state.queue.get(id).await? {
        Some(job) => Ok(Json(JobView::from(&job))),
        None => Err(AppError::NotFound(format!("Notification {} not found", id))),
    }
}

/// DELETE /notifications/{id} — Cancel a job that has not been leased yet.
async fn cancel_notification(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobView>, AppError> {
    let job = state.queue.cancel(id).await?;
    tracing::info!(job_id = %id, "Notification cancelled");
    Ok(Json(JobView::from(&job)))
}
