//! Health check endpoint.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/healthz", get(health_check))
}

/// GET /healthz — 200 while the queue is readable and the dispatcher is running.
async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let running = state.dispatcher.is_running();
    let dispatcher = if running { "running" } else { "stopped" };

    match state.queue.stats().await {
        Ok(stats) => {
            let status = if running {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            let body = json!({
                "status": if running { "ok" } else { "unavailable" },
                "service": "notify-api",
                "version": env!("CARGO_PKG_VERSION"),
                "queue": {
                    "backend": state.queue.backend(),
                    "pending": stats.pending,
                    "leased": stats.leased,
                    "delivered": stats.delivered,
                    "dead_lettered": stats.dead_lettered,
                    "cancelled": stats.cancelled,
                },
                "dispatcher": dispatcher,
            });
            (status, Json(body))
        }
        Err(e) => {
            tracing::warn!(error = %e, "Health check could not read queue");
            let body = json!({
                "status": "unavailable",
                "service": "notify-api",
                "version": env!("CARGO_PKG_VERSION"),
                "queue": { "backend": state.queue.backend(), "error": e.to_string() },
                "dispatcher": dispatcher,
            });
            (StatusCode::SERVICE_UNAVAILABLE, Json(body))
        }
    }
}
