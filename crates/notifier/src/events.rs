//! Observability events for jobs reaching a terminal state.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use notify_common::types::{ChannelType, Job};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Delivered,
    DeadLettered,
}

impl std::fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryOutcome::Delivered => write!(f, "delivered"),
            DeliveryOutcome::DeadLettered => write!(f, "dead_lettered"),
        }
    }
}

/// Emitted once per job that ends Delivered or DeadLettered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryEvent {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub channel: ChannelType,
    pub attempts: u32,
    pub outcome: DeliveryOutcome,
    /// Last failure, for dead-lettered jobs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

impl DeliveryEvent {
    pub fn from_job(job: &Job, outcome: DeliveryOutcome) -> Self {
        Self {
            id: job.id,
            channel: job.channel(),
            attempts: job.attempts,
            outcome,
            reason: match outcome {
                DeliveryOutcome::Delivered => None,
                DeliveryOutcome::DeadLettered => job.last_error.clone(),
            },
            at: job.updated_at,
        }
    }
}

/// Consumer of delivery events. Must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &DeliveryEvent);
}

/// Writes each event as a structured log line under the `notify::events` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: &DeliveryEvent) {
        match event.outcome {
            DeliveryOutcome::Delivered => tracing::info!(
                target: "notify::events",
                job_id = %event.id,
                channel = %event.channel,
                attempts = event.attempts,
                outcome = %event.outcome,
                "Notification delivered"
            ),
            DeliveryOutcome::DeadLettered => tracing::warn!(
                target: "notify::events",
                job_id = %event.id,
                channel = %event.channel,
                attempts = event.attempts,
                outcome = %event.outcome,
                reason = event.reason.as_deref().unwrap_or(""),
                "Notification dead-lettered"
            ),
        }
    }
}

/// Publishes events to in-process subscribers. Slow subscribers lag and lose events.
#[derive(Debug, Clone)]
pub struct BroadcastEventSink {
    sender: broadcast::Sender<DeliveryEvent>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeliveryEvent> {
        self.sender.subscribe()
    }
}

impl EventSink for BroadcastEventSink {
    fn emit(&self, event: &DeliveryEvent) {
        // No subscribers is not an error.
        let _ = self.sender.send(event.clone());
    }
}

/// Forwards every event to each inner sink.
#[derive(Clone, Default)]
pub struct FanoutEventSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutEventSink {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutEventSink {
    fn emit(&self, event: &DeliveryEvent) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}
