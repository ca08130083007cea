//! Dispatcher: drives leased jobs through delivery, retry and dead-lettering.
//!
//! One worker loop runs per registered channel. Each loop holds a semaphore of
//! `parallelism` permits: it takes a permit, leases the oldest eligible job of
//! its channel and processes it on a tracked task. When nothing is eligible it
//! sleeps for `poll_interval`. A separate maintenance loop returns expired
//! leases to pending and purges old terminal jobs.
//!
//! Shutdown stops leasing; deliveries already in flight run to completion.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use notify_common::config::AppConfig;
use notify_common::types::{ChannelType, Job, NotificationRequest};
use notify_queue::{Clock, JobQueue, Lease, QueueError, SystemClock};

use crate::adapter::{AdapterRegistry, DeliveryError};
use crate::backoff::BackoffPolicy;
use crate::events::{DeliveryEvent, DeliveryOutcome, EventSink};

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Delivery attempts before a job is dead-lettered.
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
    /// Concurrent deliveries per channel.
    pub parallelism: usize,
    /// Upper bound for one adapter call; exceeding it counts as a retryable failure.
    pub delivery_timeout: Duration,
    pub poll_interval: Duration,
    pub maintenance_interval: Duration,
    /// How long terminal jobs are kept.
    pub retention: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for DispatchConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            backoff: BackoffPolicy::new(
                Duration::from_millis(config.backoff_base_ms),
                Duration::from_millis(config.backoff_cap_ms),
            ),
            parallelism: config.parallelism,
            delivery_timeout: config.delivery_timeout(),
            poll_interval: config.poll_interval(),
            maintenance_interval: config.maintenance_interval(),
            retention: config.job_retention(),
        }
    }
}

/// How processing one lease ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Delivered { attempts: u32 },
    Retrying { attempts: u32, delay: Duration },
    DeadLettered { attempts: u32 },
    /// The lease expired before the result was recorded; the new holder owns the job.
    LeaseLost,
    /// The result could not be recorded. The lease will expire and the job is retried.
    Unsettled,
}

pub struct Dispatcher {
    queue: Arc<dyn JobQueue>,
    adapters: AdapterRegistry,
    events: Arc<dyn EventSink>,
    config: DispatchConfig,
    clock: Arc<dyn Clock>,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        adapters: AdapterRegistry,
        events: Arc<dyn EventSink>,
        config: DispatchConfig,
    ) -> Self {
        Self::with_clock(queue, adapters, events, config, Arc::new(SystemClock))
    }

    /// Like [`Dispatcher::new`], reading retention cutoffs from `clock`.
    /// Pass the same clock the queue stamps jobs with.
    pub fn with_clock(
        queue: Arc<dyn JobQueue>,
        adapters: AdapterRegistry,
        events: Arc<dyn EventSink>,
        config: DispatchConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            queue,
            adapters,
            events,
            config,
            clock,
        }
    }

    /// Lease and process a single job of `channel`, if one is eligible.
    pub async fn process_next(&self, channel: ChannelType) -> Result<Option<Outcome>, QueueError> {
        match self.queue.lease(channel).await? {
            Some(lease) => Ok(Some(self.process(lease).await)),
            None => Ok(None),
        }
    }

    /// Run one delivery attempt for a leased job and settle the lease.
    pub async fn process(&self, lease: Lease) -> Outcome {
        let job = &lease.job;
        let settled = match self.attempt(&job.request).await {
            Ok(()) => self.queue.ack(&lease).await.map(|job| {
                self.emit(&job, DeliveryOutcome::Delivered);
                Outcome::Delivered {
                    attempts: job.attempts,
                }
            }),
            Err(DeliveryError::Retryable(reason))
                if job.attempts + 1 < self.config.max_attempts =>
            {
                let delay = self.config.backoff.delay(job.attempts);
                self.queue.requeue(&lease, delay, &reason).await.map(|job| {
                    tracing::warn!(
                        job_id = %job.id,
                        channel = %job.channel(),
                        attempts = job.attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %reason,
                        "Delivery failed, will retry"
                    );
                    Outcome::Retrying {
                        attempts: job.attempts,
                        delay,
                    }
                })
            }
            Err(err) => {
                let reason = err.to_string();
                self.queue.dead_letter(&lease, &reason).await.map(|job| {
                    self.emit(&job, DeliveryOutcome::DeadLettered);
                    Outcome::DeadLettered {
                        attempts: job.attempts,
                    }
                })
            }
        };

        match settled {
            Ok(outcome) => outcome,
            Err(QueueError::LeaseLost(id)) => {
                tracing::warn!(job_id = %id, "Lease expired before the attempt was recorded");
                Outcome::LeaseLost
            }
            Err(e) => {
                tracing::error!(job_id = %lease.id(), error = %e, "Failed to record delivery attempt");
                Outcome::Unsettled
            }
        }
    }

    async fn attempt(&self, request: &NotificationRequest) -> Result<(), DeliveryError> {
        let Some(adapter) = self.adapters.get(request.channel) else {
            return Err(DeliveryError::Fatal(format!(
                "no adapter registered for {}",
                request.channel
            )));
        };

        match tokio::time::timeout(self.config.delivery_timeout, adapter.deliver(request)).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Retryable(format!(
                "{} delivery timed out after {}ms",
                request.channel,
                self.config.delivery_timeout.as_millis()
            ))),
        }
    }

    fn emit(&self, job: &Job, outcome: DeliveryOutcome) {
        self.events.emit(&DeliveryEvent::from_job(job, outcome));
    }

    /// Return expired leases to pending and purge terminal jobs past retention.
    pub async fn maintain(&self) {
        match self.queue.reclaim_expired().await {
            Ok(0) => {}
            Ok(reclaimed) => tracing::warn!(reclaimed, "Returned expired leases to pending"),
            Err(e) => tracing::error!(error = %e, "Failed to reclaim expired leases"),
        }

        let cutoff = chrono::Duration::from_std(self.config.retention)
            .ok()
            .and_then(|retention| self.clock.now().checked_sub_signed(retention));
        if let Some(cutoff) = cutoff {
            match self.queue.purge_terminal(cutoff).await {
                Ok(0) => {}
                Ok(purged) => tracing::info!(purged, "Purged finished jobs"),
                Err(e) => tracing::error!(error = %e, "Failed to purge finished jobs"),
            }
        }
    }

    /// Start one worker per registered channel plus the maintenance loop.
    pub fn spawn(self: Arc<Self>) -> DispatcherHandle {
        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();

        for channel in self.adapters.channels() {
            tracker.spawn(
                self.clone()
                    .run_partition(channel, shutdown.clone(), tracker.clone()),
            );
        }
        tracker.spawn(self.clone().run_maintenance(shutdown.clone()));

        tracing::info!(
            channels = ?self.adapters.channels(),
            parallelism = self.config.parallelism,
            max_attempts = self.config.max_attempts,
            "Dispatcher started"
        );

        DispatcherHandle { shutdown, tracker }
    }

    async fn run_partition(
        self: Arc<Self>,
        channel: ChannelType,
        shutdown: CancellationToken,
        tracker: TaskTracker,
    ) {
        let permits = Arc::new(Semaphore::new(self.config.parallelism));

        loop {
            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            match self.queue.lease(channel).await {
                Ok(Some(lease)) => {
                    let this = self.clone();
                    tracker.spawn(async move {
                        this.process(lease).await;
                        drop(permit);
                    });
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(channel = %channel, error = %e, "Lease failed, backing off");
                }
            }

            drop(permit);
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        tracing::info!(channel = %channel, "Dispatcher worker stopped");
    }

    async fn run_maintenance(self: Arc<Self>, shutdown: CancellationToken) {
        let period = self.config.maintenance_interval.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => self.maintain().await,
            }
        }
    }
}

/// Controls a running dispatcher.
#[derive(Clone)]
pub struct DispatcherHandle {
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl DispatcherHandle {
    pub fn is_running(&self) -> bool {
        !self.shutdown.is_cancelled()
    }

    /// Stop leasing and wait for in-flight deliveries to finish.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        tracing::info!("Dispatcher stopped");
    }
}
