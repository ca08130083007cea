//! Channel adapter contract and failure classification.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

use notify_common::config::AppConfig;
use notify_common::types::{ChannelType, NotificationRequest};

use crate::discord::DiscordAdapter;
use crate::email::EmailAdapter;
use crate::sms::SmsAdapter;

/// Why a single delivery attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// Transient; the job is retried with backoff.
    #[error("{0}")]
    Retryable(String),

    /// Permanent; the job is dead-lettered without retry.
    #[error("{0}")]
    Fatal(String),
}

impl DeliveryError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, DeliveryError::Retryable(_))
    }

    pub fn not_configured(channel: ChannelType) -> Self {
        DeliveryError::Fatal(format!("{} channel is not configured", channel))
    }
}

/// Performs one delivery attempt against one external channel.
///
/// Implementations classify their own failures: anything the downstream may
/// accept on a later attempt is `Retryable`, anything it will never accept is `Fatal`.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    fn channel(&self) -> ChannelType;

    async fn deliver(&self, request: &NotificationRequest) -> Result<(), DeliveryError>;
}

/// Status codes a downstream may answer differently on retry.
pub fn is_retryable_status(status: StatusCode) -> bool {
    // 408 Request Timeout, 425 Too Early, 429 Too Many Requests
    status.is_server_error() || matches!(status.as_u16(), 408 | 425 | 429)
}

/// Turn a downstream HTTP response into an attempt result.
pub(crate) async fn check_response(
    channel: ChannelType,
    response: reqwest::Response,
) -> Result<(), DeliveryError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    let body = response.text().await.unwrap_or_default();
    let snippet: String = body.chars().take(200).collect();
    let reason = format!("{} responded {}: {}", channel, status, snippet.trim());

    if is_retryable_status(status) {
        Err(DeliveryError::Retryable(reason))
    } else {
        Err(DeliveryError::Fatal(reason))
    }
}

/// Transport failures are retryable unless the request itself could not be built.
pub(crate) fn transport_error(channel: ChannelType, err: reqwest::Error) -> DeliveryError {
    let reason = format!("{} request failed: {}", channel, err);
    if err.is_builder() {
        DeliveryError::Fatal(reason)
    } else {
        DeliveryError::Retryable(reason)
    }
}

/// Adapters keyed by the channel they serve.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<ChannelType, Arc<dyn ChannelAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the three built-in channels from configuration.
    pub fn from_config(config: &AppConfig, client: reqwest::Client) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(DiscordAdapter::new(
            client.clone(),
            config.discord.clone(),
        )));
        registry.register(Arc::new(EmailAdapter::new(client.clone(), config.email.clone())));
        registry.register(Arc::new(SmsAdapter::new(client, config.sms.clone())));
        registry
    }

    /// Add or replace the adapter for its channel.
    pub fn register(&mut self, adapter: Arc<dyn ChannelAdapter>) {
        self.adapters.insert(adapter.channel(), adapter);
    }

    pub fn get(&self, channel: ChannelType) -> Option<Arc<dyn ChannelAdapter>> {
        self.adapters.get(&channel).cloned()
    }

    /// Registered channels in declaration order.
    pub fn channels(&self) -> Vec<ChannelType> {
        ChannelType::ALL
            .into_iter()
            .filter(|channel| self.adapters.contains_key(channel))
            .collect()
    }
}
