//! Discord delivery through an incoming webhook.

use async_trait::async_trait;
use serde::Serialize;

use notify_common::config::DiscordConfig;
use notify_common::types::{ChannelType, NotificationRequest};

use crate::adapter::{ChannelAdapter, DeliveryError, check_response, transport_error};

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    username: &'a str,
    content: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    embeds: Vec<Embed<'a>>,
}

#[derive(Debug, Serialize)]
struct Embed<'a> {
    title: &'a str,
    description: &'a str,
}

pub struct DiscordAdapter {
    client: reqwest::Client,
    config: DiscordConfig,
}

impl DiscordAdapter {
    pub fn new(client: reqwest::Client, config: DiscordConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl ChannelAdapter for DiscordAdapter {
    fn channel(&self) -> ChannelType {
        ChannelType::Discord
    }

    async fn deliver(&self, request: &NotificationRequest) -> Result<(), DeliveryError> {
        let Some(webhook_url) = self.config.webhook_url.as_deref() else {
            return Err(DeliveryError::not_configured(ChannelType::Discord));
        };

        // Details go into an embed titled with the message.
        let embeds = request
            .details
            .as_deref()
            .map(|details| Embed {
                title: &request.message,
                description: details,
            })
            .into_iter()
            .collect();

        let payload = WebhookPayload {
            username: &self.config.username,
            content: &request.message,
            embeds,
        };

        let response = self
            .client
            .post(webhook_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| transport_error(ChannelType::Discord, e))?;

        check_response(ChannelType::Discord, response).await?;
        tracing::debug!("Discord webhook accepted notification");
        Ok(())
    }
}
