//! Email delivery through the Resend HTTP API.

use async_trait::async_trait;
use serde::Serialize;

use notify_common::config::EmailConfig;
use notify_common::types::{ChannelType, NotificationRequest};

use crate::adapter::{ChannelAdapter, DeliveryError, check_response, transport_error};

#[derive(Debug, Serialize)]
struct SendEmail<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    text: String,
}

pub struct EmailAdapter {
    client: reqwest::Client,
    config: EmailConfig,
}

impl EmailAdapter {
    pub fn new(client: reqwest::Client, config: EmailConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl ChannelAdapter for EmailAdapter {
    fn channel(&self) -> ChannelType {
        ChannelType::Email
    }

    async fn deliver(&self, request: &NotificationRequest) -> Result<(), DeliveryError> {
        let (Some(api_key), Some(from), Some(to)) = (
            self.config.api_key.as_deref(),
            self.config.from.as_deref(),
            self.config.to.as_deref(),
        ) else {
            return Err(DeliveryError::not_configured(ChannelType::Email));
        };

        let body = SendEmail {
            from,
            to: [to],
            subject: &request.message,
            text: request.body_with_details(),
        };

        let url = format!("{}/emails", self.config.api_url.trim_end_matches('/'));
        let response = self
            .client
            .post(url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(ChannelType::Email, e))?;

        check_response(ChannelType::Email, response).await?;
        tracing::debug!(to, "Email accepted by Resend");
        Ok(())
    }
}
