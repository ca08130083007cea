//! SMS delivery through the Twilio Messages API.

use async_trait::async_trait;

use notify_common::config::SmsConfig;
use notify_common::types::{ChannelType, NotificationRequest};

use crate::adapter::{ChannelAdapter, DeliveryError, check_response, transport_error};

pub struct SmsAdapter {
    client: reqwest::Client,
    config: SmsConfig,
}

impl SmsAdapter {
    pub fn new(client: reqwest::Client, config: SmsConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl ChannelAdapter for SmsAdapter {
    fn channel(&self) -> ChannelType {
        ChannelType::Sms
    }

    async fn deliver(&self, request: &NotificationRequest) -> Result<(), DeliveryError> {
        let (Some(account_sid), Some(auth_token), Some(from), Some(to)) = (
            self.config.account_sid.as_deref(),
            self.config.auth_token.as_deref(),
            self.config.from_phone_number.as_deref(),
            self.config.to_phone_number.as_deref(),
        ) else {
            return Err(DeliveryError::not_configured(ChannelType::Sms));
        };

        let url = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.config.api_url.trim_end_matches('/'),
            account_sid
        );
        let body = request.body_with_details();

        // Twilio answers 400 for an invalid `To`, which classifies as fatal.
        let response = self
            .client
            .post(url)
            .basic_auth(account_sid, Some(auth_token))
            .form(&[("To", to), ("From", from), ("Body", body.as_str())])
            .send()
            .await
            .map_err(|e| transport_error(ChannelType::Sms, e))?;

        check_response(ChannelType::Sms, response).await?;
        tracing::debug!(to, "SMS accepted by Twilio");
        Ok(())
    }
}
