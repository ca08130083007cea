//! Channel adapters against a local fake of each downstream API.

use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use parking_lot::Mutex;

use notify_common::config::{DiscordConfig, EmailConfig, SmsConfig};
use notify_common::types::{ChannelType, NotificationRequest};
use notify_notifier::discord::DiscordAdapter;
use notify_notifier::email::EmailAdapter;
use notify_notifier::sms::SmsAdapter;
use notify_notifier::{ChannelAdapter, DeliveryError};

// ============================================================
// Fake downstream
// ============================================================

#[derive(Debug, Clone)]
struct Captured {
    path: String,
    headers: HeaderMap,
    body: Bytes,
}

#[derive(Clone)]
struct Fake {
    status: StatusCode,
    seen: Arc<Mutex<Vec<Captured>>>,
}

impl Fake {
    fn single(&self) -> Captured {
        let seen = self.seen.lock();
        assert_eq!(seen.len(), 1, "expected exactly one downstream request");
        seen[0].clone()
    }
}

async fn record(State(fake): State<Fake>, uri: Uri, headers: HeaderMap, body: Bytes) -> StatusCode {
    fake.seen.lock().push(Captured {
        path: uri.path().to_string(),
        headers,
        body,
    });
    fake.status
}

/// Serve a fake channel API answering every request with `status`.
async fn fake_channel(status: StatusCode) -> (String, Fake) {
    let fake = Fake {
        status,
        seen: Arc::new(Mutex::new(Vec::new())),
    };
    let app = Router::new().fallback(record).with_state(fake.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), fake)
}

/// A base URL nothing listens on.
async fn dead_endpoint() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

fn request(channel: ChannelType, details: Option<&str>) -> NotificationRequest {
    NotificationRequest {
        channel,
        message: "OTP 1234".to_string(),
        details: details.map(str::to_string),
    }
}

fn discord(webhook_url: Option<String>) -> DiscordAdapter {
    DiscordAdapter::new(
        reqwest::Client::new(),
        DiscordConfig {
            webhook_url,
            username: "notify".to_string(),
        },
    )
}

fn email(api_url: String) -> EmailAdapter {
    EmailAdapter::new(
        reqwest::Client::new(),
        EmailConfig {
            api_key: Some("re_test_key".to_string()),
            api_url,
            from: Some("alerts@example.com".to_string()),
            to: Some("ops@example.com".to_string()),
        },
    )
}

fn sms(api_url: String) -> SmsAdapter {
    SmsAdapter::new(
        reqwest::Client::new(),
        SmsConfig {
            account_sid: Some("AC123".to_string()),
            auth_token: Some("secret".to_string()),
            from_phone_number: Some("+15550000000".to_string()),
            to_phone_number: Some("+15550001111".to_string()),
            api_url,
        },
    )
}

// ============================================================
// Discord
// ============================================================

#[tokio::test]
async fn test_discord_posts_webhook_payload() {
    let (base, fake) = fake_channel(StatusCode::NO_CONTENT).await;
    let adapter = discord(Some(format!("{}/api/webhooks/1/token", base)));

    adapter
        .deliver(&request(ChannelType::Discord, Some("{\"order\":42}")))
        .await
        .unwrap();

    let captured = fake.single();
    assert_eq!(captured.path, "/api/webhooks/1/token");
    let json: serde_json::Value = serde_json::from_slice(&captured.body).unwrap();
    assert_eq!(json["username"], "notify");
    assert_eq!(json["content"], "OTP 1234");
    assert_eq!(json["embeds"][0]["title"], "OTP 1234");
    assert_eq!(json["embeds"][0]["description"], "{\"order\":42}");
}

#[tokio::test]
async fn test_discord_omits_embeds_without_details() {
    let (base, fake) = fake_channel(StatusCode::NO_CONTENT).await;
    let adapter = discord(Some(format!("{}/hook", base)));

    adapter
        .deliver(&request(ChannelType::Discord, None))
        .await
        .unwrap();

    let json: serde_json::Value = serde_json::from_slice(&fake.single().body).unwrap();
    assert!(json.get("embeds").is_none());
}

#[tokio::test]
async fn test_discord_server_error_is_retryable() {
    let (base, _fake) = fake_channel(StatusCode::BAD_GATEWAY).await;
    let err = discord(Some(format!("{}/hook", base)))
        .deliver(&request(ChannelType::Discord, None))
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert!(err.to_string().contains("502"));
}

#[tokio::test]
async fn test_discord_rate_limit_is_retryable() {
    let (base, _fake) = fake_channel(StatusCode::TOO_MANY_REQUESTS).await;
    let err = discord(Some(format!("{}/hook", base)))
        .deliver(&request(ChannelType::Discord, None))
        .await
        .unwrap_err();
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_discord_unknown_webhook_is_fatal() {
    let (base, _fake) = fake_channel(StatusCode::NOT_FOUND).await;
    let err = discord(Some(format!("{}/hook", base)))
        .deliver(&request(ChannelType::Discord, None))
        .await
        .unwrap_err();
    assert!(matches!(err, DeliveryError::Fatal(_)));
}

#[tokio::test]
async fn test_discord_without_webhook_is_fatal() {
    let err = discord(None)
        .deliver(&request(ChannelType::Discord, None))
        .await
        .unwrap_err();
    assert_eq!(err, DeliveryError::not_configured(ChannelType::Discord));
}

#[tokio::test]
async fn test_unreachable_channel_is_retryable() {
    let base = dead_endpoint().await;
    let err = discord(Some(format!("{}/hook", base)))
        .deliver(&request(ChannelType::Discord, None))
        .await
        .unwrap_err();
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_malformed_webhook_url_is_fatal() {
    let err = discord(Some("not a url".to_string()))
        .deliver(&request(ChannelType::Discord, None))
        .await
        .unwrap_err();
    assert!(matches!(err, DeliveryError::Fatal(_)));
}

// ============================================================
// Email
// ============================================================

#[tokio::test]
async fn test_email_sends_through_resend() {
    let (base, fake) = fake_channel(StatusCode::OK).await;

    email(format!("{}/", base))
        .deliver(&request(ChannelType::Email, Some("disk at 91%")))
        .await
        .unwrap();

    let captured = fake.single();
    assert_eq!(captured.path, "/emails");
    assert_eq!(
        captured.headers["authorization"].to_str().unwrap(),
        "Bearer re_test_key"
    );
    let json: serde_json::Value = serde_json::from_slice(&captured.body).unwrap();
    assert_eq!(json["from"], "alerts@example.com");
    assert_eq!(json["to"][0], "ops@example.com");
    assert_eq!(json["subject"], "OTP 1234");
    assert_eq!(json["text"], "OTP 1234\n\ndisk at 91%");
}

#[tokio::test]
async fn test_email_validation_error_is_fatal() {
    let (base, _fake) = fake_channel(StatusCode::UNPROCESSABLE_ENTITY).await;
    let err = email(base)
        .deliver(&request(ChannelType::Email, None))
        .await
        .unwrap_err();
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_email_without_credentials_is_fatal() {
    let adapter = EmailAdapter::new(
        reqwest::Client::new(),
        EmailConfig {
            api_key: None,
            api_url: "http://127.0.0.1:1".to_string(),
            from: Some("a@example.com".to_string()),
            to: Some("b@example.com".to_string()),
        },
    );
    let err = adapter
        .deliver(&request(ChannelType::Email, None))
        .await
        .unwrap_err();
    assert_eq!(err, DeliveryError::not_configured(ChannelType::Email));
}

// ============================================================
// SMS
// ============================================================

#[tokio::test]
async fn test_sms_posts_twilio_form() {
    let (base, fake) = fake_channel(StatusCode::CREATED).await;

    sms(base)
        .deliver(&request(ChannelType::Sms, None))
        .await
        .unwrap();

    let captured = fake.single();
    assert_eq!(captured.path, "/2010-04-01/Accounts/AC123/Messages.json");
    assert!(
        captured.headers["authorization"]
            .to_str()
            .unwrap()
            .starts_with("Basic ")
    );
    let body = String::from_utf8(captured.body.to_vec()).unwrap();
    assert!(body.contains("To=%2B15550001111"));
    assert!(body.contains("From=%2B15550000000"));
    assert!(body.contains("Body=OTP+1234"));
}

#[tokio::test]
async fn test_sms_invalid_recipient_is_fatal() {
    let (base, _fake) = fake_channel(StatusCode::BAD_REQUEST).await;
    let err = sms(base)
        .deliver(&request(ChannelType::Sms, None))
        .await
        .unwrap_err();
    assert!(matches!(err, DeliveryError::Fatal(_)));
}

#[tokio::test]
async fn test_sms_outage_is_retryable() {
    let (base, _fake) = fake_channel(StatusCode::SERVICE_UNAVAILABLE).await;
    let err = sms(base)
        .deliver(&request(ChannelType::Sms, None))
        .await
        .unwrap_err();
    assert!(err.is_retryable());
}
