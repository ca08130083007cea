use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

/// Discord webhook settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscordConfig {
    /// Incoming webhook URL; the channel is disabled when unset
    pub webhook_url: Option<String>,

    /// Display name the webhook posts as
    pub username: String,
}

/// Email delivery settings (Resend HTTP API).
#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    /// Resend API key
    pub api_key: Option<String>,

    /// Base URL of the Resend API
    pub api_url: String,

    /// Sender address
    pub from: Option<String>,

    /// Recipient address
    pub to: Option<String>,
}

/// SMS delivery settings (Twilio REST API).
#[derive(Debug, Clone, Deserialize)]
pub struct SmsConfig {
    pub account_sid: Option<String>,
    pub auth_token: Option<String>,
    pub from_phone_number: Option<String>,
    pub to_phone_number: Option<String>,

    /// Base URL of the Twilio API
    pub api_url: String,
}

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// HTTP listen port (default: 8080)
    pub port: u16,

    /// PostgreSQL connection string; the in-memory queue is used when unset
    pub database_url: Option<String>,

    /// Maximum number of PostgreSQL connections in the pool (default: 10)
    pub db_max_connections: u32,

    /// Redis connection string; idempotency keys are ignored when unset
    pub redis_url: Option<String>,

    /// How long an idempotency key maps to its job (default: 86400)
    pub idempotency_ttl_secs: u64,

    /// Delivery attempts before a job is dead-lettered (default: 5)
    pub max_attempts: u32,

    /// First retry delay in milliseconds (default: 1000)
    pub backoff_base_ms: u64,

    /// Upper bound for a retry delay in milliseconds (default: 3600000 = 1h)
    pub backoff_cap_ms: u64,

    /// Concurrent deliveries per channel (default: 4)
    pub parallelism: usize,

    /// Idle sleep between lease attempts in milliseconds (default: 500)
    pub poll_interval_ms: u64,

    /// Per-attempt delivery timeout in seconds (default: 10)
    pub delivery_timeout_secs: u64,

    /// Lease duration before a job is returned to pending (default: 60)
    pub lease_timeout_secs: u64,

    /// Interval of the lease reclaim / purge task in seconds (default: 30)
    pub maintenance_interval_secs: u64,

    /// Days terminal jobs are kept before being purged (default: 7)
    pub job_retention_days: u64,

    pub discord: DiscordConfig,
    pub email: EmailConfig,
    pub sms: SmsConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            database_url: None,
            db_max_connections: 10,
            redis_url: None,
            idempotency_ttl_secs: 86_400,
            max_attempts: 5,
            backoff_base_ms: 1_000,
            backoff_cap_ms: 3_600_000,
            parallelism: 4,
            poll_interval_ms: 500,
            delivery_timeout_secs: 10,
            lease_timeout_secs: 60,
            maintenance_interval_secs: 30,
            job_retention_days: 7,
            discord: DiscordConfig {
                webhook_url: None,
                username: "notify".to_string(),
            },
            email: EmailConfig {
                api_key: None,
                api_url: "https://api.resend.com".to_string(),
                from: None,
                to: None,
            },
            sms: SmsConfig {
                account_sid: None,
                auth_token: None,
                from_phone_number: None,
                to_phone_number: None,
                api_url: "https://api.twilio.com".to_string(),
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        let config = Self {
            port: parse_var("APP_PORT", defaults.port)?,
            database_url: optional_var("DATABASE_URL"),
            db_max_connections: parse_var("DB_MAX_CONNECTIONS", defaults.db_max_connections)?,
            redis_url: optional_var("REDIS_URL"),
            idempotency_ttl_secs: parse_var("IDEMPOTENCY_TTL_SECS", defaults.idempotency_ttl_secs)?,
            max_attempts: parse_var("DISPATCH_MAX_ATTEMPTS", defaults.max_attempts)?,
            backoff_base_ms: parse_var("DISPATCH_BACKOFF_BASE_MS", defaults.backoff_base_ms)?,
            backoff_cap_ms: parse_var("DISPATCH_BACKOFF_CAP_MS", defaults.backoff_cap_ms)?,
            parallelism: parse_var("DISPATCH_PARALLELISM", defaults.parallelism)?,
            poll_interval_ms: parse_var("DISPATCH_POLL_INTERVAL_MS", defaults.poll_interval_ms)?,
            delivery_timeout_secs: parse_var(
                "DELIVERY_TIMEOUT_SECS",
                defaults.delivery_timeout_secs,
            )?,
            lease_timeout_secs: parse_var("LEASE_TIMEOUT_SECS", defaults.lease_timeout_secs)?,
            maintenance_interval_secs: parse_var(
                "MAINTENANCE_INTERVAL_SECS",
                defaults.maintenance_interval_secs,
            )?,
            job_retention_days: parse_var("JOB_RETENTION_DAYS", defaults.job_retention_days)?,
            discord: DiscordConfig {
                webhook_url: optional_var("DISCORD_WEBHOOK_URL"),
                username: optional_var("DISCORD_USERNAME").unwrap_or(defaults.discord.username),
            },
            email: EmailConfig {
                api_key: optional_var("RESEND_API_KEY"),
                api_url: optional_var("RESEND_API_URL").unwrap_or(defaults.email.api_url),
                from: optional_var("EMAIL_FROM"),
                to: optional_var("EMAIL_TO"),
            },
            sms: SmsConfig {
                account_sid: optional_var("TWILIO_ACCOUNT_SID"),
                auth_token: optional_var("TWILIO_AUTH_TOKEN"),
                from_phone_number: optional_var("TWILIO_FROM_PHONE_NUMBER"),
                to_phone_number: optional_var("TWILIO_TO_PHONE_NUMBER"),
                api_url: optional_var("TWILIO_API_URL").unwrap_or(defaults.sms.api_url),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject combinations the dispatcher cannot honor.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_attempts == 0 {
            anyhow::bail!("DISPATCH_MAX_ATTEMPTS must be at least 1");
        }
        if self.parallelism == 0 {
            anyhow::bail!("DISPATCH_PARALLELISM must be at least 1");
        }
        if self.poll_interval_ms == 0 {
            anyhow::bail!("DISPATCH_POLL_INTERVAL_MS must be at least 1");
        }
        if self.delivery_timeout_secs == 0 {
            anyhow::bail!("DELIVERY_TIMEOUT_SECS must be at least 1");
        }
        if self.maintenance_interval_secs == 0 {
            anyhow::bail!("MAINTENANCE_INTERVAL_SECS must be at least 1");
        }
        if self.backoff_cap_ms < self.backoff_base_ms {
            anyhow::bail!("DISPATCH_BACKOFF_CAP_MS must not be below DISPATCH_BACKOFF_BASE_MS");
        }
        // A delivery that outlives its lease could be picked up by a second worker.
        if self.delivery_timeout_secs >= self.lease_timeout_secs {
            anyhow::bail!("DELIVERY_TIMEOUT_SECS must be shorter than LEASE_TIMEOUT_SECS");
        }
        Ok(())
    }

    pub fn lease_timeout(&self) -> Duration {
        Duration::from_secs(self.lease_timeout_secs)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }

    pub fn job_retention(&self) -> Duration {
        Duration::from_secs(self.job_retention_days * 24 * 60 * 60)
    }
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T: FromStr>(name: &str, default: T) -> anyhow::Result<T> {
    match optional_var(name) {
        Some(raw) => raw.trim().parse().map_err(|_| {
            anyhow::anyhow!(
                "{} must be a valid {}",
                name,
                std::any::type_name::<T>()
            )
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.job_retention(), Duration::from_secs(7 * 86_400));
    }

    #[test]
    fn test_delivery_timeout_must_fit_in_lease() {
        let config = AppConfig {
            delivery_timeout_secs: 60,
            lease_timeout_secs: 60,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let config = AppConfig {
            max_attempts: 0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cap_below_base_rejected() {
        let config = AppConfig {
            backoff_base_ms: 5_000,
            backoff_cap_ms: 1_000,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_maintenance_interval_rejected() {
        let config = AppConfig {
            maintenance_interval_secs: 0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let config = AppConfig {
            poll_interval_ms: 0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_delivery_timeout_rejected() {
        let config = AppConfig {
            delivery_timeout_secs: 0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
