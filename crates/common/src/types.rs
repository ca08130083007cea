use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Delivery channel a notification is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum ChannelType {
    Discord,
    Email,
    Sms,
}

impl ChannelType {
    /// Every channel the service knows how to deliver to.
    pub const ALL: [ChannelType; 3] = [ChannelType::Discord, ChannelType::Email, ChannelType::Sms];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::Discord => "discord",
            ChannelType::Email => "email",
            ChannelType::Sms => "sms",
        }
    }
}

impl std::fmt::Display for ChannelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string does not name a known channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown channel type '{0}'")]
pub struct UnknownChannel(pub String);

impl FromStr for ChannelType {
    type Err = UnknownChannel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChannelType::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| UnknownChannel(s.to_string()))
    }
}

/// Lifecycle state of a notification job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Leased,
    Delivered,
    DeadLettered,
    Cancelled,
}

impl JobState {
    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Delivered | JobState::DeadLettered | JobState::Cancelled
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Pending => write!(f, "pending"),
            JobState::Leased => write!(f, "leased"),
            JobState::Delivered => write!(f, "delivered"),
            JobState::DeadLettered => write!(f, "dead_lettered"),
            JobState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A validated notification, immutable once accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRequest {
    #[serde(rename = "type")]
    pub channel: ChannelType,
    pub message: String,
    pub details: Option<String>,
}

impl NotificationRequest {
    /// Message followed by a blank line and the details, when present.
    pub fn body_with_details(&self) -> String {
        match &self.details {
            Some(details) => format!("{}\n\n{}", self.message, details),
            None => self.message.clone(),
        }
    }
}

/// A notification queued for delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub request: NotificationRequest,
    pub state: JobState,
    /// Completed delivery attempts. Only ever increases.
    pub attempts: u32,
    pub next_eligible_at: DateTime<Utc>,
    pub leased_until: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub lease_token: Option<Uuid>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Build a fresh pending job, eligible immediately.
    pub fn new(id: Uuid, request: NotificationRequest, now: DateTime<Utc>) -> Self {
        Self {
            id,
            request,
            state: JobState::Pending,
            attempts: 0,
            next_eligible_at: now,
            leased_until: None,
            lease_token: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn channel(&self) -> ChannelType {
        self.request.channel
    }

    /// Whether `lease` may hand this job out at `now`.
    ///
    /// Leased jobs whose lease has run out count as eligible again.
    pub fn is_leasable(&self, now: DateTime<Utc>) -> bool {
        match self.state {
            JobState::Pending => self.next_eligible_at <= now,
            JobState::Leased => self.leased_until.is_some_and(|until| until < now),
            _ => false,
        }
    }
}

/// Public, read-only view of a job returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobView {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub channel: ChannelType,
    pub state: JobState,
    pub attempts: u32,
    pub next_eligible_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Job> for JobView {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            channel: job.request.channel,
            state: job.state,
            attempts: job.attempts,
            next_eligible_at: job.next_eligible_at,
            last_error: job.last_error.clone(),
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

/// Job counts per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: u64,
    pub leased: u64,
    pub delivered: u64,
    pub dead_lettered: u64,
    pub cancelled: u64,
}

impl QueueStats {
    /// Jobs still owned by the queue or a dispatcher.
    pub fn in_flight(&self) -> u64 {
        self.pending + self.leased
    }

    pub fn record(&mut self, state: JobState) {
        match state {
            JobState::Pending => self.pending += 1,
            JobState::Leased => self.leased += 1,
            JobState::Delivered => self.delivered += 1,
            JobState::DeadLettered => self.dead_lettered += 1,
            JobState::Cancelled => self.cancelled += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn request(channel: ChannelType) -> NotificationRequest {
        NotificationRequest {
            channel,
            message: "hello".to_string(),
            details: None,
        }
    }

    #[test]
    fn test_channel_type_round_trips_through_str() {
        for channel in ChannelType::ALL {
            assert_eq!(channel.as_str().parse::<ChannelType>(), Ok(channel));
        }
        assert_eq!(
            "fax".parse::<ChannelType>(),
            Err(UnknownChannel("fax".to_string()))
        );
        // Matching is case-sensitive
        assert!("SMS".parse::<ChannelType>().is_err());
    }

    #[test]
    fn test_request_serializes_channel_as_type() {
        let json = serde_json::to_value(request(ChannelType::Sms)).unwrap();
        assert_eq!(json["type"], "sms");
        assert_eq!(json["message"], "hello");
    }

    #[test]
    fn test_body_with_details() {
        let mut req = request(ChannelType::Email);
        assert_eq!(req.body_with_details(), "hello");
        req.details = Some("{\"k\":1}".to_string());
        assert_eq!(req.body_with_details(), "hello\n\n{\"k\":1}");
    }

    #[test]
    fn test_new_job_is_pending_with_zero_attempts() {
        let now = Utc::now();
        let job = Job::new(Uuid::new_v4(), request(ChannelType::Discord), now);
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.attempts, 0);
        assert!(job.is_leasable(now));
        assert!(!job.is_leasable(now - Duration::seconds(1)));
    }

    #[test]
    fn test_expired_lease_is_leasable() {
        let now = Utc::now();
        let mut job = Job::new(Uuid::new_v4(), request(ChannelType::Sms), now);
        job.state = JobState::Leased;
        job.leased_until = Some(now + Duration::seconds(30));
        assert!(!job.is_leasable(now));
        assert!(job.is_leasable(now + Duration::seconds(31)));
    }

    #[test]
    fn test_terminal_states() {
        assert!(!JobState::Pending.is_terminal());
        assert!(!JobState::Leased.is_terminal());
        assert!(JobState::Delivered.is_terminal());
        assert!(JobState::DeadLettered.is_terminal());
        assert!(JobState::Cancelled.is_terminal());
        assert_eq!(JobState::DeadLettered.to_string(), "dead_lettered");
    }
}
