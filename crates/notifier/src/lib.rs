//! Notification delivery workers.
//!
//! The [`Dispatcher`] leases jobs from the delivery queue per channel, hands
//! them to the matching [`ChannelAdapter`] and settles the lease:
//! - success → delivered
//! - retryable failure → requeued with exponential backoff, dead-lettered after max attempts
//! - fatal failure → dead-lettered immediately
//!
//! Every terminal job emits exactly one [`DeliveryEvent`].

pub mod adapter;
pub mod backoff;
pub mod discord;
pub mod dispatcher;
pub mod email;
pub mod events;
pub mod sms;

pub use adapter::{AdapterRegistry, ChannelAdapter, DeliveryError};
pub use backoff::BackoffPolicy;
pub use dispatcher::{DispatchConfig, Dispatcher, DispatcherHandle, Outcome};
pub use events::{
    BroadcastEventSink, DeliveryEvent, DeliveryOutcome, EventSink, FanoutEventSink,
    TracingEventSink,
};
