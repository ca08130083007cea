//! Delivery queue, the single shared job table of the dispatch engine.
//!
//! Jobs are partitioned by channel and handed out through leases. A lease is
//! fenced by a token, so only the current holder can ack, requeue or
//! dead-letter the job. Two backends implement [`JobQueue`]:
//!
//! - [`MemoryQueue`]: process-local, every mutation serialized behind one mutex
//! - [`PgQueue`]: durable, PostgreSQL rows claimed with `FOR UPDATE SKIP LOCKED`

pub mod clock;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod queue;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::QueueError;
pub use memory::MemoryQueue;
pub use postgres::PgQueue;
pub use queue::{JobQueue, Lease};
