mod task;
mod envelope;
mod keys;
mod backoff;
mod error;

pub use task::{Task, TaskId, TaskBuilder, TaskStatus, Signature, Kwargs, IterMembership, DEFAULT_TIMEOUT_SECS};
pub use envelope::{ResultEnvelope, Outcome, Delivery, AckId};
pub use keys::CacheKeys;
pub use backoff::Backoff;
pub use error::{TaskError, Result};

pub use serde_json::Value;

pub const MAX_PAYLOAD_SIZE: usize = 10 * 1024 * 1024; // 10MB
