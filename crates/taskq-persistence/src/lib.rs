mod memory;
mod store;

pub use memory::MemoryStore;
pub use store::{RocksStore, RocksStoreConfig};

use taskq_core::{Task, TaskId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("RocksDB error: {0}")]
    RocksDbError(#[from] rocksdb::Error),

    #[error("Task error: {0}")]
    TaskError(#[from] taskq_core::TaskError),

    #[error("Refusing to store unfinished task {0}")]
    Unfinished(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, PersistenceError>;

/// Which members of a group a query returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupFilter {
    All,
    Successes,
    Failures,
}

impl GroupFilter {
    pub fn matches(&self, task: &Task) -> bool {
        match self {
            GroupFilter::All => true,
            GroupFilter::Successes => task.success == Some(true),
            GroupFilter::Failures => task.success == Some(false),
        }
    }
}

/// Durable storage for finished task records.
///
/// Saving a record with an existing id replaces it, so re-delivered
/// results converge on a single entry.
pub trait TaskStore: Send + Sync {
    fn save(&self, task: &Task) -> Result<()>;

    fn get(&self, id: &TaskId) -> Result<Option<Task>>;

    /// Members of `group` matching `filter`, in chain order then stop time
    fn query(&self, group: &str, filter: GroupFilter) -> Result<Vec<Task>>;

    /// Returns whether a record was removed
    fn delete_task(&self, id: &TaskId) -> Result<bool>;

    /// Returns the number of records removed
    fn delete_group(&self, group: &str) -> Result<usize>;
}

/// Order group members by chain position, then by when they stopped
pub fn sort_records(tasks: &mut [Task]) {
    tasks.sort_by(|a, b| {
        (a.chain_index, a.stopped_at).cmp(&(b.chain_index, b.stopped_at))
    });
}

pub(crate) fn ensure_finished(task: &Task) -> Result<()> {
    if task.is_finished() {
        Ok(())
    } else {
        Err(PersistenceError::Unfinished(task.id.to_string()))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{Duration, Utc};
    use taskq_core::{Outcome, Signature, Task, Value};

    pub fn finished(group: Option<&str>, outcome: Outcome, offset_ms: i64) -> Task {
        let mut builder = Task::builder(Signature::new("echo"));
        if let Some(group) = group {
            builder = builder.group(group);
        }
        let mut task = builder.build().unwrap();
        let stopped = Utc::now() + Duration::milliseconds(offset_ms);
        task.finish(&outcome, stopped, stopped).unwrap();
        task
    }

    pub fn ok(group: Option<&str>, value: i64, offset_ms: i64) -> Task {
        finished(group, Outcome::Success(Value::from(value)), offset_ms)
    }

    pub fn failed(group: Option<&str>, offset_ms: i64) -> Task {
        finished(group, Outcome::Failure("boom".to_string()), offset_ms)
    }
}
