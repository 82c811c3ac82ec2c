use crate::{Outcome, Result, TaskError, MAX_PAYLOAD_SIZE};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use uuid::Uuid;

/// Unique identifier for a task
pub type TaskId = Uuid;

/// Keyword arguments passed to a task function
pub type Kwargs = Map<String, Value>;

/// Default execution timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u32 = 300;

/// A function reference together with the inputs it is invoked with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    /// Registry key of the function (e.g. "math.floor")
    pub func: String,
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Kwargs,
}

impl Signature {
    pub fn new(func: impl Into<String>) -> Self {
        Signature {
            func: func.into(),
            args: Vec::new(),
            kwargs: Kwargs::new(),
        }
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    pub fn kwargs(mut self, kwargs: Kwargs) -> Self {
        self.kwargs = kwargs;
        self
    }
}

/// Execution state derived from the `success` tri-state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    /// No result has been recorded yet
    Pending,
    /// The function returned a value
    Succeeded,
    /// The function failed, timed out, panicked or could not be resolved
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
        }
    }
}

/// Position of a fan-out member inside an iterable submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterMembership {
    /// Number of members in the fan-out group
    pub count: usize,
    /// Index of the input element this member was created for
    pub index: usize,
    /// Whether the assembled result goes to the cache instead of durable storage
    pub cached: bool,
}

/// Unit of work flowing through broker, workers and monitor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier, assigned at submission
    pub id: TaskId,

    /// Registry key of the function to invoke
    pub func: String,

    /// Positional arguments
    pub args: Vec<Value>,

    /// Keyword arguments
    #[serde(default)]
    pub kwargs: Kwargs,

    /// Optional group label shared with other tasks
    pub group: Option<String>,

    /// Also store the result in the fast cache
    pub cached: bool,

    /// Cache entry lifetime (None = no expiry)
    pub cache_ttl_secs: Option<u64>,

    /// Result lives only in the cache and never reaches durable storage
    #[serde(default)]
    pub cache_only: bool,

    /// Executed inline by the submitter
    pub sync: bool,

    /// Chain steps still to be submitted after this one
    #[serde(default)]
    pub chain: Vec<Signature>,

    /// Position of this task within its chain
    pub chain_index: Option<usize>,

    /// Fan-out membership for iterable submissions
    pub iter: Option<IterMembership>,

    /// Execution timeout in milliseconds (None = default)
    pub timeout_ms: Option<u64>,

    /// When the task was submitted
    pub created_at: DateTime<Utc>,

    /// When a worker started executing it
    pub started_at: Option<DateTime<Utc>>,

    /// When execution stopped
    pub stopped_at: Option<DateTime<Utc>>,

    /// Returned value, or the failure description
    pub result: Option<Value>,

    /// None while pending
    pub success: Option<bool>,
}

impl Task {
    /// Create a new task with default options
    pub fn new(signature: Signature) -> Self {
        TaskBuilder::new(signature).into_task()
    }

    /// Create a new task builder
    pub fn builder(signature: Signature) -> TaskBuilder {
        TaskBuilder::new(signature)
    }

    /// Serialize task to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let bytes = serde_json::to_vec(self)?;
        if bytes.len() > MAX_PAYLOAD_SIZE {
            return Err(TaskError::PayloadTooLarge {
                max: MAX_PAYLOAD_SIZE,
                actual: bytes.len(),
            });
        }
        Ok(bytes)
    }

    /// Deserialize task from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(TaskError::from)
    }

    pub fn signature(&self) -> Signature {
        Signature {
            func: self.func.clone(),
            args: self.args.clone(),
            kwargs: self.kwargs.clone(),
        }
    }

    pub fn status(&self) -> TaskStatus {
        match self.success {
            None => TaskStatus::Pending,
            Some(true) => TaskStatus::Succeeded,
            Some(false) => TaskStatus::Failed,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.success.is_some()
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl_secs.map(Duration::from_secs)
    }

    pub fn timeout(&self) -> Duration {
        match self.timeout_ms {
            Some(ms) => Duration::from_millis(ms),
            None => Duration::from_secs(u64::from(DEFAULT_TIMEOUT_SECS)),
        }
    }

    /// Write the terminal fields. Fails if they were already written.
    pub fn finish(
        &mut self,
        outcome: &Outcome,
        started_at: DateTime<Utc>,
        stopped_at: DateTime<Utc>,
    ) -> Result<()> {
        if self.is_finished() {
            return Err(TaskError::AlreadyFinished(self.id.to_string()));
        }

        self.started_at = Some(started_at);
        self.stopped_at = Some(stopped_at);
        self.success = Some(outcome.is_success());
        self.result = Some(outcome.to_value());
        Ok(())
    }

    /// Build the task for the next chain step, if any remain.
    ///
    /// The successor inherits the group, cache and sync options.
    pub fn next_chain_step(&self) -> Option<Task> {
        let (next, rest) = self.chain.split_first()?;
        let index = self.chain_index.map(|i| i + 1).unwrap_or(1);

        let mut builder = Task::builder(next.clone())
            .cached(self.cached)
            .cache_ttl_secs(self.cache_ttl_secs)
            .sync(self.sync)
            .timeout_ms(self.timeout_ms)
            .chain(rest.to_vec(), index);
        if let Some(group) = &self.group {
            builder = builder.group(group.clone());
        }
        Some(builder.into_task())
    }
}

/// Builder for creating tasks with custom options
pub struct TaskBuilder {
    signature: Signature,
    group: Option<String>,
    cached: bool,
    cache_ttl_secs: Option<u64>,
    cache_only: bool,
    sync: bool,
    chain: Vec<Signature>,
    chain_index: Option<usize>,
    iter: Option<IterMembership>,
    timeout_ms: Option<u64>,
}

impl TaskBuilder {
    pub fn new(signature: Signature) -> Self {
        TaskBuilder {
            signature,
            group: None,
            cached: false,
            cache_ttl_secs: None,
            cache_only: false,
            sync: false,
            chain: Vec::new(),
            chain_index: None,
            iter: None,
            timeout_ms: None,
        }
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn cached(mut self, cached: bool) -> Self {
        self.cached = cached;
        self
    }

    pub fn cache_ttl_secs(mut self, ttl: Option<u64>) -> Self {
        self.cache_ttl_secs = ttl;
        self
    }

    pub fn cache_only(mut self, cache_only: bool) -> Self {
        self.cache_only = cache_only;
        self
    }

    pub fn sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    /// Remaining chain steps and this task's position in the chain
    pub fn chain(mut self, remaining: Vec<Signature>, index: usize) -> Self {
        self.chain = remaining;
        self.chain_index = Some(index);
        self
    }

    pub fn iter(mut self, membership: IterMembership) -> Self {
        self.iter = Some(membership);
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: Option<u64>) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn build(self) -> Result<Task> {
        if let Some(iter) = &self.iter {
            if iter.index >= iter.count {
                return Err(TaskError::InvalidIterIndex {
                    index: iter.index,
                    count: iter.count,
                });
            }
        }
        Ok(self.into_task())
    }

    fn into_task(self) -> Task {
        Task {
            id: Uuid::new_v4(),
            func: self.signature.func,
            args: self.signature.args,
            kwargs: self.signature.kwargs,
            group: self.group,
            cached: self.cached,
            cache_ttl_secs: self.cache_ttl_secs,
            cache_only: self.cache_only,
            sync: self.sync,
            chain: self.chain,
            chain_index: self.chain_index,
            iter: self.iter,
            timeout_ms: self.timeout_ms,
            created_at: Utc::now(),
            started_at: None,
            stopped_at: None,
            result: None,
            success: None,
        }
    }
}
