use thiserror::Error;

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Payload size exceeds maximum allowed size of {max} bytes (got {actual})")]
    PayloadTooLarge { max: usize, actual: usize },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Unknown task function: {0}")]
    UnknownTask(String),

    #[error("Task already finished: {0}")]
    AlreadyFinished(String),

    #[error("Invalid iterable membership: index {index} out of {count}")]
    InvalidIterIndex { index: usize, count: usize },

    #[error("Iterable group is not a task id: {0}")]
    InvalidIterGroup(String),
}

pub type Result<T> = std::result::Result<T, TaskError>;
