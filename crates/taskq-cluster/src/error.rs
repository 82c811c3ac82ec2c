use taskq_broker::BrokerError;
use taskq_core::TaskError;
use taskq_persistence::PersistenceError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Pipeline channel closed")]
    ChannelClosed,

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

pub type Result<T> = std::result::Result<T, ClusterError>;
