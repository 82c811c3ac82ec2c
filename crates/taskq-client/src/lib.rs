mod blocking;
mod chain;
mod client;
mod options;
mod wait;

pub use blocking::BlockingClient;
pub use chain::Chain;
pub use client::TaskClient;
pub use options::{GroupQuery, SubmitOptions};
pub use wait::Wait;

use taskq_broker::BrokerError;
use taskq_cluster::ClusterError;
use taskq_core::TaskError;
use taskq_persistence::PersistenceError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cannot submit an empty iterable")]
    EmptyIterable,

    #[error("Cannot run an empty chain")]
    EmptyChain,

    #[error("Invalid task timeout: {0:?}")]
    InvalidTimeout(std::time::Duration),

    #[error("Runtime error: {0}")]
    Runtime(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ClientError>;
