pub mod broker;
pub mod config;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod remote;
pub mod server;

pub use broker::{enqueue_with_retry, Broker, Cache};
pub use config::BrokerConfig;
pub use error::{BrokerError, Result};
pub use memory::{MemoryBroker, MemoryCache, DEFAULT_LEASE};
pub use remote::RemoteBroker;
pub use server::BrokerServer;
