pub mod cluster;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod handler;
pub mod metrics;
pub mod monitor;
pub mod pusher;
pub mod sync;
pub mod worker;

pub use cluster::{Cluster, ClusterHandle};
pub use config::ClusterConfig;
pub use context::ClusterContext;
pub use error::{ClusterError, Result};
pub use executor::{Execution, TaskExecutor};
pub use handler::{register_builtins, HandlerResult, TaskHandler, TaskRegistry};
pub use metrics::ClusterMetrics;
pub use monitor::{run_monitor, Monitor};
pub use pusher::{pull_once, run_pusher};
pub use sync::run_sync;
pub use worker::{run_worker, LastActivity, ResultMessage, SharedTaskReceiver, TaskMessage};
