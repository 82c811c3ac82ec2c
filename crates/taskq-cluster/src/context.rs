use crate::{ClusterConfig, ClusterMetrics, Result, TaskRegistry};
use std::sync::Arc;
use taskq_broker::Broker;
use taskq_core::CacheKeys;
use taskq_persistence::TaskStore;

/// Everything a pipeline stage needs, shared by reference
#[derive(Clone)]
pub struct ClusterContext {
    pub config: Arc<ClusterConfig>,
    pub broker: Arc<dyn Broker>,
    pub store: Arc<dyn TaskStore>,
    pub registry: Arc<TaskRegistry>,
    pub metrics: Arc<ClusterMetrics>,
}

impl ClusterContext {
    pub fn new(
        config: ClusterConfig,
        broker: Arc<dyn Broker>,
        store: Arc<dyn TaskStore>,
        registry: TaskRegistry,
    ) -> Result<Self> {
        config.validate()?;
        Ok(ClusterContext {
            config: Arc::new(config),
            broker,
            store,
            registry: Arc::new(registry),
            metrics: Arc::new(ClusterMetrics::new()?),
        })
    }

    pub fn keys(&self) -> CacheKeys {
        CacheKeys::new(self.config.name.clone())
    }
}
