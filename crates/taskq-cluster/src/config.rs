use crate::{ClusterError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use taskq_core::{Backoff, DEFAULT_TIMEOUT_SECS};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Cluster name, also the prefix of every cache key
    pub name: String,
    pub cluster_id: Option<String>,
    pub broker_address: String,
    pub data_dir: String,

    /// Number of concurrent workers
    pub workers: usize,
    /// Capacity of the result channel. The task channel holds at most
    /// `min(queue_limit, workers)` prefetched tasks.
    pub queue_limit: usize,
    /// Pusher wait between polls of an empty queue
    pub poll_interval_ms: u64,
    /// Interval at which `result`/`fetch` re-read the store
    pub result_poll_ms: u64,

    pub timeout_secs: u32,
    /// Cache entry lifetime for cached results (None = no expiry)
    pub cache_ttl_secs: Option<u64>,

    /// Attempts for enqueue and result writes before giving up
    pub save_retries: u32,
    pub retry: Backoff,

    /// Defaults applied when a submission does not say otherwise
    pub cached: bool,
    pub sync: bool,

    pub prometheus_port: u16,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        ClusterConfig {
            name: "default".to_string(),
            cluster_id: None,
            broker_address: "127.0.0.1:6380".to_string(),
            data_dir: "./data".to_string(),
            workers: 4,
            queue_limit: 50,
            poll_interval_ms: 200,
            result_poll_ms: 10,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            cache_ttl_secs: Some(300),
            save_retries: 3,
            retry: Backoff::default(),
            cached: false,
            sync: false,
            prometheus_port: 9092,
        }
    }
}

impl ClusterConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: ClusterConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(ClusterError::Config("workers must be at least 1".to_string()));
        }
        if self.queue_limit == 0 {
            return Err(ClusterError::Config(
                "queue_limit must be at least 1".to_string(),
            ));
        }
        if self.name.is_empty() || self.name.contains(':') {
            return Err(ClusterError::Config(format!(
                "invalid cluster name {:?}",
                self.name
            )));
        }
        Ok(())
    }

    /// Tasks the pusher may hold for workers that are still busy
    pub fn prefetch(&self) -> usize {
        self.queue_limit.min(self.workers).max(1)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn result_poll(&self) -> Duration {
        Duration::from_millis(self.result_poll_ms.max(1))
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl_secs.map(Duration::from_secs)
    }

    /// Attempts for a retried operation, never below one
    pub fn attempts(&self) -> u32 {
        self.save_retries.max(1)
    }

    pub fn generate_cluster_id(&self) -> String {
        if let Some(id) = &self.cluster_id {
            return id.clone();
        }

        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());

        let pid = std::process::id();
        let random = uuid::Uuid::new_v4().simple().to_string();

        format!("{}-{}-{}", hostname, pid, &random[..8])
    }
}
