use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub broker: NetworkConfig,
    pub queue: QueueConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub host: String,
    pub port: u16,
    pub max_connections: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Seconds a delivery may stay unacknowledged before it is re-published
    pub lease_secs: u64,
    /// How often expired leases and cache entries are swept
    pub reclaim_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub prometheus_port: u16,
    pub log_level: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        BrokerConfig {
            broker: NetworkConfig {
                host: "0.0.0.0".to_string(),
                port: 6380,
                max_connections: 1000,
            },
            queue: QueueConfig {
                lease_secs: 300,
                reclaim_interval_secs: 10,
            },
            monitoring: MonitoringConfig {
                prometheus_port: 9091,
                log_level: "info".to_string(),
            },
        }
    }
}

impl BrokerConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: BrokerConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.broker.host, self.broker.port)
    }

    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.queue.lease_secs)
    }

    pub fn reclaim_interval(&self) -> Duration {
        Duration::from_secs(self.queue.reclaim_interval_secs.max(1))
    }
}
