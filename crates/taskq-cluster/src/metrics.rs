use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry};

/// Prometheus metrics for one cluster instance
pub struct ClusterMetrics {
    pub registry: Registry,

    // Tasks by outcome (success, failure)
    pub tasks_total: IntCounterVec,
    pub task_duration_seconds: HistogramVec,

    pub persistence_failures_total: IntCounter,
    pub chain_steps_total: IntCounter,
    pub iterables_assembled_total: IntCounter,
}

impl ClusterMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let tasks_total = IntCounterVec::new(
            Opts::new("tq_cluster_tasks_total", "Tasks processed by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(tasks_total.clone()))?;

        let task_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "tq_cluster_task_duration_seconds",
                "Task execution duration",
            )
            .buckets(vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 30.0, 300.0]),
            &["func"],
        )?;
        registry.register(Box::new(task_duration_seconds.clone()))?;

        let persistence_failures_total = IntCounter::new(
            "tq_cluster_persistence_failures_total",
            "Results dropped after exhausting write retries",
        )?;
        registry.register(Box::new(persistence_failures_total.clone()))?;

        let chain_steps_total = IntCounter::new(
            "tq_cluster_chain_steps_total",
            "Chain steps submitted by the monitor",
        )?;
        registry.register(Box::new(chain_steps_total.clone()))?;

        let iterables_assembled_total = IntCounter::new(
            "tq_cluster_iterables_assembled_total",
            "Iterable submissions whose results were assembled",
        )?;
        registry.register(Box::new(iterables_assembled_total.clone()))?;

        Ok(ClusterMetrics {
            registry,
            tasks_total,
            task_duration_seconds,
            persistence_failures_total,
            chain_steps_total,
            iterables_assembled_total,
        })
    }

    pub fn observe_task(&self, func: &str, success: bool, seconds: f64) {
        let outcome = if success { "success" } else { "failure" };
        self.tasks_total.with_label_values(&[outcome]).inc();
        self.task_duration_seconds
            .with_label_values(&[func])
            .observe(seconds);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observe_task() {
        let metrics = ClusterMetrics::new().unwrap();
        metrics.observe_task("math.floor", true, 0.01);
        metrics.observe_task("math.floor", false, 0.02);

        assert_eq!(metrics.tasks_total.with_label_values(&["success"]).get(), 1);
        assert_eq!(metrics.tasks_total.with_label_values(&["failure"]).get(), 1);
        assert_eq!(
            metrics
                .task_duration_seconds
                .with_label_values(&["math.floor"])
                .get_sample_count(),
            2
        );
    }
}
