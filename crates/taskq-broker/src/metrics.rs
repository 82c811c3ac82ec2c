use prometheus::{IntCounterVec, IntGauge, Opts, Registry};

/// Prometheus metrics for the broker server
pub struct BrokerMetrics {
    pub registry: Registry,

    // Queue traffic by operation
    pub payloads_total: IntCounterVec,

    // Queue gauges
    pub queue_depth: IntGauge,
    pub in_flight: IntGauge,

    // Cache traffic by operation
    pub cache_ops_total: IntCounterVec,

    pub connections: IntGauge,
}

impl BrokerMetrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let payloads_total = IntCounterVec::new(
            Opts::new("tq_broker_payloads_total", "Queue payloads by operation"),
            &["op"],
        )?;
        registry.register(Box::new(payloads_total.clone()))?;

        let queue_depth = IntGauge::new("tq_broker_queue_depth", "Payloads waiting in the queue")?;
        registry.register(Box::new(queue_depth.clone()))?;

        let in_flight = IntGauge::new(
            "tq_broker_in_flight",
            "Deliveries awaiting acknowledgement",
        )?;
        registry.register(Box::new(in_flight.clone()))?;

        let cache_ops_total = IntCounterVec::new(
            Opts::new("tq_broker_cache_ops_total", "Cache operations by kind"),
            &["op"],
        )?;
        registry.register(Box::new(cache_ops_total.clone()))?;

        let connections = IntGauge::new("tq_broker_connections", "Open client connections")?;
        registry.register(Box::new(connections.clone()))?;

        Ok(BrokerMetrics {
            registry,
            payloads_total,
            queue_depth,
            in_flight,
            cache_ops_total,
            connections,
        })
    }

    pub fn inc_payloads(&self, op: &str) {
        self.payloads_total.with_label_values(&[op]).inc();
    }

    pub fn add_payloads(&self, op: &str, count: u64) {
        self.payloads_total.with_label_values(&[op]).inc_by(count);
    }

    pub fn inc_cache_op(&self, op: &str) {
        self.cache_ops_total.with_label_values(&[op]).inc();
    }

    pub fn update_queue(&self, depth: usize, in_flight: usize) {
        self.queue_depth.set(depth as i64);
        self.in_flight.set(in_flight as i64);
    }
}
