use axum::Router;
use clap::Parser;
use prometheus::{Encoder, TextEncoder};
use std::sync::Arc;
use taskq_broker::RemoteBroker;
use taskq_cluster::{Cluster, ClusterConfig, ClusterContext, ClusterMetrics, TaskRegistry};
use taskq_persistence::{RocksStore, RocksStoreConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "tq-cluster")]
#[command(about = "Task queue cluster: pusher, workers and monitor", long_about = None)]
struct Args {
    /// Broker address
    #[arg(short, long)]
    broker: Option<String>,

    /// Number of workers
    #[arg(short, long)]
    workers: Option<usize>,

    /// Directory of the result store
    #[arg(long)]
    data_dir: Option<String>,

    /// Prometheus metrics port
    #[arg(long)]
    metrics_port: Option<u16>,

    /// Path to configuration file
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        ClusterConfig::from_file(config_path)?
    } else {
        ClusterConfig::default()
    };

    // Override with CLI args
    if let Some(broker) = args.broker {
        config.broker_address = broker;
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(metrics_port) = args.metrics_port {
        config.prometheus_port = metrics_port;
    }

    let broker = RemoteBroker::connect(config.broker_address.clone()).await?;
    tracing::info!("Connected to broker at {}", broker.address());

    let store = RocksStore::open(RocksStoreConfig {
        data_dir: config.data_dir.clone().into(),
    })?;

    let registry = TaskRegistry::with_builtins();
    tracing::info!("Registered functions: {:?}", registry.task_names());

    let metrics_port = config.prometheus_port;
    let ctx = ClusterContext::new(config, Arc::new(broker), Arc::new(store), registry)?;

    // Start metrics server
    let metrics = ctx.metrics.clone();
    tokio::spawn(async move {
        if let Err(e) = start_metrics_server(metrics, metrics_port).await {
            tracing::error!("Metrics server error: {}", e);
        }
    });

    let cluster = Cluster::start(ctx).await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal");

    cluster.stop().await?;

    Ok(())
}

async fn start_metrics_server(metrics: Arc<ClusterMetrics>, port: u16) -> anyhow::Result<()> {
    use axum::{extract::State, http::StatusCode, routing::get};

    async fn metrics_handler(
        State(metrics): State<Arc<ClusterMetrics>>,
    ) -> Result<String, (StatusCode, String)> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&metrics.registry.gather(), &mut buffer)
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
    }

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics);

    let addr = format!("0.0.0.0:{}", port);
    tracing::info!("Metrics server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
