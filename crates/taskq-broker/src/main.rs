use axum::Router;
use clap::Parser;
use prometheus::{Encoder, TextEncoder};
use std::sync::Arc;
use taskq_broker::{metrics::BrokerMetrics, BrokerConfig, BrokerServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "tq-broker")]
#[command(about = "Task queue broker and result cache", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "broker.yaml")]
    config: String,

    /// Broker host
    #[arg(long)]
    host: Option<String>,

    /// Broker port
    #[arg(long)]
    port: Option<u16>,

    /// Prometheus metrics port
    #[arg(long)]
    metrics_port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = if std::path::Path::new(&args.config).exists() {
        BrokerConfig::from_file(&args.config)?
    } else {
        BrokerConfig::default()
    };

    // Initialize tracing
    let default_level = config.monitoring.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // Override with CLI args
    if let Some(host) = args.host {
        config.broker.host = host;
    }
    if let Some(port) = args.port {
        config.broker.port = port;
    }
    if let Some(metrics_port) = args.metrics_port {
        config.monitoring.prometheus_port = metrics_port;
    }

    tracing::info!("Starting broker with config: {:?}", config);

    let metrics_port = config.monitoring.prometheus_port;
    let server = Arc::new(BrokerServer::new(config)?);

    // Start metrics server
    let metrics = server.metrics();
    tokio::spawn(async move {
        if let Err(e) = start_metrics_server(metrics, metrics_port).await {
            tracing::error!("Metrics server error: {}", e);
        }
    });

    let shutdown = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received interrupt");
            shutdown.shutdown();
        }
    });

    server.run().await?;

    Ok(())
}

async fn start_metrics_server(metrics: Arc<BrokerMetrics>, port: u16) -> anyhow::Result<()> {
    use axum::{extract::State, http::StatusCode, routing::get};

    async fn metrics_handler(
        State(metrics): State<Arc<BrokerMetrics>>,
    ) -> Result<String, (StatusCode, String)> {
        let encoder = TextEncoder::new();
        let metric_families = metrics.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
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
