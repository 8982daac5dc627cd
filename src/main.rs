//! Edge Authz - external authorization for an edge proxy

use anyhow::Context;
use clap::Parser;
use edge_authz::authz::AuthConfig;
use edge_authz::metrics::server::MetricsServer;
use edge_authz::metrics::{MetricsSink, NoopSink, PrometheusSink};
use edge_authz::server::AuthzServer;
use edge_authz::{AuthzService, Config};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Edge Authz - JWT authentication for proxied requests
#[derive(Parser, Debug)]
#[command(name = "edge-authz")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting Edge Authz v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Config::load(&args.config)
        .with_context(|| format!("failed to load configuration from {:?}", args.config))?;
    info!("Loaded configuration from {:?}", args.config);

    let auth = Arc::new(AuthConfig::connect(&config.auth).await?);
    info!(
        issuer = %auth.issuer,
        key_sources = auth.key_sources.len(),
        skip_routes = auth.skip_routes.len(),
        "authentication policy ready"
    );

    // Metrics
    let mut metrics_server = None;
    let sink: Arc<dyn MetricsSink> = if config.metrics.enabled {
        let sink = PrometheusSink::new().context("failed to register metrics")?;
        let mut server = MetricsServer::builder()
            .address(&config.metrics.address)
            .registry(sink.registry().clone())
            .build()?;
        let addr = server.start().await?;
        info!("Metrics server listening on {}", addr);
        metrics_server = Some(server);
        Arc::new(sink)
    } else {
        Arc::new(NoopSink)
    };

    // Start server
    let service = Arc::new(AuthzService::from_config(&config, auth, sink));
    let server = AuthzServer::bind(&config.server.address, service).await?;
    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    if let Some(mut server) = metrics_server {
        server.shutdown().await;
    }

    Ok(())
}
