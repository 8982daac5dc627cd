//! Prometheus Metrics HTTP Server
//!
//! Provides an HTTP endpoint for Prometheus to scrape metrics.
//!
//! # Example
//!
//! ```no_run
//! use edge_authz::metrics::PrometheusSink;
//! use edge_authz::metrics::server::{MetricsServer, MetricsServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let sink = PrometheusSink::new()?;
//!     let config = MetricsServerConfig {
//!         address: "127.0.0.1:2113".to_string(),
//!     };
//!     let mut server = MetricsServer::new(config, sink.registry().clone());
//!     let addr = server.start().await?;
//!     println!("Metrics server listening on {}", addr);
//!     Ok(())
//! }
//! ```

use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{Encoder, Registry, TextEncoder};
use std::convert::Infallible;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::warn;

/// Configuration for the metrics server
#[derive(Debug, Clone)]
pub struct MetricsServerConfig {
    /// Address to bind to (e.g., "127.0.0.1:2113")
    pub address: String,
}

/// Builder for MetricsServer
#[derive(Default)]
pub struct MetricsServerBuilder {
    address: Option<String>,
    registry: Option<Registry>,
}

impl MetricsServerBuilder {
    /// Set the server address
    pub fn address(mut self, address: &str) -> Self {
        self.address = Some(address.to_string());
        self
    }

    /// Set the registry to expose
    pub fn registry(mut self, registry: Registry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Build the MetricsServer
    pub fn build(self) -> Result<MetricsServer, MetricsServerError> {
        let address = self
            .address
            .ok_or_else(|| MetricsServerError::ConfigError("Address is required".into()))?;
        let registry = self
            .registry
            .ok_or_else(|| MetricsServerError::ConfigError("Registry is required".into()))?;

        Ok(MetricsServer::new(MetricsServerConfig { address }, registry))
    }
}

/// Metrics server error
#[derive(Debug, thiserror::Error)]
pub enum MetricsServerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Prometheus metrics HTTP server
pub struct MetricsServer {
    config: MetricsServerConfig,
    registry: Registry,
    shutdown_tx: Option<oneshot::Sender<()>>,
    server_handle: Option<tokio::task::JoinHandle<()>>,
}

impl MetricsServer {
    /// Create a new metrics server
    pub fn new(config: MetricsServerConfig, registry: Registry) -> Self {
        Self {
            config,
            registry,
            shutdown_tx: None,
            server_handle: None,
        }
    }

    /// Create a builder for MetricsServer
    pub fn builder() -> MetricsServerBuilder {
        MetricsServerBuilder::default()
    }

    /// Start the metrics server
    ///
    /// Returns the actual bound address (useful when using port 0)
    pub async fn start(&mut self) -> Result<SocketAddr, MetricsServerError> {
        let listener = TcpListener::bind(&self.config.address).await?;
        let addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        self.shutdown_tx = Some(shutdown_tx);

        let registry = self.registry.clone();
        let handle = tokio::spawn(async move {
            run_server(listener, registry, shutdown_rx).await;
        });

        self.server_handle = Some(handle);

        Ok(addr)
    }

    /// Shutdown the metrics server
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.server_handle.take() {
            let _ = handle.await;
        }
    }
}

/// Run the HTTP server loop
async fn run_server(
    listener: TcpListener,
    registry: Registry,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                break;
            }
            result = listener.accept() => {
                match result {
                    Ok((stream, _)) => {
                        let io = TokioIo::new(stream);
                        let registry = registry.clone();
                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let registry = registry.clone();
                                async move { handle_request(req, &registry) }
                            });
                            let _ = http1::Builder::new().serve_connection(io, service).await;
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "metrics server accept failed");
                        continue;
                    }
                }
            }
        }
    }
}

/// Handle HTTP requests
fn handle_request(
    req: Request<hyper::body::Incoming>,
    registry: &Registry,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => metrics_handler(registry),
        (&Method::GET, "/health") => health_handler(),
        _ => not_found_handler(),
    };
    Ok(response)
}

/// Handle /metrics endpoint
fn metrics_handler(registry: &Registry) -> Response<Full<Bytes>> {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = Vec::new();

    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return plain_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics");
    }

    let mut response = Response::new(Full::new(Bytes::from(buffer)));
    if let Ok(content_type) = HeaderValue::from_str(encoder.format_type()) {
        response.headers_mut().insert(CONTENT_TYPE, content_type);
    }
    response
}

/// Handle /health endpoint
fn health_handler() -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(r#"{"status":"ok"}"#)));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// Handle unknown endpoints
fn not_found_handler() -> Response<Full<Bytes>> {
    plain_response(StatusCode::NOT_FOUND, "Not Found")
}

fn plain_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
}
