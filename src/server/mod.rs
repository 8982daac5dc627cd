//! HTTP authorization server
//!
//! Serves the external-authorization check over plain HTTP: the proxy forwards
//! each request's metadata (method, path, headers) to this server and acts on
//! the reply.
//!
//! - `200 OK` allows the request; identity headers on the reply are meant to
//!   replace the same headers on the upstream request.
//! - Any other status denies it, and the reply (status, headers, body) goes
//!   back to the client as-is.
//!
//! # Example
//!
//! ```no_run
//! use edge_authz::authz::{AuthConfig, Authorizer};
//! use edge_authz::metrics::NoopSink;
//! use edge_authz::responder::DecisionResponder;
//! use edge_authz::server::AuthzServer;
//! use edge_authz::service::AuthzService;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let authorizer = Authorizer::new(
//!     Arc::new(AuthConfig::new("https://idp.example")),
//!     Arc::new(NoopSink),
//! );
//! let service = AuthzService::new(
//!     authorizer,
//!     DecisionResponder::new("https://idp.example/login", ""),
//! );
//! let server = AuthzServer::bind("127.0.0.1:0", Arc::new(service)).await?;
//! server.run().await?;
//! # Ok(())
//! # }
//! ```

use crate::check::{CheckResponse, HeaderValueOption, HttpResponse};
use crate::request::{RequestFacts, Scheme};
use crate::service::AuthzService;
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{HeaderName, HeaderValue, COOKIE, HOST};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{HeaderMap, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Header the proxy uses to report the client-facing scheme
const FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind to address: {0}")]
    BindError(String),

    #[error("Server error: {0}")]
    RuntimeError(String),
}

/// HTTP authorization server
pub struct AuthzServer {
    service: Arc<AuthzService>,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl AuthzServer {
    /// Bind to `address`. Port 0 lets the OS pick a port.
    pub async fn bind(address: &str, service: Arc<AuthzService>) -> Result<Self, ServerError> {
        let addr: SocketAddr = address
            .parse()
            .map_err(|e| ServerError::BindError(format!("Invalid address: {}", e)))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindError(format!("Failed to bind to {}: {}", addr, e)))?;

        // Get actual bound address (important for port 0)
        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::BindError(format!("Failed to get local address: {}", e)))?;

        info!("Authorization server bound to {}", local_addr);

        Ok(Self {
            service,
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections forever
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(std::future::pending()).await
    }

    /// Accept connections until `shutdown` completes
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            let (stream, peer_addr) = tokio::select! {
                _ = &mut shutdown => {
                    info!("Authorization server shutting down");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        continue;
                    }
                },
            };

            let service = Arc::clone(&self.service);

            tokio::spawn(async move {
                let io = TokioIo::new(stream);

                let service = service_fn(move |req| {
                    let service = Arc::clone(&service);
                    async move { handle_request(req, service).await }
                });

                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    debug!("Error serving connection from {}: {}", peer_addr, e);
                }
            });
        }
    }
}

/// Build request facts from the forwarded request.
///
/// Repeated `cookie` lines are joined with `"; "`; for any other repeated
/// header the last value wins.
fn request_facts<B>(req: &Request<B>) -> RequestFacts {
    let mut cookies: Vec<&str> = Vec::new();
    let mut headers: Vec<(&str, String)> = Vec::new();
    for (name, value) in req.headers() {
        let Ok(value) = value.to_str() else {
            continue;
        };
        if *name == COOKIE {
            cookies.push(value);
        } else {
            headers.push((name.as_str(), value.to_string()));
        }
    }
    if !cookies.is_empty() {
        headers.push(("cookie", cookies.join("; ")));
    }

    let host = req
        .headers()
        .get(HOST)
        .and_then(|h| h.to_str().ok())
        .map(String::from)
        .or_else(|| req.uri().authority().map(|a| a.to_string()))
        .unwrap_or_default();

    let path = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    let scheme = req
        .headers()
        .get(FORWARDED_PROTO)
        .and_then(|h| h.to_str().ok())
        .map(Scheme::parse)
        .unwrap_or_default();

    RequestFacts::new(host, path, req.method().as_str(), scheme, headers)
}

async fn handle_request(
    req: Request<Incoming>,
    service: Arc<AuthzService>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let facts = request_facts(&req);
    let check = service.check_facts(facts).await;
    Ok(into_http_response(check))
}

/// Render a check response as the HTTP reply to the proxy
pub fn into_http_response(check: CheckResponse) -> Response<Full<Bytes>> {
    let (status, headers, body) = match check.http_response {
        HttpResponse::Ok(ok) => (StatusCode::OK, ok.headers, String::new()),
        HttpResponse::Denied(denied) => (
            StatusCode::from_u16(denied.status).unwrap_or(StatusCode::FORBIDDEN),
            denied.headers,
            denied.body,
        ),
    };

    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    apply_headers(response.headers_mut(), headers);
    response
}

fn apply_headers(map: &mut HeaderMap, headers: Vec<HeaderValueOption>) {
    for header in headers {
        let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(header.key.as_bytes()),
            HeaderValue::from_str(&header.value),
        ) else {
            warn!(header = %header.key, "dropping header that is not valid HTTP");
            continue;
        };

        if header.append {
            map.append(name, value);
        } else {
            map.insert(name, value);
        }
    }
}
