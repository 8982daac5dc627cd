//! Edge Authz Library
//!
//! External authorization service for an edge proxy. Each forwarded request is
//! answered with either "allow, with identity headers" or "deny, with a login
//! redirect or an HTML challenge page".
//!
//! # Features
//!
//! - **Skip Routes**: Regex allow-list for public paths, checked first
//! - **Cookie or Bearer**: JWT taken from the auth cookie or the auth header
//! - **Multiple Key Sources**: Token checked against every JWKS server in parallel
//! - **Identity Headers**: Caller's email forwarded upstream on success
//! - **Metrics**: Per host/path/result decision counter for Prometheus
//!
//! # Example
//!
//! ```no_run
//! use edge_authz::authz::AuthConfig;
//! use edge_authz::metrics::NoopSink;
//! use edge_authz::server::AuthzServer;
//! use edge_authz::{AuthzService, Config};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let auth = Arc::new(AuthConfig::connect(&config.auth).await?);
//!     let service = AuthzService::from_config(&config, auth, Arc::new(NoopSink));
//!     let server = AuthzServer::bind(&config.server.address, Arc::new(service)).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod authz;
pub mod check;
pub mod config;
pub mod keys;
pub mod metrics;
pub mod race;
pub mod request;
pub mod responder;
pub mod server;
pub mod service;
pub mod skip;
pub mod validator;

// Re-export commonly used types
pub use authz::{AuthConfig, Authorizer, Decision};
pub use check::{CheckRequest, CheckResponse};
pub use config::Config;
pub use request::RequestFacts;
pub use service::AuthzService;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
