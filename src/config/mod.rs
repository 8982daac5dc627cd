//! Configuration module for edge-authz
//!
//! Handles loading and parsing of YAML configuration files with support for
//! environment variable expansion and validation. The configuration is read
//! once at startup and never changes afterwards.

use crate::validator::ValidatorKind;
use jsonwebtoken::Algorithm;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

// ============================================================================
// Validation Helpers
// ============================================================================

/// Validate that a URL starts with http:// or https://
fn is_valid_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    pub auth: AuthSection,
    #[serde(default)]
    pub deny: DenyConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let auth = &self.auth;

        if auth.issuer.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "auth.issuer must be set".into(),
            ));
        }

        auth.algorithm()?;

        for name in &auth.disabled_validators {
            if ValidatorKind::from_str(name).is_err() {
                return Err(ConfigError::ValidationError(format!(
                    "Unknown validator kind '{}': must be one of {}",
                    name,
                    ValidatorKind::ALL
                        .iter()
                        .map(|k| k.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                )));
            }
        }

        for url in &auth.jwks_servers {
            if !is_valid_http_url(url) {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid JWKS server '{}': must start with http:// or https://",
                    url
                )));
            }
        }

        if auth.verify_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "auth.verify_timeout_ms must be greater than zero".into(),
            ));
        }

        if self.deny.mode == DenyMode::Redirect && !is_valid_http_url(&self.deny.redirect_url) {
            return Err(ConfigError::ValidationError(
                "deny.redirect_url must be an http(s) URL when deny.mode is 'redirect'".into(),
            ));
        }

        Ok(())
    }
}

/// Listener for the HTTP authorization adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_address")]
    pub address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_server_address(),
        }
    }
}

fn default_server_address() -> String {
    "0.0.0.0:50052".to_string()
}

/// Authentication settings as written in the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSection {
    /// Cookie carrying the token
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,

    /// Header carrying the token (as `Bearer <token>`)
    #[serde(default = "default_auth_header")]
    pub auth_header: String,

    /// Header set on allowed requests with the caller's email
    #[serde(default = "default_identity_header")]
    pub identity_header: String,

    /// Expected `iss` claim
    pub issuer: String,

    /// Expected token signing algorithm. Default: RS256
    #[serde(default = "default_algorithm")]
    pub algorithm: String,

    /// Claims that must be present in every accepted token
    #[serde(default)]
    pub claims_to_validate: Vec<String>,

    /// Validator kinds to turn off (e.g. "oauthproxy")
    #[serde(default)]
    pub disabled_validators: Vec<String>,

    /// Path patterns that bypass authentication
    #[serde(default)]
    pub skip_routes: Vec<String>,

    /// Allow CORS preflight (OPTIONS) requests without credentials
    #[serde(default = "default_skip_preflight")]
    pub skip_preflight: bool,

    /// JWKS endpoints trusted to sign tokens
    #[serde(default)]
    pub jwks_servers: Vec<String>,

    /// Skip TLS verification when fetching JWKS
    #[serde(default)]
    pub insecure_skip_verify: bool,

    /// Per-request verification deadline in milliseconds. Default: 5000
    #[serde(default = "default_verify_timeout_ms")]
    pub verify_timeout_ms: u64,

    #[serde(default)]
    pub jwks: JwksRefreshConfig,
}

impl AuthSection {
    /// The expected algorithm, parsed
    pub fn algorithm(&self) -> Result<Algorithm, ConfigError> {
        Algorithm::from_str(&self.algorithm).map_err(|_| {
            ConfigError::ValidationError(format!(
                "Unsupported token algorithm '{}'",
                self.algorithm
            ))
        })
    }
}

fn default_cookie_name() -> String {
    "_auth".to_string()
}

fn default_auth_header() -> String {
    "authorization".to_string()
}

fn default_identity_header() -> String {
    "X-Forwarded-Email".to_string()
}

fn default_algorithm() -> String {
    "RS256".to_string()
}

fn default_skip_preflight() -> bool {
    true
}

fn default_verify_timeout_ms() -> u64 {
    5000
}

/// JWKS cache refresh settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwksRefreshConfig {
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_refresh_rate_limit")]
    pub refresh_rate_limit_secs: u64,
    #[serde(default = "default_refresh_timeout")]
    pub refresh_timeout_secs: u64,
    #[serde(default = "default_refresh_unknown_kid")]
    pub refresh_unknown_kid: bool,
}

impl Default for JwksRefreshConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval(),
            refresh_rate_limit_secs: default_refresh_rate_limit(),
            refresh_timeout_secs: default_refresh_timeout(),
            refresh_unknown_kid: default_refresh_unknown_kid(),
        }
    }
}

fn default_refresh_interval() -> u64 {
    3600 // 1 hour
}

fn default_refresh_rate_limit() -> u64 {
    300 // 5 minutes
}

fn default_refresh_timeout() -> u64 {
    10
}

fn default_refresh_unknown_kid() -> bool {
    true
}

/// How denied requests are answered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DenyMode {
    /// 302 to the login page
    #[default]
    Redirect,
    /// 403 with an HTML challenge page
    Html,
}

/// Deny response configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenyConfig {
    #[serde(default)]
    pub mode: DenyMode,
    #[serde(default)]
    pub redirect_url: String,
    #[serde(default = "default_html_body")]
    pub html_body: String,
}

impl Default for DenyConfig {
    fn default() -> Self {
        Self {
            mode: DenyMode::default(),
            redirect_url: String::new(),
            html_body: default_html_body(),
        }
    }
}

fn default_html_body() -> String {
    "<!DOCTYPE html><html><head><title>Sign in required</title></head>\
     <body><h1>Sign in required</h1><p>You must sign in to access this page.</p></body></html>"
        .to_string()
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            address: default_metrics_address(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_address() -> String {
    "0.0.0.0:2113".to_string()
}
