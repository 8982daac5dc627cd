//! JWKS (JSON Web Key Set) key source
//!
//! Fetches and caches public keys from a JWKS endpoint.
//!
//! A background task refreshes the cache every refresh interval, so token
//! verification only ever reads cached keys. A token naming a `kid` the cache
//! does not know triggers an extra refresh, at most once per rate-limit window.
//! A failed refresh keeps serving the previous keys.
//!
//! # Example
//!
//! ```no_run
//! use edge_authz::keys::{JwksKeySource, JwksOptions};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Fetch keys from endpoint
//! let source = JwksKeySource::new("https://idp.example/keys", JwksOptions::default()).await?;
//!
//! // Or parse from JSON directly
//! let json = r#"{"keys": []}"#;
//! let source = JwksKeySource::from_json("inline", json)?;
//! # Ok(())
//! # }
//! ```

use super::{KeySource, KeySourceError};
use async_trait::async_trait;
use jsonwebtoken::{DecodingKey, Header};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A single JSON Web Key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type (e.g., "RSA", "EC")
    pub kty: String,

    /// Key ID
    #[serde(default)]
    pub kid: Option<String>,

    /// Intended use ("sig" for signature)
    #[serde(default, rename = "use")]
    pub key_use: Option<String>,

    /// Algorithm (e.g., "RS256", "ES256")
    #[serde(default)]
    pub alg: Option<String>,

    // RSA parameters
    /// RSA modulus (base64url encoded)
    #[serde(default)]
    pub n: Option<String>,

    /// RSA exponent (base64url encoded)
    #[serde(default)]
    pub e: Option<String>,

    // EC parameters
    /// EC curve (e.g., "P-256")
    #[serde(default)]
    pub crv: Option<String>,

    /// EC x coordinate (base64url encoded)
    #[serde(default)]
    pub x: Option<String>,

    /// EC y coordinate (base64url encoded)
    #[serde(default)]
    pub y: Option<String>,
}

impl Jwk {
    /// Convert JWK to DecodingKey
    pub fn to_decoding_key(&self) -> Result<DecodingKey, KeySourceError> {
        match self.kty.as_str() {
            "RSA" => {
                let n = self
                    .n
                    .as_ref()
                    .ok_or_else(|| KeySourceError::InvalidKey("Missing RSA modulus (n)".into()))?;
                let e = self
                    .e
                    .as_ref()
                    .ok_or_else(|| KeySourceError::InvalidKey("Missing RSA exponent (e)".into()))?;

                DecodingKey::from_rsa_components(n, e)
                    .map_err(|e| KeySourceError::InvalidKey(format!("Invalid RSA key: {}", e)))
            }
            "EC" => {
                let x = self
                    .x
                    .as_ref()
                    .ok_or_else(|| KeySourceError::InvalidKey("Missing EC x coordinate".into()))?;
                let y = self
                    .y
                    .as_ref()
                    .ok_or_else(|| KeySourceError::InvalidKey("Missing EC y coordinate".into()))?;

                DecodingKey::from_ec_components(x, y)
                    .map_err(|e| KeySourceError::InvalidKey(format!("Invalid EC key: {}", e)))
            }
            other => Err(KeySourceError::InvalidKey(format!(
                "Unsupported key type: {}",
                other
            ))),
        }
    }
}

/// JSON Web Key Set
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

/// Refresh behaviour of a [`JwksKeySource`]
#[derive(Debug, Clone)]
pub struct JwksOptions {
    /// Maximum age of the cached key set
    pub refresh_interval: Duration,
    /// Minimum spacing between refreshes triggered by unknown key IDs
    pub refresh_rate_limit: Duration,
    /// Timeout for a single fetch
    pub refresh_timeout: Duration,
    /// Refresh when a token names a key ID that is not cached
    pub refresh_unknown_kid: bool,
    /// Skip TLS certificate verification when fetching
    pub insecure_skip_verify: bool,
}

impl Default for JwksOptions {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(3600),
            refresh_rate_limit: Duration::from_secs(300),
            refresh_timeout: Duration::from_secs(10),
            refresh_unknown_kid: true,
            insecure_skip_verify: false,
        }
    }
}

/// Cached JWKS with metadata
struct CachedJwks {
    jwks: Jwks,
    /// When the fetch that produced `jwks` started
    fetched_at: Instant,
    /// Last unknown-kid refresh, for rate limiting
    last_forced_refresh: Option<Instant>,
}

/// State shared between the key source and its background refresher
struct JwksState {
    /// JWKS endpoint URL (if fetching remotely)
    endpoint: Option<String>,

    /// Cached keys
    cache: RwLock<CachedJwks>,

    options: JwksOptions,

    /// HTTP client for fetching keys
    client: reqwest::Client,
}

/// JWKS-backed key source
pub struct JwksKeySource {
    name: String,
    state: Arc<JwksState>,
    /// Interval refresher, aborted on drop
    refresher: Option<JoinHandle<()>>,
}

impl JwksKeySource {
    /// Create a key source by fetching keys from an endpoint.
    ///
    /// Spawns a task that refreshes the keys every `refresh_interval`.
    pub async fn new(endpoint: &str, options: JwksOptions) -> Result<Self, KeySourceError> {
        let client = Self::build_client(&options)?;
        let started = Instant::now();
        let jwks = JwksState::fetch_jwks(&client, endpoint).await?;
        info!(endpoint, keys = jwks.keys.len(), "loaded JWKS");

        let state = Arc::new(JwksState {
            endpoint: Some(endpoint.to_string()),
            cache: RwLock::new(CachedJwks {
                jwks,
                fetched_at: started,
                last_forced_refresh: None,
            }),
            options,
            client,
        });
        let refresher = tokio::spawn(run_refresher(
            Arc::downgrade(&state),
            endpoint.to_string(),
        ));

        Ok(Self {
            name: endpoint.to_string(),
            state,
            refresher: Some(refresher),
        })
    }

    /// Create a key source from a JSON string; it never refreshes
    pub fn from_json(name: impl Into<String>, json: &str) -> Result<Self, KeySourceError> {
        let jwks: Jwks =
            serde_json::from_str(json).map_err(|e| KeySourceError::InvalidKey(e.to_string()))?;
        let options = JwksOptions::default();

        Ok(Self {
            name: name.into(),
            state: Arc::new(JwksState {
                endpoint: None,
                cache: RwLock::new(CachedJwks {
                    jwks,
                    fetched_at: Instant::now(),
                    last_forced_refresh: None,
                }),
                client: Self::build_client(&options)?,
                options,
            }),
            refresher: None,
        })
    }

    fn build_client(options: &JwksOptions) -> Result<reqwest::Client, KeySourceError> {
        reqwest::Client::builder()
            .timeout(options.refresh_timeout)
            .danger_accept_invalid_certs(options.insecure_skip_verify)
            .build()
            .map_err(|e| KeySourceError::FetchError(e.to_string()))
    }

    /// Number of cached keys
    pub async fn key_count(&self) -> usize {
        self.state.cache.read().await.jwks.keys.len()
    }

    /// Find a key by its key ID (kid)
    pub async fn find_key(&self, kid: &str) -> Option<Jwk> {
        self.state.find_key(kid).await
    }

    async fn first_key(&self) -> Option<Jwk> {
        self.state.cache.read().await.jwks.keys.first().cloned()
    }

    /// Refresh for an unknown key ID, at most once per rate-limit window.
    ///
    /// The fetch runs in its own task, so a caller that gives up early does not
    /// cancel it.
    async fn refresh_for_unknown_kid(&self) -> bool {
        let Some(endpoint) = self.state.endpoint.clone() else {
            return false;
        };
        if !self.state.options.refresh_unknown_kid {
            return false;
        }

        {
            let mut cache = self.state.cache.write().await;
            let limited = cache
                .last_forced_refresh
                .is_some_and(|at| at.elapsed() < self.state.options.refresh_rate_limit);
            if limited {
                return false;
            }
            cache.last_forced_refresh = Some(Instant::now());
        }

        let state = Arc::clone(&self.state);
        let refresh = tokio::spawn(async move { state.refresh(&endpoint).await });
        matches!(refresh.await, Ok(true))
    }
}

impl Drop for JwksKeySource {
    fn drop(&mut self) {
        if let Some(refresher) = self.refresher.take() {
            refresher.abort();
        }
    }
}

impl JwksState {
    /// Fetch JWKS from endpoint
    async fn fetch_jwks(client: &reqwest::Client, endpoint: &str) -> Result<Jwks, KeySourceError> {
        let response = client
            .get(endpoint)
            .send()
            .await
            .map_err(|e| KeySourceError::FetchError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(KeySourceError::FetchError(format!(
                "HTTP {}: {}",
                response.status(),
                response.status().canonical_reason().unwrap_or("Unknown")
            )));
        }

        response
            .json()
            .await
            .map_err(|e| KeySourceError::FetchError(e.to_string()))
    }

    async fn find_key(&self, kid: &str) -> Option<Jwk> {
        let cache = self.cache.read().await;
        cache
            .jwks
            .keys
            .iter()
            .find(|k| k.kid.as_deref() == Some(kid))
            .cloned()
    }

    /// Fetch a fresh key set and install it unless a newer one landed first.
    ///
    /// Returns `false` when the fetch failed and the cached keys were kept.
    async fn refresh(&self, endpoint: &str) -> bool {
        let started = Instant::now();
        match Self::fetch_jwks(&self.client, endpoint).await {
            Ok(jwks) => {
                let mut cache = self.cache.write().await;
                if started > cache.fetched_at {
                    debug!(endpoint, keys = jwks.keys.len(), "refreshed JWKS");
                    cache.jwks = jwks;
                    cache.fetched_at = started;
                }
                true
            }
            Err(e) => {
                warn!(endpoint, error = %e, "JWKS refresh failed, keeping cached keys");
                false
            }
        }
    }
}

/// Refresh the cache once it is older than the refresh interval.
///
/// After a failed fetch the next attempt waits for the shorter of the refresh
/// interval and the refresh rate limit. The task holds a weak handle and ends
/// once the key source is gone.
async fn run_refresher(state: Weak<JwksState>, endpoint: String) {
    let mut retry_at: Option<Instant> = None;

    loop {
        let due = {
            let Some(state) = state.upgrade() else {
                return;
            };
            let fetched_at = state.cache.read().await.fetched_at;
            fetched_at + state.options.refresh_interval
        };
        let next = retry_at.map_or(due, |at| at.max(due));
        tokio::time::sleep_until(tokio::time::Instant::from_std(next)).await;

        let Some(state) = state.upgrade() else {
            return;
        };

        // an unknown-kid refresh may have landed while sleeping
        let stale = state.cache.read().await.fetched_at.elapsed() >= state.options.refresh_interval;
        if !stale {
            retry_at = None;
            continue;
        }

        retry_at = if state.refresh(&endpoint).await {
            None
        } else {
            let options = &state.options;
            Some(Instant::now() + options.refresh_interval.min(options.refresh_rate_limit))
        };
    }
}

#[async_trait]
impl KeySource for JwksKeySource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn resolve(&self, header: &Header) -> Result<DecodingKey, KeySourceError> {
        let jwk = match &header.kid {
            Some(kid) => match self.find_key(kid).await {
                Some(jwk) => jwk,
                None => {
                    if !self.refresh_for_unknown_kid().await {
                        return Err(KeySourceError::KeyNotFound(kid.clone()));
                    }
                    self.find_key(kid)
                        .await
                        .ok_or_else(|| KeySourceError::KeyNotFound(kid.clone()))?
                }
            },
            // No kid in token, use first key
            None => self.first_key().await.ok_or(KeySourceError::NoKeys)?,
        };

        jwk.to_decoding_key()
    }
}
