//! Key sources
//!
//! A key source resolves the signing key for a token. Each configured source
//! is an independent verification oracle: it may be slow, stale, or failing,
//! and the validator races all of them.

use async_trait::async_trait;
use jsonwebtoken::{DecodingKey, Header};
use thiserror::Error;

pub mod jwks;

pub use jwks::{Jwk, Jwks, JwksKeySource, JwksOptions};

/// Key source errors
#[derive(Error, Debug)]
pub enum KeySourceError {
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("No keys available")]
    NoKeys,

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("JWKS fetch error: {0}")]
    FetchError(String),
}

/// Resolves signing keys for tokens
#[async_trait]
pub trait KeySource: Send + Sync {
    /// Human-readable name used in logs
    fn name(&self) -> &str;

    /// Resolve the key that should verify a token with this header
    async fn resolve(&self, header: &Header) -> Result<DecodingKey, KeySourceError>;
}

/// A key source backed by a single fixed key
pub struct StaticKeySource {
    name: String,
    key: DecodingKey,
}

impl StaticKeySource {
    pub fn new(name: impl Into<String>, key: DecodingKey) -> Self {
        Self {
            name: name.into(),
            key,
        }
    }

    /// Build from an RSA public key in PEM format
    pub fn from_rsa_pem(name: impl Into<String>, pem: &str) -> Result<Self, KeySourceError> {
        let key = DecodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|e| KeySourceError::InvalidKey(e.to_string()))?;
        Ok(Self::new(name, key))
    }
}

#[async_trait]
impl KeySource for StaticKeySource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn resolve(&self, _header: &Header) -> Result<DecodingKey, KeySourceError> {
        Ok(self.key.clone())
    }
}
