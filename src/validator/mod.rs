//! Token validators
//!
//! A validator decides whether one kind of credential on a request is valid
//! and, if so, which identity headers to inject. One instance is built per
//! enabled kind per request.

use crate::authz::AuthConfig;
use crate::check::HeaderValueOption;
use crate::request::RequestFacts;
use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::time::Instant;

pub mod oauth2;

pub use oauth2::{Claims, OAuth2Validator};

/// Configuration name of a validator variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidatorKind {
    /// Signed bearer token (JWT) checked against the configured key sources
    OAuth2,
    /// Reserved for oauth2-proxy session cookies; not implemented yet
    OAuthProxy,
}

impl ValidatorKind {
    pub const ALL: [ValidatorKind; 2] = [ValidatorKind::OAuthProxy, ValidatorKind::OAuth2];

    pub fn as_str(&self) -> &'static str {
        match self {
            ValidatorKind::OAuth2 => "oauth2",
            ValidatorKind::OAuthProxy => "oauthproxy",
        }
    }
}

impl fmt::Display for ValidatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValidatorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "oauth2" => Ok(ValidatorKind::OAuth2),
            "oauthproxy" => Ok(ValidatorKind::OAuthProxy),
            other => Err(format!("unknown validator kind: {}", other)),
        }
    }
}

/// Result of one validator on one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub identity_headers: Vec<HeaderValueOption>,
    /// Which validator (and key source) produced the outcome; diagnostics only
    pub source: String,
}

impl ValidationOutcome {
    pub fn valid(source: impl Into<String>, identity_headers: Vec<HeaderValueOption>) -> Self {
        Self {
            valid: true,
            identity_headers,
            source: source.into(),
        }
    }

    pub fn invalid(source: impl Into<String>) -> Self {
        Self {
            valid: false,
            identity_headers: Vec::new(),
            source: source.into(),
        }
    }
}

/// A credential validator
///
/// Implementations never panic on bad input and never return errors: every
/// parse or verification failure becomes an invalid outcome.
#[async_trait]
pub trait TokenValidator: Send + Sync {
    fn kind(&self) -> ValidatorKind;

    /// Cheap check for whether the request carries this kind of credential at all.
    ///
    /// A validator that returns `false` takes no part in the decision.
    fn should_attempt(&self) -> bool;

    /// Verify the credential, giving up at `deadline`
    async fn verify(&mut self, deadline: Instant) -> ValidationOutcome;

    /// Identity headers for the verified caller. Empty before a valid `verify`.
    fn identity(&self) -> Vec<HeaderValueOption>;
}

/// Placeholder for the oauth2-proxy session validator; always opts out
pub struct OAuthProxyValidator;

#[async_trait]
impl TokenValidator for OAuthProxyValidator {
    fn kind(&self) -> ValidatorKind {
        ValidatorKind::OAuthProxy
    }

    fn should_attempt(&self) -> bool {
        false
    }

    async fn verify(&mut self, _deadline: Instant) -> ValidationOutcome {
        ValidationOutcome::invalid(ValidatorKind::OAuthProxy.as_str())
    }

    fn identity(&self) -> Vec<HeaderValueOption> {
        Vec::new()
    }
}

/// Build one validator per enabled kind for a request.
///
/// Construction is synchronous and performs no I/O.
pub fn build_validators(
    facts: &Arc<RequestFacts>,
    config: &Arc<AuthConfig>,
) -> Vec<Box<dyn TokenValidator>> {
    config
        .enabled_validators
        .iter()
        .map(|kind| -> Box<dyn TokenValidator> {
            match kind {
                ValidatorKind::OAuth2 => {
                    Box::new(OAuth2Validator::new(facts.clone(), config.clone()))
                }
                ValidatorKind::OAuthProxy => Box::new(OAuthProxyValidator),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Scheme;

    #[test]
    fn test_kind_round_trip_names() {
        for kind in ValidatorKind::ALL {
            assert_eq!(kind.as_str().parse::<ValidatorKind>(), Ok(kind));
        }
        assert!("saml".parse::<ValidatorKind>().is_err());
    }

    #[test]
    fn test_build_respects_disabled_kinds() {
        let facts = Arc::new(RequestFacts::new(
            "h",
            "/",
            "GET",
            Scheme::Http,
            Vec::<(String, String)>::new(),
        ));

        let all = Arc::new(AuthConfig::new("https://idp.example"));
        let kinds: Vec<_> = build_validators(&facts, &all)
            .iter()
            .map(|v| v.kind())
            .collect();
        assert_eq!(kinds, vec![ValidatorKind::OAuthProxy, ValidatorKind::OAuth2]);

        let only_oauth2 =
            Arc::new(AuthConfig::new("https://idp.example").disable(ValidatorKind::OAuthProxy));
        let kinds: Vec<_> = build_validators(&facts, &only_oauth2)
            .iter()
            .map(|v| v.kind())
            .collect();
        assert_eq!(kinds, vec![ValidatorKind::OAuth2]);
    }

    #[tokio::test]
    async fn test_oauthproxy_opts_out() {
        let mut v = OAuthProxyValidator;
        assert!(!v.should_attempt());
        let deadline = Instant::now();
        assert!(!v.verify(deadline).await.valid);
        assert!(v.identity().is_empty());
    }
}
