//! OAuth2 bearer-token validator
//!
//! The token comes from the auth cookie when present, otherwise from the auth
//! header (`Bearer <token>`). It is verified against every configured key
//! source in parallel; the first source that accepts it wins, and the token is
//! rejected only once every source has rejected it.
//!
//! A source accepts a token when, in order:
//! 1. it resolves a signing key for the token,
//! 2. the signature verifies (and `exp`, when present, has not passed),
//! 3. the header `alg` is exactly the configured algorithm,
//! 4. the `iss` claim is exactly the configured issuer,
//! 5. every configured required claim is present.

use super::{TokenValidator, ValidationOutcome, ValidatorKind};
use crate::authz::AuthConfig;
use crate::check::HeaderValueOption;
use crate::keys::{KeySource, KeySourceError};
use crate::race;
use crate::request::RequestFacts;
use async_trait::async_trait;
use jsonwebtoken::{decode, decode_header, Algorithm, Header, Validation};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, Instrument, Span};

/// Claims of a verified token
pub type Claims = HashMap<String, Value>;

/// Prefix stripped from the auth header value
pub const BEARER_PREFIX: &str = "Bearer";

const ISSUER_CLAIM: &str = "iss";
const EMAIL_CLAIM: &str = "email";
const EMAILS_CLAIM: &str = "emails";

/// Where the token was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenOrigin {
    Cookie,
    Header,
}

/// Why a key source rejected a token
#[derive(Error, Debug)]
pub enum Rejection {
    #[error("key resolution failed: {0}")]
    Key(#[from] KeySourceError),

    #[error("token verification failed: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error("token algorithm {got:?} is not the expected {want:?}")]
    Algorithm { want: Algorithm, got: Algorithm },

    #[error("issuer claim {got:?} is not the expected {want:?}")]
    Issuer { want: String, got: Option<String> },

    #[error("required claim '{0}' is missing")]
    MissingClaim(String),
}

/// OAuth2 bearer-token validator
pub struct OAuth2Validator {
    config: Arc<AuthConfig>,
    token: Option<(String, TokenOrigin)>,
    claims: Option<Claims>,
}

impl OAuth2Validator {
    /// Create a validator for one request
    pub fn new(facts: Arc<RequestFacts>, config: Arc<AuthConfig>) -> Self {
        let token = extract_token(&facts, &config);
        Self {
            config,
            token,
            claims: None,
        }
    }

    pub fn token_origin(&self) -> Option<TokenOrigin> {
        self.token.as_ref().map(|(_, origin)| *origin)
    }

    /// Claims of the accepted token, after a valid `verify`
    pub fn claims(&self) -> Option<&Claims> {
        self.claims.as_ref()
    }
}

/// Extract the raw token, preferring the cookie over the header
fn extract_token(facts: &RequestFacts, config: &AuthConfig) -> Option<(String, TokenOrigin)> {
    if let Some(pair) = facts.cookie_pair(&config.cookie_name) {
        let token = match pair.split_once('=') {
            Some((_, value)) => value.trim().to_string(),
            None => {
                info!(cookie = %config.cookie_name, "malformed auth cookie");
                String::new()
            }
        };
        return Some((token, TokenOrigin::Cookie));
    }

    facts.header(&config.auth_header).map(|value| {
        let value = value.trim();
        let token = value.strip_prefix(BEARER_PREFIX).unwrap_or(value).trim();
        (token.to_string(), TokenOrigin::Header)
    })
}

/// Verify `token` against a single key source and enforce the claim policy
async fn verify_with_source(
    source: &dyn KeySource,
    token: &str,
    header: &Header,
    config: &AuthConfig,
) -> Result<Claims, Rejection> {
    let key = source.resolve(header).await?;

    let mut validation = Validation::new(header.alg);
    validation.validate_aud = false;
    validation.required_spec_claims.clear();
    let claims = decode::<Claims>(token, &key, &validation)?.claims;

    if header.alg != config.algorithm {
        return Err(Rejection::Algorithm {
            want: config.algorithm,
            got: header.alg,
        });
    }

    let issuer = claims.get(ISSUER_CLAIM).and_then(Value::as_str);
    if issuer != Some(config.issuer.as_str()) {
        return Err(Rejection::Issuer {
            want: config.issuer.clone(),
            got: issuer.map(String::from),
        });
    }

    for name in &config.claims_to_validate {
        if claims.get(name).map_or(true, Value::is_null) {
            return Err(Rejection::MissingClaim(name.clone()));
        }
    }

    Ok(claims)
}

/// Email of the caller: `email`, else the first of `emails`
pub fn email_from_claims(claims: &Claims) -> Option<&str> {
    if let Some(email) = claims.get(EMAIL_CLAIM).and_then(Value::as_str) {
        return Some(email);
    }
    claims
        .get(EMAILS_CLAIM)
        .and_then(Value::as_array)
        .and_then(|emails| emails.first())
        .and_then(Value::as_str)
}

#[async_trait]
impl TokenValidator for OAuth2Validator {
    fn kind(&self) -> ValidatorKind {
        ValidatorKind::OAuth2
    }

    fn should_attempt(&self) -> bool {
        self.token.is_some()
    }

    async fn verify(&mut self, deadline: Instant) -> ValidationOutcome {
        let kind = ValidatorKind::OAuth2.as_str();
        let Some((token, origin)) = self.token.clone() else {
            debug!("no OAuth2 credential on request");
            return ValidationOutcome::invalid(kind);
        };

        let header = match decode_header(&token) {
            Ok(header) => header,
            Err(e) => {
                info!(?origin, error = %e, "failed to parse the JWT");
                return ValidationOutcome::invalid(kind);
            }
        };

        let attempts: Vec<_> = self
            .config
            .key_sources
            .iter()
            .map(|source| {
                let source = Arc::clone(source);
                let config = Arc::clone(&self.config);
                let token = token.clone();
                let header = header.clone();
                async move {
                    match verify_with_source(source.as_ref(), &token, &header, &config).await {
                        Ok(claims) => Some((source.name().to_string(), claims)),
                        Err(e) => {
                            info!(source = source.name(), error = %e, "token rejected");
                            None
                        }
                    }
                }
                .instrument(Span::current())
            })
            .collect();

        match race::first_success(attempts, deadline).await {
            Some((source, claims)) => {
                debug!(?origin, source = %source, "token accepted");
                self.claims = Some(claims);
                ValidationOutcome::valid(format!("{}:{}", kind, source), self.identity())
            }
            None => ValidationOutcome::invalid(kind),
        }
    }

    fn identity(&self) -> Vec<HeaderValueOption> {
        let Some(claims) = &self.claims else {
            return Vec::new();
        };

        let email = match email_from_claims(claims) {
            Some(email) => email,
            None => {
                info!("token doesn't contain email claim");
                ""
            }
        };

        vec![HeaderValueOption::set(
            self.config.identity_header.clone(),
            email,
        )]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Scheme;
    use serde_json::json;

    fn facts(headers: &[(&str, &str)]) -> Arc<RequestFacts> {
        Arc::new(RequestFacts::new(
            "app.example",
            "/",
            "GET",
            Scheme::Https,
            headers.iter().map(|(k, v)| (*k, v.to_string())),
        ))
    }

    fn config() -> Arc<AuthConfig> {
        Arc::new(AuthConfig::new("https://idp.example"))
    }

    fn claims(value: Value) -> Claims {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_cookie_takes_precedence() {
        let v = OAuth2Validator::new(
            facts(&[
                ("cookie", "a=b; _auth=cookie.token.value"),
                ("authorization", "Bearer header.token.value"),
            ]),
            config(),
        );
        assert!(v.should_attempt());
        assert_eq!(v.token_origin(), Some(TokenOrigin::Cookie));
        assert_eq!(v.token.as_ref().unwrap().0, "cookie.token.value");
    }

    #[test]
    fn test_cookie_split_on_first_equals() {
        let v = OAuth2Validator::new(facts(&[("cookie", "_auth=abc==")]), config());
        assert_eq!(v.token.as_ref().unwrap().0, "abc==");
    }

    #[test]
    fn test_header_bearer_prefix_stripped() {
        let v = OAuth2Validator::new(facts(&[("Authorization", "  Bearer  xyz  ")]), config());
        assert_eq!(v.token_origin(), Some(TokenOrigin::Header));
        assert_eq!(v.token.as_ref().unwrap().0, "xyz");

        // prefix match is case-sensitive
        let v = OAuth2Validator::new(facts(&[("authorization", "bearer xyz")]), config());
        assert_eq!(v.token.as_ref().unwrap().0, "bearer xyz");
    }

    #[test]
    fn test_no_credential_opts_out() {
        let v = OAuth2Validator::new(facts(&[("cookie", "theme=dark")]), config());
        assert!(!v.should_attempt());
        assert!(v.identity().is_empty());
    }

    #[tokio::test]
    async fn test_garbage_token_is_invalid() {
        let mut v = OAuth2Validator::new(facts(&[("authorization", "Bearer badtoken")]), config());
        let outcome = v.verify(Instant::now() + std::time::Duration::from_secs(1)).await;
        assert!(!outcome.valid);
        assert!(outcome.identity_headers.is_empty());
    }

    #[test]
    fn test_email_claim_preferred() {
        let c = claims(json!({"email": "a@b.com", "emails": ["x@y.com"]}));
        assert_eq!(email_from_claims(&c), Some("a@b.com"));
    }

    #[test]
    fn test_emails_claim_first_element() {
        let c = claims(json!({"emails": ["first@b.com", "second@b.com"]}));
        assert_eq!(email_from_claims(&c), Some("first@b.com"));
    }

    #[test]
    fn test_no_email_claims() {
        assert_eq!(email_from_claims(&claims(json!({"sub": "u1"}))), None);
        assert_eq!(email_from_claims(&claims(json!({"emails": []}))), None);
    }

    #[test]
    fn test_identity_header_empty_email_uses_set_semantics() {
        let mut v = OAuth2Validator::new(facts(&[]), config());
        v.claims = Some(claims(json!({"iss": "https://idp.example"})));
        assert_eq!(
            v.identity(),
            vec![HeaderValueOption::set("X-Forwarded-Email", "")]
        );
    }
}
