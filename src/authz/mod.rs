//! Authorization decisions
//!
//! [`Authorizer::decide`] is the per-request orchestrator:
//!
//! 1. skip routes (and, optionally, CORS preflight) are allowed outright;
//! 2. one validator per enabled kind is built for the request;
//! 3. the validators that find a credential race each other, the first valid
//!    one wins and the request is denied only once all of them have failed;
//! 4. one metrics event is recorded for the decision.

use crate::config::{AuthSection, ConfigError, DenyMode};
use crate::check::HeaderValueOption;
use crate::keys::{JwksKeySource, JwksOptions, KeySource};
use crate::metrics::MetricsSink;
use crate::race;
use crate::request::RequestFacts;
use crate::skip::RouteSkipMatcher;
use crate::validator::{self, ValidationOutcome, ValidatorKind};
use jsonwebtoken::Algorithm;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument, Span};

/// Authentication policy, fixed for the life of the process
pub struct AuthConfig {
    pub cookie_name: String,
    /// Lowercased header name carrying the bearer token
    pub auth_header: String,
    pub identity_header: String,
    pub issuer: String,
    pub algorithm: Algorithm,
    pub claims_to_validate: Vec<String>,
    pub enabled_validators: Vec<ValidatorKind>,
    pub skip_routes: RouteSkipMatcher,
    pub skip_preflight: bool,
    pub key_sources: Vec<Arc<dyn KeySource>>,
    pub verify_timeout: Duration,
}

impl AuthConfig {
    /// Policy with default names, every validator kind enabled and no key sources
    pub fn new(issuer: &str) -> Self {
        Self {
            cookie_name: "_auth".to_string(),
            auth_header: "authorization".to_string(),
            identity_header: "X-Forwarded-Email".to_string(),
            issuer: issuer.to_string(),
            algorithm: Algorithm::RS256,
            claims_to_validate: Vec::new(),
            enabled_validators: ValidatorKind::ALL.to_vec(),
            skip_routes: RouteSkipMatcher::default(),
            skip_preflight: true,
            key_sources: Vec::new(),
            verify_timeout: Duration::from_secs(5),
        }
    }

    /// Build the policy from the config file section and ready key sources
    pub fn from_section(
        section: &AuthSection,
        key_sources: Vec<Arc<dyn KeySource>>,
    ) -> Result<Self, ConfigError> {
        let enabled_validators = ValidatorKind::ALL
            .into_iter()
            .filter(|kind| {
                !section
                    .disabled_validators
                    .iter()
                    .any(|name| ValidatorKind::from_str(name).as_ref() == Ok(kind))
            })
            .collect();

        Ok(Self {
            cookie_name: section.cookie_name.clone(),
            auth_header: section.auth_header.to_ascii_lowercase(),
            identity_header: section.identity_header.clone(),
            issuer: section.issuer.clone(),
            algorithm: section.algorithm()?,
            claims_to_validate: section.claims_to_validate.clone(),
            enabled_validators,
            skip_routes: RouteSkipMatcher::new(&section.skip_routes),
            skip_preflight: section.skip_preflight,
            key_sources,
            verify_timeout: Duration::from_millis(section.verify_timeout_ms),
        })
    }

    /// Build the policy, fetching every configured JWKS endpoint.
    ///
    /// An endpoint that cannot be loaded is logged and left out.
    pub async fn connect(section: &AuthSection) -> Result<Self, ConfigError> {
        let options = JwksOptions {
            refresh_interval: Duration::from_secs(section.jwks.refresh_interval_secs),
            refresh_rate_limit: Duration::from_secs(section.jwks.refresh_rate_limit_secs),
            refresh_timeout: Duration::from_secs(section.jwks.refresh_timeout_secs),
            refresh_unknown_kid: section.jwks.refresh_unknown_kid,
            insecure_skip_verify: section.insecure_skip_verify,
        };

        let mut key_sources: Vec<Arc<dyn KeySource>> = Vec::new();
        for url in &section.jwks_servers {
            info!(url = %url, "adding jwks server");
            match JwksKeySource::new(url, options.clone()).await {
                Ok(source) => key_sources.push(Arc::new(source)),
                Err(e) => warn!(url = %url, error = %e, "excluding unreachable jwks server"),
            }
        }
        if key_sources.is_empty() && !section.jwks_servers.is_empty() {
            warn!("no jwks server could be loaded, every bearer token will be rejected");
        }

        Self::from_section(section, key_sources)
    }

    #[must_use]
    pub fn with_key_source(mut self, source: Arc<dyn KeySource>) -> Self {
        self.key_sources.push(source);
        self
    }

    #[must_use]
    pub fn with_skip_routes<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.skip_routes = RouteSkipMatcher::new(patterns);
        self
    }

    #[must_use]
    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    #[must_use]
    pub fn with_required_claims(mut self, claims: &[&str]) -> Self {
        self.claims_to_validate = claims.iter().map(|c| c.to_string()).collect();
        self
    }

    #[must_use]
    pub fn with_verify_timeout(mut self, timeout: Duration) -> Self {
        self.verify_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_skip_preflight(mut self, skip: bool) -> Self {
        self.skip_preflight = skip;
        self
    }

    /// Turn off a validator kind
    #[must_use]
    pub fn disable(mut self, kind: ValidatorKind) -> Self {
        self.enabled_validators.retain(|k| *k != kind);
        self
    }
}

/// Why a decision came out the way it did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecisionReason {
    SkipRoute,
    Preflight,
    /// A validator accepted the credential; carries the outcome's source
    Validated(String),
    NoValidators,
    NoCredential,
    Unauthenticated,
}

/// The single decision made for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub allow: bool,
    pub identity_headers: Vec<HeaderValueOption>,
    pub deny_mode: DenyMode,
    pub reason: DecisionReason,
}

impl Decision {
    fn allow(identity_headers: Vec<HeaderValueOption>, reason: DecisionReason) -> Self {
        Self {
            allow: true,
            identity_headers,
            deny_mode: DenyMode::default(),
            reason,
        }
    }

    fn deny(deny_mode: DenyMode, reason: DecisionReason) -> Self {
        Self {
            allow: false,
            identity_headers: Vec::new(),
            deny_mode,
            reason,
        }
    }
}

/// Per-request authorization orchestrator
pub struct Authorizer {
    config: Arc<AuthConfig>,
    sink: Arc<dyn MetricsSink>,
    deny_mode: DenyMode,
}

impl Authorizer {
    pub fn new(config: Arc<AuthConfig>, sink: Arc<dyn MetricsSink>) -> Self {
        Self {
            config,
            sink,
            deny_mode: DenyMode::default(),
        }
    }

    /// How denials are answered
    #[must_use]
    pub fn with_deny_mode(mut self, deny_mode: DenyMode) -> Self {
        self.deny_mode = deny_mode;
        self
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Decide a request within the configured verification timeout, or
    /// sooner when the proxy reports a shorter wait of its own
    pub async fn decide(&self, facts: RequestFacts) -> Decision {
        let deadline = Instant::now() + self.budget(&facts);
        self.decide_until(facts, deadline).await
    }

    /// Verification budget for one request
    fn budget(&self, facts: &RequestFacts) -> Duration {
        match facts.expected_timeout() {
            Some(hint) => hint.min(self.config.verify_timeout),
            None => self.config.verify_timeout,
        }
    }

    /// Decide a request, abandoning verification at `deadline`
    pub async fn decide_until(&self, facts: RequestFacts, deadline: Instant) -> Decision {
        let span = info_span!(
            "decide",
            host = %facts.host,
            path = %facts.path,
            scheme = %facts.scheme,
            rid = %facts.request_id(),
        );
        let facts = Arc::new(facts);

        let decision = self
            .evaluate(Arc::clone(&facts), deadline)
            .instrument(span.clone())
            .await;

        span.in_scope(|| {
            if decision.allow {
                debug!(reason = ?decision.reason, "request allowed");
            } else {
                info!(reason = ?decision.reason, "authentication context is not valid, request denied");
            }
        });
        self.sink
            .record_decision(&facts.host, &facts.path, decision.allow);

        decision
    }

    async fn evaluate(&self, facts: Arc<RequestFacts>, deadline: Instant) -> Decision {
        if self.config.skip_routes.matches(&facts.path) {
            return Decision::allow(Vec::new(), DecisionReason::SkipRoute);
        }

        if self.config.skip_preflight && facts.method.eq_ignore_ascii_case("OPTIONS") {
            return Decision::allow(Vec::new(), DecisionReason::Preflight);
        }

        let validators = validator::build_validators(&facts, &self.config);
        if validators.is_empty() {
            warn!("no validator kinds enabled");
            return Decision::deny(self.deny_mode, DecisionReason::NoValidators);
        }

        let attempts: Vec<_> = validators
            .into_iter()
            .filter(|v| {
                let attempt = v.should_attempt();
                if !attempt {
                    debug!(kind = %v.kind(), "validator opted out");
                }
                attempt
            })
            .map(|mut v| {
                async move {
                    let outcome: ValidationOutcome = v.verify(deadline).await;
                    outcome.valid.then_some(outcome)
                }
                .instrument(Span::current())
            })
            .collect();

        if attempts.is_empty() {
            return Decision::deny(self.deny_mode, DecisionReason::NoCredential);
        }

        match race::first_success(attempts, deadline).await {
            Some(outcome) => Decision::allow(
                outcome.identity_headers,
                DecisionReason::Validated(outcome.source),
            ),
            None => Decision::deny(self.deny_mode, DecisionReason::Unauthenticated),
        }
    }
}
