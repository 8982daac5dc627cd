//! Authorization service
//!
//! Entry point for protocol adapters: one check request in, exactly one check
//! response out. Authentication failures are always answered with a deny
//! response, never surfaced as errors.

use crate::authz::{AuthConfig, Authorizer};
use crate::check::{CheckRequest, CheckResponse};
use crate::config::Config;
use crate::metrics::MetricsSink;
use crate::request::RequestFacts;
use crate::responder::DecisionResponder;
use std::sync::Arc;

/// External authorization service
pub struct AuthzService {
    authorizer: Authorizer,
    responder: DecisionResponder,
}

impl AuthzService {
    pub fn new(authorizer: Authorizer, responder: DecisionResponder) -> Self {
        Self {
            authorizer,
            responder,
        }
    }

    /// Assemble the service from the loaded configuration
    pub fn from_config(config: &Config, auth: Arc<AuthConfig>, sink: Arc<dyn MetricsSink>) -> Self {
        let authorizer = Authorizer::new(auth, sink).with_deny_mode(config.deny.mode);
        Self::new(authorizer, DecisionResponder::from_config(&config.deny))
    }

    pub fn authorizer(&self) -> &Authorizer {
        &self.authorizer
    }

    /// Handle a check request
    pub async fn check(&self, request: &CheckRequest) -> CheckResponse {
        self.check_facts(request.facts()).await
    }

    /// Handle request facts built by an adapter
    pub async fn check_facts(&self, facts: RequestFacts) -> CheckResponse {
        let decision = self.authorizer.decide(facts).await;
        self.responder.respond(&decision)
    }
}
