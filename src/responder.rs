//! Decision responder
//!
//! Maps a [`Decision`] onto the proxy's wire response. Pure: no I/O, no
//! logging, no state beyond the configured deny targets.

use crate::authz::Decision;
use crate::check::{
    CheckResponse, DeniedHttpResponse, HeaderValueOption, HttpResponse, OkHttpResponse, RpcCode,
};
use crate::config::{DenyConfig, DenyMode};

/// Keeps browsers and shared caches from storing a deny response
pub const CACHE_CONTROL_NO_STORE: &str = "private, max-age=0, no-store";

/// 302 Found
pub const STATUS_FOUND: u16 = 302;
/// 403 Forbidden
pub const STATUS_FORBIDDEN: u16 = 403;

/// Builds allow and deny responses
#[derive(Debug, Clone)]
pub struct DecisionResponder {
    redirect_url: String,
    html_body: String,
}

impl DecisionResponder {
    pub fn new(redirect_url: impl Into<String>, html_body: impl Into<String>) -> Self {
        Self {
            redirect_url: redirect_url.into(),
            html_body: html_body.into(),
        }
    }

    pub fn from_config(config: &DenyConfig) -> Self {
        Self::new(config.redirect_url.clone(), config.html_body.clone())
    }

    /// Respond to a decision using its deny mode
    pub fn respond(&self, decision: &Decision) -> CheckResponse {
        if decision.allow {
            return self.allow(decision.identity_headers.clone());
        }
        match decision.deny_mode {
            DenyMode::Redirect => self.deny_with_redirect(),
            DenyMode::Html => self.deny_with_html(),
        }
    }

    /// Allow the request, replacing each identity header upstream
    pub fn allow(&self, identity_headers: Vec<HeaderValueOption>) -> CheckResponse {
        let headers = identity_headers
            .into_iter()
            .map(|h| HeaderValueOption::set(h.key, h.value))
            .collect();

        CheckResponse {
            status: RpcCode::Ok,
            http_response: HttpResponse::Ok(OkHttpResponse { headers }),
        }
    }

    /// Deny with a redirect to the configured login URL
    pub fn deny_with_redirect(&self) -> CheckResponse {
        CheckResponse {
            status: RpcCode::Unauthenticated,
            http_response: HttpResponse::Denied(DeniedHttpResponse {
                status: STATUS_FOUND,
                headers: vec![
                    HeaderValueOption::set("Location", self.redirect_url.clone()),
                    HeaderValueOption::set("Cache-Control", CACHE_CONTROL_NO_STORE),
                ],
                body: String::new(),
            }),
        }
    }

    /// Deny with the configured HTML challenge page
    pub fn deny_with_html(&self) -> CheckResponse {
        CheckResponse {
            status: RpcCode::Unauthenticated,
            http_response: HttpResponse::Denied(DeniedHttpResponse {
                status: STATUS_FORBIDDEN,
                headers: vec![
                    HeaderValueOption::set("Content-Type", "text/html"),
                    HeaderValueOption::set("Cache-Control", CACHE_CONTROL_NO_STORE),
                ],
                body: self.html_body.clone(),
            }),
        }
    }
}
