//! External authorization wire contract
//!
//! Rust shapes of the proxy's `Check(CheckRequest) -> CheckResponse` RPC.
//! Only the fields the decision engine consumes or produces are modeled.
//! The types are serde-friendly so any transport can feed them.

use crate::request::{RequestFacts, Scheme};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Check request sent by the proxy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckRequest {
    #[serde(default)]
    pub attributes: AttributeContext,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttributeContext {
    #[serde(default)]
    pub request: RequestAttributes,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestAttributes {
    #[serde(default)]
    pub http: HttpRequest,
}

/// HTTP attributes of the proxied request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpRequest {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub scheme: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl CheckRequest {
    /// Build a request from its HTTP attributes
    pub fn from_http(http: HttpRequest) -> Self {
        Self {
            attributes: AttributeContext {
                request: RequestAttributes { http },
            },
        }
    }

    /// Project the request onto the facts the engine reads
    pub fn facts(&self) -> RequestFacts {
        let http = &self.attributes.request.http;
        RequestFacts::new(
            http.host.clone(),
            http.path.clone(),
            http.method.clone(),
            Scheme::parse(&http.scheme),
            http.headers.iter().map(|(k, v)| (k, v.clone())),
        )
    }
}

/// RPC status codes used by the contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RpcCode {
    Ok = 0,
    Unauthenticated = 16,
}

/// A header mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderValueOption {
    pub key: String,
    pub value: String,
    /// `false` replaces any existing value
    #[serde(default)]
    pub append: bool,
}

impl HeaderValueOption {
    /// A header with replace semantics
    pub fn set(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            append: false,
        }
    }
}

/// Response returned to the proxy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResponse {
    pub status: RpcCode,
    pub http_response: HttpResponse,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HttpResponse {
    Ok(OkHttpResponse),
    Denied(DeniedHttpResponse),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OkHttpResponse {
    pub headers: Vec<HeaderValueOption>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeniedHttpResponse {
    /// HTTP status code returned to the downstream client
    pub status: u16,
    pub headers: Vec<HeaderValueOption>,
    #[serde(default)]
    pub body: String,
}

impl CheckResponse {
    pub fn is_allowed(&self) -> bool {
        self.status == RpcCode::Ok
    }

    /// Look up a response header by name (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        let headers = match &self.http_response {
            HttpResponse::Ok(ok) => &ok.headers,
            HttpResponse::Denied(denied) => &denied.headers,
        };
        headers
            .iter()
            .find(|h| h.key.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }
}
