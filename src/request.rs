//! Request facts
//!
//! A read-only view of one inbound check request. Built once by a protocol
//! adapter and shared (behind an `Arc`) with every validator spawned for the
//! request.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Header used to correlate log lines with the proxy's access log
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Header carrying how long the proxy will wait for the check, in milliseconds
pub const EXPECTED_TIMEOUT_HEADER: &str = "x-envoy-expected-rq-timeout-ms";

/// Request scheme as reported by the proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scheme {
    #[default]
    Http,
    Https,
}

impl Scheme {
    /// Parse a scheme string, defaulting to `http` for anything unknown
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("https") {
            Scheme::Https
        } else {
            Scheme::Http
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request metadata consumed by the decision engine
#[derive(Debug, Clone, Default)]
pub struct RequestFacts {
    pub host: String,
    pub path: String,
    pub method: String,
    pub scheme: Scheme,
    headers: HashMap<String, String>,
}

impl RequestFacts {
    /// Create request facts.
    ///
    /// Header names are lowercased; when a name repeats, the last value wins.
    pub fn new<I, K, V>(
        host: impl Into<String>,
        path: impl Into<String>,
        method: impl Into<String>,
        scheme: Scheme,
        headers: I,
    ) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let headers = headers
            .into_iter()
            .map(|(k, v)| (k.as_ref().to_ascii_lowercase(), v.into()))
            .collect();

        Self {
            host: host.into(),
            path: path.into(),
            method: method.into(),
            scheme,
            headers,
        }
    }

    /// Look up a header by name (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        match self.headers.get(name) {
            Some(v) => Some(v.as_str()),
            None => self
                .headers
                .get(&name.to_ascii_lowercase())
                .map(String::as_str),
        }
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// The raw `cookie` header, empty when absent
    pub fn raw_cookies(&self) -> &str {
        self.header("cookie").unwrap_or_default()
    }

    /// Find the first cookie pair whose name is `name`.
    ///
    /// Returns the trimmed `name=value` pair exactly as sent.
    pub fn cookie_pair(&self, name: &str) -> Option<&str> {
        self.raw_cookies()
            .split(';')
            .map(str::trim)
            .find(|pair| pair.split('=').next().map(str::trim) == Some(name))
    }

    pub fn request_id(&self) -> &str {
        self.header(REQUEST_ID_HEADER).unwrap_or_default()
    }

    /// Time the proxy will wait for a decision, when it says so.
    ///
    /// Zero and unparsable values mean no hint.
    pub fn expected_timeout(&self) -> Option<Duration> {
        self.header(EXPECTED_TIMEOUT_HEADER)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}
