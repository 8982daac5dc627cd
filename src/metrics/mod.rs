//! Metrics module
//!
//! Decisions are reported to a [`MetricsSink`] that is built once at startup
//! and handed to the authorizer. The Prometheus sink owns its own registry,
//! which the scrape server in [`server`] exposes.

pub mod server;

use prometheus::{CounterVec, Opts, Registry};

const NAMESPACE: &str = "exa";
const SUBSYSTEM: &str = "proxy";

/// Result label for an allowed request
pub const RESULT_ALLOW: &str = "allow";
/// Result label for a denied request
pub const RESULT_DENY: &str = "deny";

/// Receives one event per authorization decision
pub trait MetricsSink: Send + Sync {
    fn record_decision(&self, host: &str, path: &str, allowed: bool);
}

/// Sink that drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl MetricsSink for NoopSink {
    fn record_decision(&self, _host: &str, _path: &str, _allowed: bool) {}
}

/// Prometheus-backed sink
#[derive(Clone)]
pub struct PrometheusSink {
    registry: Registry,
    checks: CounterVec,
}

impl PrometheusSink {
    /// Create a sink with a fresh registry
    pub fn new() -> Result<Self, prometheus::Error> {
        Self::with_registry(Registry::new())
    }

    /// Create a sink registering its counters in `registry`
    pub fn with_registry(registry: Registry) -> Result<Self, prometheus::Error> {
        let checks = CounterVec::new(
            Opts::new(
                "envoy_service_auth_v3_authorization_check_method_handle_count",
                "Total number of authorization checks performed",
            )
            .namespace(NAMESPACE)
            .subsystem(SUBSYSTEM),
            &["host", "path", "result"],
        )?;
        registry.register(Box::new(checks.clone()))?;

        Ok(Self { registry, checks })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Current count for a label set
    pub fn decision_count(&self, host: &str, path: &str, result: &str) -> f64 {
        self.checks.with_label_values(&[host, path, result]).get()
    }
}

impl MetricsSink for PrometheusSink {
    fn record_decision(&self, host: &str, path: &str, allowed: bool) {
        let result = if allowed { RESULT_ALLOW } else { RESULT_DENY };
        self.checks.with_label_values(&[host, path, result]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::{Encoder, TextEncoder};

    #[test]
    fn test_record_decision() {
        let sink = PrometheusSink::new().unwrap();
        sink.record_decision("app.example", "/", true);
        sink.record_decision("app.example", "/", false);
        sink.record_decision("app.example", "/", false);

        assert_eq!(sink.decision_count("app.example", "/", RESULT_ALLOW), 1.0);
        assert_eq!(sink.decision_count("app.example", "/", RESULT_DENY), 2.0);
    }

    #[test]
    fn test_registries_are_independent() {
        let a = PrometheusSink::new().unwrap();
        let b = PrometheusSink::new().unwrap();
        a.record_decision("h", "/", true);
        assert_eq!(b.decision_count("h", "/", RESULT_ALLOW), 0.0);
    }

    #[test]
    fn test_metric_name() {
        let sink = PrometheusSink::new().unwrap();
        sink.record_decision("h", "/", true);
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&sink.registry().gather(), &mut buffer)
            .unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.contains(
            r#"exa_proxy_envoy_service_auth_v3_authorization_check_method_handle_count{host="h",path="/",result="allow"} 1"#
        ));
    }

    #[test]
    fn test_noop_sink() {
        NoopSink.record_decision("h", "/", true);
    }
}
