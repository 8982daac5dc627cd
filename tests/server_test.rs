//! HTTP Server Integration Tests
//!
//! Runs the authorization server and the metrics server on ephemeral ports
//! and talks to them over HTTP.

mod common;

use common::*;
use edge_authz::authz::AuthConfig;
use edge_authz::config::{Config, ConfigLoader};
use edge_authz::metrics::server::{MetricsServer, MetricsServerConfig};
use edge_authz::metrics::{MetricsSink, NoopSink, PrometheusSink};
use edge_authz::server::AuthzServer;
use edge_authz::AuthzService;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;

fn config(mode: &str) -> Config {
    ConfigLoader::from_yaml(&format!(
        r#"
auth:
  issuer: "{ISSUER}"
  skip_routes: ["^/dex-login$"]
deny:
  mode: {mode}
  redirect_url: "{LOGIN_URL}"
  html_body: "<h1>sign in</h1>"
"#
    ))
    .unwrap()
}

/// Start the authorization server; dropping the sender stops it
async fn start(config: &Config, sink: Arc<dyn MetricsSink>) -> (SocketAddr, oneshot::Sender<()>) {
    let auth = AuthConfig::from_section(&config.auth, vec![primary_source()]).unwrap();
    let service = AuthzService::from_config(config, Arc::new(auth), sink);
    let server = AuthzServer::bind("127.0.0.1:0", Arc::new(service))
        .await
        .unwrap();
    let addr = server.local_addr();

    let (tx, rx) = oneshot::channel::<()>();
    tokio::spawn(server.run_until(async {
        let _ = rx.await;
    }));
    (addr, tx)
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_valid_cookie_gets_ok_with_identity() {
    let (addr, _stop) = start(&config("redirect"), Arc::new(NoopSink)).await;
    let token = primary_token(&user_claims("a@b.com"));

    let response = client()
        .get(format!("http://{}/api?x=1", addr))
        .header("cookie", format!("_auth={}", token))
        .header("x-forwarded-proto", "https")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["x-forwarded-email"], "a@b.com");
}

#[tokio::test]
async fn test_auth_cookie_in_earlier_cookie_line() {
    let (addr, _stop) = start(&config("redirect"), Arc::new(NoopSink)).await;
    let token = primary_token(&user_claims("a@b.com"));

    let response = client()
        .get(format!("http://{}/api", addr))
        .header("cookie", format!("_auth={}", token))
        .header("cookie", "theme=dark")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["x-forwarded-email"], "a@b.com");
}

#[tokio::test]
async fn test_bad_bearer_gets_redirect() {
    let (addr, _stop) = start(&config("redirect"), Arc::new(NoopSink)).await;

    let response = client()
        .get(format!("http://{}/api", addr))
        .header("authorization", "Bearer badtoken")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 302);
    assert_eq!(response.headers()["location"], LOGIN_URL);
    assert_eq!(
        response.headers()["cache-control"],
        "private, max-age=0, no-store"
    );
}

#[tokio::test]
async fn test_html_mode_gets_challenge_page() {
    let (addr, _stop) = start(&config("html"), Arc::new(NoopSink)).await;

    let response = client()
        .get(format!("http://{}/api", addr))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 403);
    assert_eq!(response.headers()["content-type"], "text/html");
    assert_eq!(response.text().await.unwrap(), "<h1>sign in</h1>");
}

#[tokio::test]
async fn test_skip_route_gets_ok_without_identity() {
    let (addr, _stop) = start(&config("redirect"), Arc::new(NoopSink)).await;

    let response = client()
        .get(format!("http://{}/dex-login", addr))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert!(response.headers().get("x-forwarded-email").is_none());
}

#[tokio::test]
async fn test_decisions_exposed_on_metrics_endpoint() {
    let sink = PrometheusSink::new().unwrap();
    let mut metrics = MetricsServer::new(
        MetricsServerConfig {
            address: "127.0.0.1:0".to_string(),
        },
        sink.registry().clone(),
    );
    let metrics_addr = metrics.start().await.unwrap();
    let (addr, _stop) = start(&config("redirect"), Arc::new(sink)).await;

    client()
        .get(format!("http://{}/dex-login", addr))
        .send()
        .await
        .unwrap();
    client()
        .get(format!("http://{}/api", addr))
        .send()
        .await
        .unwrap();

    let body = client()
        .get(format!("http://{}/metrics", metrics_addr))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    let name = "exa_proxy_envoy_service_auth_v3_authorization_check_method_handle_count";
    assert!(body.contains(&format!(
        r#"{name}{{host="{addr}",path="/dex-login",result="allow"}} 1"#
    )));
    assert!(body.contains(&format!(
        r#"{name}{{host="{addr}",path="/api",result="deny"}} 1"#
    )));

    let health = client()
        .get(format!("http://{}/health", metrics_addr))
        .send()
        .await
        .unwrap();
    assert!(health.status().is_success());

    metrics.shutdown().await;
}

#[tokio::test]
async fn test_server_stops_on_shutdown_signal() {
    let config = config("redirect");
    let auth = AuthConfig::from_section(&config.auth, Vec::new()).unwrap();
    let service = AuthzService::from_config(&config, Arc::new(auth), Arc::new(NoopSink));
    let server = AuthzServer::bind("127.0.0.1:0", Arc::new(service))
        .await
        .unwrap();

    let (tx, rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(server.run_until(async {
        let _ = rx.await;
    }));
    tx.send(()).unwrap();

    let result = tokio::time::timeout(std::time::Duration::from_secs(2), handle)
        .await
        .expect("server should stop")
        .unwrap();
    assert!(result.is_ok());
}
