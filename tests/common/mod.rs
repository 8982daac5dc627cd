//! Shared helpers for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use edge_authz::keys::{KeySource, KeySourceError, StaticKeySource};
use edge_authz::request::{RequestFacts, Scheme};
use jsonwebtoken::{encode, Algorithm, DecodingKey, EncodingKey, Header};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const ISSUER: &str = "https://idp.example";
pub const LOGIN_URL: &str = "https://idp.example/login";

pub const PRIMARY_PRIVATE: &str = include_str!("../fixtures/primary.pem");
pub const PRIMARY_PUBLIC: &str = include_str!("../fixtures/primary.pub.pem");
pub const SECONDARY_PRIVATE: &str = include_str!("../fixtures/secondary.pem");
pub const SECONDARY_PUBLIC: &str = include_str!("../fixtures/secondary.pub.pem");

/// Base64url RSA moduli of the fixture keys, for JWKS documents
pub const PRIMARY_N: &str = "upsCW87YR4wYSmYHBT6r7QmktiBtrdtRdM_eC4wGhyunpF2tIO9-ibSZ2qp3p-9UGYPRWXPKJh851F69W-k_YR5Rt4wuqZAsbJcD4l59fyuL9l74B4mrcJb7eWmVO6HpjYKoA7C0Kc9JLqfuSKvSB-LblBQtvS6Jd_ruW3-lGKKj_1N7x5dyvZAKDPEWRh2u0huYLkr1usCnXP-Di5ki8-cuZSvp0EQ_ItqO6Z3p_mtDk-5mqO-aYQchdTh0qJcqfnbRvURYqt1d4y3HupI7nMiTc_wCQIzGLU2XJIKsaS2olAw1BNNT9pAdtYDvbg3gLmcCEDx04cJ8F0IIGtVzjw";
pub const SECONDARY_N: &str = "sLW-vKmfZ_H62kQ7V0Qiy3Zdfy0a13jomLt9SbnSMDyehqPpls3jl80gXB75qy-VwWs5NXrJD_n1aXc8Z_6klQYLe_WG4oRtyOmLEtylzzPzsIvBL59c_2VWdOLRNQC4XyAFKDS0x60bqzi4lRAypT1UutoJUNaoXH3flZJqc1eEcqoSVPLLn7mZQfwlLar820Qxtj2tugXwI3Bvo0yKv39ApkiWB4Z9kWXWKAbOb3gEsf9VbUGzBDEjQY6mJ6w_T08-FFgQasWJlFfevEwhE4Q7oD2rK6unQLOKWW3TjmxkhPAAbXKQ6ppdzSzTP2ZvINQbnhp84X_Y3KrYvWjqDw";

/// Sign `claims` with an RSA private key
pub fn sign(alg: Algorithm, private_pem: &str, kid: Option<&str>, claims: &Value) -> String {
    let mut header = Header::new(alg);
    header.kid = kid.map(String::from);
    encode(
        &header,
        claims,
        &EncodingKey::from_rsa_pem(private_pem.as_bytes()).unwrap(),
    )
    .unwrap()
}

/// RS256 token signed with the primary key
pub fn primary_token(claims: &Value) -> String {
    sign(Algorithm::RS256, PRIMARY_PRIVATE, None, claims)
}

/// RS256 token signed with the secondary key
pub fn secondary_token(claims: &Value) -> String {
    sign(Algorithm::RS256, SECONDARY_PRIVATE, None, claims)
}

pub fn future_exp() -> i64 {
    (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp()
}

pub fn past_exp() -> i64 {
    (chrono::Utc::now() - chrono::Duration::hours(1)).timestamp()
}

/// Claims for a signed-in user
pub fn user_claims(email: &str) -> Value {
    json!({
        "iss": ISSUER,
        "sub": "user-1",
        "email": email,
        "exp": future_exp(),
    })
}

pub fn primary_source() -> Arc<dyn KeySource> {
    Arc::new(StaticKeySource::from_rsa_pem("primary", PRIMARY_PUBLIC).unwrap())
}

pub fn secondary_source() -> Arc<dyn KeySource> {
    Arc::new(StaticKeySource::from_rsa_pem("secondary", SECONDARY_PUBLIC).unwrap())
}

/// JWKS document with one RSA key
pub fn jwks_json(kid: &str, n: &str) -> Value {
    json!({
        "keys": [{
            "kty": "RSA",
            "kid": kid,
            "use": "sig",
            "alg": "RS256",
            "n": n,
            "e": "AQAB",
        }]
    })
}

pub fn facts(path: &str, headers: &[(&str, &str)]) -> RequestFacts {
    facts_with_method("GET", path, headers)
}

pub fn facts_with_method(method: &str, path: &str, headers: &[(&str, &str)]) -> RequestFacts {
    RequestFacts::new(
        "app.example",
        path,
        method,
        Scheme::Https,
        headers.iter().map(|(k, v)| (*k, v.to_string())),
    )
}

/// Key source that answers after a delay
pub struct DelayedSource {
    inner: Arc<dyn KeySource>,
    delay: Duration,
}

impl DelayedSource {
    pub fn wrap(inner: Arc<dyn KeySource>, delay: Duration) -> Arc<dyn KeySource> {
        Arc::new(Self { inner, delay })
    }
}

#[async_trait]
impl KeySource for DelayedSource {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn resolve(&self, header: &Header) -> Result<DecodingKey, KeySourceError> {
        tokio::time::sleep(self.delay).await;
        self.inner.resolve(header).await
    }
}

/// Key source that panics on every lookup
pub struct PanickingSource;

#[async_trait]
impl KeySource for PanickingSource {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn resolve(&self, _header: &Header) -> Result<DecodingKey, KeySourceError> {
        panic!("key source failure");
    }
}

/// Key source that never answers, counting the lookups still in flight
pub struct HangingSource {
    pub in_flight: Arc<AtomicUsize>,
}

struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl KeySource for HangingSource {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn resolve(&self, _header: &Header) -> Result<DecodingKey, KeySourceError> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let _guard = InFlight(Arc::clone(&self.in_flight));
        std::future::pending::<()>().await;
        Err(KeySourceError::NoKeys)
    }
}
