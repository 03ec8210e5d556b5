//! Shared fixtures for the integration tests
//!
//! Tokens are signed with a real RSA key whose public half is published
//! by the stub key endpoint, so the verification path in these tests is
//! the same one used against a live identity service.

#![allow(dead_code)]

use std::time::{Duration, SystemTime};

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use iam_tokens::TokenManagerConfig;
use ring::{
    rand::SystemRandom,
    signature::{RsaKeyPair, RSA_PKCS1_SHA256},
};
use serde_json::{json, Value};
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

/// The `kid` published by [`mount_keys`]
pub const ISSUER_KID: &str = "20260815-ab12cd34";

/// Installs a tracing subscriber honoring `RUST_LOG`, once per process
pub fn init_tracing() {
    static ONCE: std::sync::Once = std::sync::Once::new();
    ONCE.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub const JWKS_BODY: &str = include_str!("../../data/jwks.json");

/// The key whose public half appears in the published key set
pub fn issuer_key() -> RsaKeyPair {
    key_pair(include_str!("../../data/issuer-key.pk8.b64"))
}

/// A key the key endpoint has never published
pub fn imposter_key() -> RsaKeyPair {
    key_pair(include_str!("../../data/imposter-key.pk8.b64"))
}

fn key_pair(b64: &str) -> RsaKeyPair {
    let der = STANDARD.decode(b64).expect("fixture is valid base64");
    RsaKeyPair::from_pkcs8(&der).expect("fixture is a valid PKCS#8 RSA key")
}

pub fn now() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("system clock is after the epoch")
        .as_secs()
}

/// Signs a compact RS256 token over the given claims
pub fn sign_token(key: &RsaKeyPair, kid: &str, claims: &Value) -> String {
    let header = json!({ "alg": "RS256", "typ": "JWT", "kid": kid });
    let message = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header).expect("header serializes")),
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).expect("claims serialize")),
    );

    let mut signature = vec![0; key.public().modulus_len()];
    key.sign(
        &RSA_PKCS1_SHA256,
        &SystemRandom::new(),
        message.as_bytes(),
        &mut signature,
    )
    .expect("signing fixture token");

    format!("{message}.{}", URL_SAFE_NO_PAD.encode(signature))
}

/// Claims in the shape the identity service mints for a service ID
pub fn service_claims(iat: u64, lifetime: u64) -> Value {
    json!({
        "iss": "https://iam.cloud.ibm.com/identity",
        "sub": "ServiceId-7ad4a442-e2b4-4d8c-9d87-4215553af618",
        "sub_type": "ServiceId",
        "iam_id": "iam-ServiceId-7ad4a442-e2b4-4d8c-9d87-4215553af618",
        "realmid": "iam",
        "identifier": "ServiceId-7ad4a442-e2b4-4d8c-9d87-4215553af618",
        "iat": iat,
        "exp": iat + lifetime,
        "grant_type": "urn:ibm:params:oauth:grant-type:apikey",
        "scope": "ibm openid",
        "client_id": "default",
        "acr": 1,
        "amr": ["pwd"],
        "account": { "valid": true, "bss": "0123456789abcdef0123456789abcdef" }
    })
}

/// A freshly signed token valid for `lifetime` seconds from now
pub fn fresh_token(lifetime: u64) -> String {
    sign_token(&issuer_key(), ISSUER_KID, &service_claims(now(), lifetime))
}

/// A 200 token-endpoint response carrying `token`
pub fn token_response(token: &str, lifetime: u64) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "access_token": token,
        "refresh_token": "not_supported",
        "token_type": "Bearer",
        "expires_in": lifetime,
        "expiration": now() + lifetime,
        "scope": "ibm openid"
    }))
}

/// Serves the published key set at `GET /identity/keys`
pub async fn mount_keys(server: &MockServer) {
    init_tracing();
    Mock::given(method("GET"))
        .and(path("/identity/keys"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(JWKS_BODY, "application/json"),
        )
        .mount(server)
        .await;
}

/// Serves `token` at `POST /identity/token` for any grant
pub async fn mount_token(server: &MockServer, token: &str, lifetime: u64) {
    Mock::given(method("POST"))
        .and(path("/identity/token"))
        .respond_with(token_response(token, lifetime))
        .mount(server)
        .await;
}

/// Manager configuration pointing at the stub server, with a short retry
/// delay so failure tests stay fast
pub fn config_for(server: &MockServer) -> TokenManagerConfig {
    TokenManagerConfig {
        token_endpoint: Some(format!("{}/identity/token", server.uri())),
        key_endpoint: Some(format!("{}/identity/keys", server.uri())),
        retry_delay: Some(Duration::from_millis(50)),
        ..TokenManagerConfig::default()
    }
}
