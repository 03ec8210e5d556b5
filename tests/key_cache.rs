use std::{sync::Arc, time::Duration};

use color_eyre::Result;
use iam_tokens::{cache::CacheFrame, KeyCache, KeyIdRef};
use serde_json::Value;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

mod common;

fn keys_url(server: &MockServer) -> String {
    format!("{}/identity/keys", server.uri())
}

/// The published key set with its key re-labeled under a new kid
fn rotated_key_set(kid: &str) -> Value {
    let mut jwks: Value = serde_json::from_str(common::JWKS_BODY).expect("fixture is valid JSON");
    jwks["keys"][0]["kid"] = Value::String(kid.to_owned());
    jwks
}

#[tokio::test]
async fn caches_are_shared_per_endpoint() -> Result<()> {
    let server = MockServer::start().await;
    common::mount_keys(&server).await;

    let first = KeyCache::obtain(&keys_url(&server)).await;
    let second = KeyCache::obtain(&keys_url(&server)).await;
    assert!(Arc::ptr_eq(&first, &second));

    let keys = first.keys();
    assert_eq!(keys.len(), 1);
    assert_eq!(
        keys[0].kid.as_ref().map(|kid| kid.as_str()),
        Some(common::ISSUER_KID)
    );

    first.stop_refresh();
    Ok(())
}

#[tokio::test]
async fn failed_refresh_keeps_the_previous_keys() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/identity/keys"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(common::JWKS_BODY, "application/json"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/identity/keys"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/identity/keys"))
        .respond_with(ResponseTemplate::new(200).set_body_json(rotated_key_set("rotated")))
        .mount(&server)
        .await;

    let cache =
        KeyCache::obtain_with_interval(&keys_url(&server), Duration::from_secs(3_600)).await;
    assert!(cache.key(KeyIdRef::from_str(common::ISSUER_KID)).is_ok());

    // A failed refresh leaves the published set untouched
    Arc::clone(&cache).update_cache().await;
    assert!(cache.key(KeyIdRef::from_str(common::ISSUER_KID)).is_ok());

    // The next successful refresh replaces it
    Arc::clone(&cache).update_cache().await;
    assert!(cache.key(KeyIdRef::from_str("rotated")).is_ok());
    assert!(cache.key(KeyIdRef::from_str(common::ISSUER_KID)).is_err());

    cache.stop_refresh();
    Ok(())
}

#[tokio::test]
async fn empty_key_set_never_replaces_published_keys() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/identity/keys"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(common::JWKS_BODY, "application/json"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/identity/keys"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "keys": [] })))
        .mount(&server)
        .await;

    let cache =
        KeyCache::obtain_with_interval(&keys_url(&server), Duration::from_secs(3_600)).await;

    Arc::clone(&cache).update_cache().await;
    assert!(cache.key(KeyIdRef::from_str(common::ISSUER_KID)).is_ok());

    cache.stop_refresh();
    Ok(())
}

#[tokio::test]
async fn unknown_kid_reports_the_known_set() {
    let server = MockServer::start().await;
    common::mount_keys(&server).await;

    let cache = KeyCache::obtain(&keys_url(&server)).await;
    let err = cache.key(KeyIdRef::from_str("K99")).unwrap_err();

    assert_eq!(err.kid().as_str(), "K99");
    assert_eq!(err.known().len(), 1);

    cache.stop_refresh();
}
