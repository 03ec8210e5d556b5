//! Background-refreshing cache of identity-service verification keys
//!
//! One [`KeyCache`] exists per distinct key-endpoint URL, held in a
//! process-wide registry so that every consumer of the same endpoint
//! shares one cache. The cache refreshes its JWKS on a fixed cadence and
//! survives transient fetch failures by continuing to serve the last good
//! key set; callers never observe a fetch error on read.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::Duration,
};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use thiserror::Error;

use crate::{
    braids::KeyIdRef,
    cache::{self, CacheFrame, CacheState},
    jwk::Jwk,
    jwks::{Jwks, KeyNotFound},
};

/// Default interval between JWKS refreshes, in seconds
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 3_600;

/// Enables verbose logging of every JWKS fetch when set to a boolean
const DEBUG_LOGGING_VAR: &str = "JWKSDEBUGLOGGING";

/// Historically honored override for the default refresh interval
const CACHE_EXPIRY_VAR: &str = "KEY_CACHE_EXPIRY";

static REGISTRY: Lazy<RwLock<HashMap<String, Arc<KeyCache>>>> = Lazy::new(RwLock::default);

#[derive(Debug, Error)]
enum FetchError {
    #[error("request to key endpoint failed")]
    Http(#[from] reqwest::Error),

    #[error("unable to decode key endpoint response")]
    Decode(#[from] serde_json::Error),
}

/// A cache of the JSON Web Key Set published at one key endpoint
#[derive(Debug)]
pub struct KeyCache {
    endpoint: String,
    keys: ArcSwap<Jwks>,
    refresh_interval: Duration,
    verbose: bool,
    state: CacheState,
}

impl KeyCache {
    /// Obtains the shared cache for `endpoint`, creating it on first use
    ///
    /// The first caller for a given endpoint waits for the initial fetch
    /// attempt to complete; later callers return immediately.
    pub async fn obtain(endpoint: &str) -> Arc<KeyCache> {
        Self::obtain_with_interval(endpoint, default_refresh_interval()).await
    }

    /// Obtains the shared cache for `endpoint` with a specific refresh
    /// interval
    ///
    /// The interval only takes effect when this call creates the cache;
    /// an endpoint's existing cache keeps the interval it was created
    /// with.
    pub async fn obtain_with_interval(endpoint: &str, refresh_interval: Duration) -> Arc<KeyCache> {
        let existing = {
            let registry = REGISTRY.read().expect("key cache registry lock poisoned");
            registry.get(endpoint).cloned()
        };

        let cache = match existing {
            Some(cache) => cache,
            None => {
                let mut registry = REGISTRY.write().expect("key cache registry lock poisoned");
                Arc::clone(
                    registry
                        .entry(endpoint.to_owned())
                        .or_insert_with(|| Arc::new(KeyCache::new(endpoint, refresh_interval))),
                )
            }
        };

        cache::initialize_if_needed(&cache).await;
        cache
    }

    fn new(endpoint: &str, refresh_interval: Duration) -> Self {
        Self {
            endpoint: endpoint.to_owned(),
            keys: ArcSwap::from_pointee(Jwks::default()),
            refresh_interval,
            verbose: debug_logging_enabled(),
            state: CacheState::default(),
        }
    }

    /// The key endpoint this cache fetches from
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// A deep copy of the currently published key set
    pub fn keys(&self) -> Vec<Jwk> {
        self.keys.load().keys().to_vec()
    }

    /// Gets a copy of the key matching `kid`
    ///
    /// # Errors
    ///
    /// Returns a [`KeyNotFound`] quoting the requested `kid` and the
    /// currently cached key IDs when no key matches.
    pub fn key(&self, kid: &KeyIdRef) -> Result<Jwk, KeyNotFound> {
        self.keys.load().get_key(kid).map(Jwk::clone)
    }

    /// Stops this cache's background refresh loop
    pub fn stop_refresh(&self) {
        self.state.stop();
    }

    async fn fetch(&self) -> Result<Jwks, FetchError> {
        if self.verbose {
            tracing::debug!(jwks.url = %self.endpoint, "fetching JWKS");
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;

        let response = client.get(&self.endpoint).send().await?;
        response.error_for_status_ref()?;

        let body = response.bytes().await?;

        if self.verbose {
            tracing::debug!(
                jwks.url = %self.endpoint,
                response.bytes = body.len(),
                "received JWKS response"
            );
        }

        Ok(serde_json::from_slice(&body)?)
    }
}

#[async_trait]
impl CacheFrame for KeyCache {
    fn state(&self) -> &CacheState {
        &self.state
    }

    fn expiry_interval(&self) -> Duration {
        self.refresh_interval
    }

    async fn init_cache(self: Arc<Self>) {
        Arc::clone(&self).update_cache().await;
        cache::start_interval(&self);
    }

    async fn update_cache(self: Arc<Self>) {
        match self.fetch().await {
            Ok(jwks) if jwks.is_empty() => {
                tracing::error!(
                    jwks.url = %self.endpoint,
                    "key endpoint returned an empty key set; keeping previous keys"
                );
            }
            Ok(jwks) => {
                let count = jwks.keys().len();
                self.keys.store(Arc::new(jwks));
                tracing::debug!(jwks.url = %self.endpoint, jwks.count = count, "JWKS refreshed");
            }
            Err(error) => {
                tracing::error!(
                    error = &error as &dyn std::error::Error,
                    jwks.url = %self.endpoint,
                    "unable to refresh JWKS; keeping previous keys"
                );
            }
        }
    }
}

fn default_refresh_interval() -> Duration {
    let secs = std::env::var(CACHE_EXPIRY_VAR)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_REFRESH_INTERVAL_SECS);
    Duration::from_secs(secs)
}

fn debug_logging_enabled() -> bool {
    std::env::var(DEBUG_LOGGING_VAR)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false)
}
