//! The shared frame behind every background-refreshing cache
//!
//! A cache frame is a single-slot cache with one-time initialization, a
//! periodic refresh driven by the [`scheduler`][crate::scheduler], and a
//! readiness flag. The key cache and the token manager both specialize it.
//!
//! Initialization discipline: [`initialize_if_needed`] serializes
//! first-time initialization behind an async mutex, so at most one fetch
//! attempt runs until the cache reports initialized. Once initialization
//! has been observed, the call is a cheap read-side no-op and the init
//! mutex is never reacquired on the hot path.

use std::{sync::Arc, sync::RwLock, time::Duration};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::scheduler::{self, StopHandle};

/// State shared by every cache frame
#[derive(Debug, Default)]
pub struct CacheState {
    flags: RwLock<Flags>,
    init: Mutex<()>,
}

#[derive(Debug, Default)]
struct Flags {
    initialized: bool,
    stopped: bool,
    stop: Option<StopHandle>,
}

impl CacheState {
    /// Whether a first fetch attempt has completed, regardless of outcome
    pub fn is_initialized(&self) -> bool {
        self.flags.read().expect("cache state lock poisoned").initialized
    }

    /// Whether the cache has been told to stop refreshing
    pub fn is_stopped(&self) -> bool {
        self.flags.read().expect("cache state lock poisoned").stopped
    }

    /// Stores the stop handle for the cache's refresh loop
    pub fn set_stop_handle(&self, handle: StopHandle) {
        let mut flags = self.flags.write().expect("cache state lock poisoned");
        flags.stop = Some(handle);
    }

    /// Signals the refresh loop to stop and marks the cache stopped
    ///
    /// Late-firing tasks check the stopped flag and bail out, so an
    /// invocation already scheduled does no further work.
    pub fn stop(&self) {
        let mut flags = self.flags.write().expect("cache state lock poisoned");
        flags.stopped = true;
        if let Some(handle) = &flags.stop {
            handle.stop();
        }
    }

    fn set_initialized(&self) {
        let mut flags = self.flags.write().expect("cache state lock poisoned");
        flags.initialized = true;
    }
}

/// A cache with one-time initialization and periodic background refresh
#[async_trait]
pub trait CacheFrame: Send + Sync + 'static {
    /// The frame's shared state
    fn state(&self) -> &CacheState;

    /// The interval between refresh ticks
    fn expiry_interval(&self) -> Duration;

    /// Populates the cache for the first time and installs any refresh
    /// schedule
    ///
    /// Runs at most once per cache; failures are recorded by the
    /// implementation, not surfaced here.
    async fn init_cache(self: Arc<Self>);

    /// Refreshes the cached value
    ///
    /// Invoked repeatedly from the refresh schedule; must be idempotent
    /// and tolerant of overlapping invocations.
    async fn update_cache(self: Arc<Self>);
}

/// Runs the cache's first-time initialization exactly once
///
/// Concurrent callers on an uninitialized cache serialize behind the init
/// mutex; exactly one performs the initial fetch, the rest observe the
/// initialized flag and return. Callers after initialization return
/// immediately.
pub async fn initialize_if_needed<C: CacheFrame>(cache: &Arc<C>) {
    if cache.state().is_initialized() {
        return;
    }

    let _guard = cache.state().init.lock().await;
    if cache.state().is_initialized() {
        return;
    }

    Arc::clone(cache).init_cache().await;
    cache.state().set_initialized();
}

/// Wires the cache's refresh into the interval scheduler
///
/// The loop holds only a weak reference: dropping the last strong
/// reference to the cache quiesces the refresh without an explicit stop.
pub fn start_interval<C: CacheFrame>(cache: &Arc<C>) {
    let weak = Arc::downgrade(cache);

    let handle = scheduler::interval(cache.expiry_interval(), move || {
        let weak = weak.clone();
        async move {
            if let Some(cache) = weak.upgrade() {
                if !cache.state().is_stopped() {
                    cache.update_cache().await;
                }
            }
        }
    });

    cache.state().set_stop_handle(handle);
}
