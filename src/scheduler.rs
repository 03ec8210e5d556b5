//! Background task scheduling primitives
//!
//! Two primitives back every cache in this crate: a stoppable interval
//! loop and a fire-once delayed task. Both run their task in a separate
//! spawned activity and never block the caller.
//!
//! The interval loop launches each task invocation asynchronously so that
//! a slow task cannot delay the tick. Two invocations may therefore
//! overlap; tasks handed to it must be idempotent and overlap-tolerant.

use std::{future::Future, time::Duration};

use tokio::sync::mpsc;

use crate::clock::DurationSecs;

/// A handle that stops an interval loop
///
/// Stopping is a hard cancel: once signalled, the loop exits at its next
/// select. An invocation already launched may still run to completion.
#[derive(Clone, Debug)]
pub struct StopHandle {
    tx: mpsc::Sender<()>,
}

impl StopHandle {
    /// Signals the loop to stop
    ///
    /// Best-effort: signalling an already-stopped loop is a no-op.
    pub fn stop(&self) {
        let _ = self.tx.try_send(());
    }
}

/// Runs `task` repeatedly at a fixed interval until stopped
///
/// The task runs immediately, then again each time the interval elapses.
/// Each invocation is spawned on its own so the tick loop is never
/// starved by a slow task.
pub fn interval<F, Fut>(period: Duration, task: F) -> StopHandle
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel(1);

    tokio::spawn(async move {
        loop {
            tokio::spawn(task());

            tokio::select! {
                _ = tokio::time::sleep(period) => {}
                _ = rx.recv() => {
                    tracing::debug!("interval loop stopped");
                    return;
                }
            }
        }
    });

    StopHandle { tx }
}

/// Runs `task` once after `delay`
///
/// Cancellation is not supported; callers that need cancellation use
/// [`interval`] or check a liveness flag inside the task.
pub fn once<F, Fut>(delay: DurationSecs, task: F)
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        tokio::time::sleep(delay.into()).await;
        task().await;
    });
}
