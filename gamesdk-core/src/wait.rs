//! Readiness tracking and result waiters.
//!
//! Every wait here is a sleep-poll loop on the shared poll interval with a
//! deadline measured from call entry, so no wait can outlive its timeout by
//! more than one interval. The future adapters run the same loop on a
//! short-lived thread and hand the outcome over a one-shot channel.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::oneshot;

use crate::error::{DispatchError, Result};
use crate::registry::{CallbackId, CallbackRegistry, CallbackResult};

/// Flag set once the poll loop has seen its first successful drain
#[derive(Debug, Default)]
pub struct Readiness {
    ready: RwLock<bool>,
}

impl Readiness {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a drain has succeeded since the instance was created
    pub fn is_ready(&self) -> bool {
        *self.ready.read()
    }

    /// Flip the flag to ready.
    ///
    /// Returns `true` only for the call that performed the flip.
    pub(crate) fn mark_ready(&self) -> bool {
        if *self.ready.read() {
            return false;
        }

        let mut ready = self.ready.write();
        if *ready {
            false
        } else {
            *ready = true;
            true
        }
    }

    /// Clear the flag; only done when the instance is torn down
    pub(crate) fn reset(&self) {
        *self.ready.write() = false;
    }
}

/// Evaluate `probe` every `interval` until it yields a value or `timeout`
/// elapses.
///
/// The probe always runs at least once. On timeout this returns `None` at or
/// after the deadline, and never later than the deadline plus one interval
/// plus the cost of one probe.
pub fn poll_until<T>(
    timeout: Duration,
    interval: Duration,
    mut probe: impl FnMut() -> Option<T>,
) -> Option<T> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(value) = probe() {
            return Some(value);
        }

        let now = Instant::now();
        if now >= deadline {
            return None;
        }
        thread::sleep(interval.min(deadline - now));
    }
}

/// One-shot result of a background wait.
///
/// Await it from async code, or call [`blocking_wait`](Self::blocking_wait)
/// from a plain thread. It resolves exactly once.
#[must_use = "a wait future does nothing unless awaited or waited on"]
pub struct WaitFuture<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> WaitFuture<T> {
    /// A future that is already resolved
    pub(crate) fn ready(value: Result<T>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(value);
        Self { rx }
    }

    /// Block the current thread until the wait resolves.
    ///
    /// Must not be called from within an async runtime; await the future
    /// there instead.
    pub fn blocking_wait(self) -> Result<T> {
        self.rx
            .blocking_recv()
            .unwrap_or(Err(DispatchError::Unavailable))
    }

    /// Take the outcome if the wait has already resolved
    pub fn try_take(&mut self) -> Option<Result<T>> {
        match self.rx.try_recv() {
            Ok(value) => Some(value),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(DispatchError::Unavailable)),
        }
    }
}

impl<T> Future for WaitFuture<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(DispatchError::Unavailable)))
    }
}

/// Run `wait` on a short-lived thread and expose its outcome as a future.
///
/// `wait` receives a check that turns true once the future has been dropped;
/// it should return promptly when it does.
pub(crate) fn spawn_waiter<T, F>(name: String, wait: F) -> WaitFuture<T>
where
    F: FnOnce(&dyn Fn() -> bool) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    let spawned = thread::Builder::new().name(name).spawn(move || {
        let abandoned = || tx.is_closed();
        let outcome = wait(&abandoned);
        if tx.send(outcome).is_err() {
            tracing::trace!("waiter abandoned");
        }
    });

    match spawned {
        Ok(_) => WaitFuture { rx },
        Err(err) => {
            tracing::warn!(error = %err, "failed to spawn waiter thread");
            WaitFuture::ready(Err(DispatchError::Spawn(err)))
        }
    }
}

/// Waiting primitives over the registry and the readiness flag
#[derive(Clone)]
pub struct Waiters {
    registry: Arc<CallbackRegistry>,
    readiness: Arc<Readiness>,
    interval: Duration,
}

impl Waiters {
    pub fn new(
        registry: Arc<CallbackRegistry>,
        readiness: Arc<Readiness>,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            readiness,
            interval,
        }
    }

    /// Block until the first successful drain, or `timeout`.
    ///
    /// Returns `false` on timeout.
    pub fn wait_until_initialized(&self, timeout: Duration) -> bool {
        poll_until(timeout, self.interval, || {
            self.readiness.is_ready().then_some(())
        })
        .is_some()
    }

    /// Block until a completion for `id` is recorded, or `timeout`
    pub fn wait_for_result(&self, id: CallbackId, timeout: Duration) -> Option<CallbackResult> {
        poll_until(timeout, self.interval, || self.registry.lookup(id))
    }

    /// Wait for the completion of `id` in the background.
    ///
    /// Resolves with the recorded completion as-is (whatever its status) or
    /// with [`DispatchError::Timeout`].
    pub fn result_future(&self, id: CallbackId, timeout: Duration) -> WaitFuture<CallbackResult> {
        let waiters = self.clone();
        spawn_waiter(format!("gamesdk-wait-{}", id.as_u64()), move |abandoned| {
            poll_until(timeout, waiters.interval, || {
                if abandoned() {
                    return Some(Err(DispatchError::Unavailable));
                }
                waiters.registry.lookup(id).map(Ok)
            })
            .unwrap_or(Err(DispatchError::Timeout(timeout)))
        })
    }

    /// Wait for readiness in the background
    pub fn initialized_future(&self, timeout: Duration) -> WaitFuture<()> {
        let waiters = self.clone();
        spawn_waiter("gamesdk-wait-init".to_string(), move |abandoned| {
            poll_until(timeout, waiters.interval, || {
                if abandoned() {
                    Some(Err(DispatchError::Unavailable))
                } else {
                    waiters.readiness.is_ready().then_some(Ok(()))
                }
            })
            .unwrap_or(Err(DispatchError::Timeout(timeout)))
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}
