//! Work queue feeding the owner thread.
//!
//! Any thread may submit a closure; only the owner thread receives them. Each
//! submission carries its own one-shot result slot, so the submitter blocks
//! (or awaits) exactly until its closure has run.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use tokio::sync::{mpsc, oneshot};

use crate::error::{DispatchError, Result};

type Job<S> = Box<dyn FnOnce(&mut S) + Send + 'static>;

/// A deferred unit of work for the owner thread.
///
/// Consumed exactly once; running it delivers the closure's value (or its
/// panic) to the submitter.
pub struct OwnerTask<S> {
    job: Job<S>,
}

impl<S: 'static> OwnerTask<S> {
    /// Wrap `work` so that its outcome is sent to `slot`
    pub(crate) fn new<T, F>(work: F, slot: oneshot::Sender<Result<T>>) -> Self
    where
        F: FnOnce(&mut S) -> T + Send + 'static,
        T: Send + 'static,
    {
        let job: Job<S> = Box::new(move |sdk: &mut S| {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| work(sdk)))
                .map_err(|payload| DispatchError::Panicked(panic_message(payload.as_ref())));

            if let Err(err) = &outcome {
                tracing::warn!(error = %err, "owner thread task panicked");
            }

            // The submitter may have given up waiting
            let _ = slot.send(outcome);
        });

        Self { job }
    }

    /// Run the task against the native instance
    pub(crate) fn run(self, sdk: &mut S) {
        (self.job)(sdk)
    }
}

impl<S> fmt::Debug for OwnerTask<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnerTask").finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Submission side of the owner-thread queue.
///
/// Cloning is cheap; all clones feed the same owner thread.
pub struct CallQueue<S> {
    tx: mpsc::Sender<OwnerTask<S>>,
}

impl<S> Clone for CallQueue<S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<S: 'static> CallQueue<S> {
    /// Create a queue holding at most `capacity` pending tasks
    pub(crate) fn new(capacity: usize) -> (Self, mpsc::Receiver<OwnerTask<S>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Run `work` on the owner thread and block until it has run.
    ///
    /// Fails with [`DispatchError::Unavailable`] once the owner thread has
    /// stopped accepting work. `work` must not itself submit to this queue:
    /// the owner thread would wait on itself. Must not be called from within
    /// an async runtime; use [`run_async`](Self::run_async) there.
    pub fn run<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&mut S) -> T + Send + 'static,
        T: Send + 'static,
    {
        let (slot, outcome) = oneshot::channel();

        self.tx
            .blocking_send(OwnerTask::new(work, slot))
            .map_err(|_| {
                tracing::debug!("owner queue closed, task rejected");
                DispatchError::Unavailable
            })?;

        // A dropped slot means the task was discarded without running
        outcome
            .blocking_recv()
            .unwrap_or(Err(DispatchError::Unavailable))
    }

    /// Run `work` on the owner thread and await its outcome
    pub async fn run_async<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&mut S) -> T + Send + 'static,
        T: Send + 'static,
    {
        let (slot, outcome) = oneshot::channel();

        self.tx
            .send(OwnerTask::new(work, slot))
            .await
            .map_err(|_| {
                tracing::debug!("owner queue closed, task rejected");
                DispatchError::Unavailable
            })?;

        outcome.await.unwrap_or(Err(DispatchError::Unavailable))
    }

    /// Whether the owner thread has stopped accepting work
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
