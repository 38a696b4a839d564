//! The owner thread.
//!
//! The owner thread creates the native instance, runs every queued task
//! against it, drains native completions at a fixed interval once polling has
//! been enabled, and finally destroys the instance. It hosts a current-thread
//! tokio runtime so that the work queue, the stop signal and the poll ticker
//! can be multiplexed with `select!` without any extra threads.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{self, MissedTickBehavior};

use crate::dispatch::queue::OwnerTask;
use crate::error::{DispatchError, Result};
use crate::native::{CreateParams, NativeSdk, ResultCode};
use crate::registry::CallbackRegistry;
use crate::wait::Readiness;

/// What the owner loop should be doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoopSignal {
    /// Run queued tasks only
    Idle,
    /// Run queued tasks and drain completions every interval
    Polling,
    /// Stop accepting work, flush the queue and destroy the instance
    Stopping,
}

/// Drain counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrainStats {
    /// Drains attempted
    pub total: u64,
    /// Drains that returned a non-OK status or panicked
    pub failed: u64,
}

/// State shared between the owner thread and everyone else
#[derive(Debug)]
pub(crate) struct OwnerShared {
    pub(crate) registry: Arc<CallbackRegistry>,
    pub(crate) readiness: Arc<Readiness>,
    pub(crate) poll_interval: Duration,
    drains: AtomicU64,
    failed_drains: AtomicU64,
    destroyed: AtomicBool,
}

impl OwnerShared {
    pub(crate) fn new(
        registry: Arc<CallbackRegistry>,
        readiness: Arc<Readiness>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            registry,
            readiness,
            poll_interval,
            drains: AtomicU64::new(0),
            failed_drains: AtomicU64::new(0),
            destroyed: AtomicBool::new(false),
        }
    }

    /// Whether the owner thread has destroyed the native instance
    pub(crate) fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub(crate) fn drain_stats(&self) -> DrainStats {
        DrainStats {
            total: self.drains.load(Ordering::Relaxed),
            failed: self.failed_drains.load(Ordering::Relaxed),
        }
    }
}

/// Body of the owner thread.
///
/// Reports instance creation over `created` before serving any task. Returns
/// once the instance has been destroyed.
pub(crate) fn owner_main<S, F>(
    factory: F,
    params: CreateParams,
    tasks: mpsc::Receiver<OwnerTask<S>>,
    signals: watch::Receiver<LoopSignal>,
    shared: Arc<OwnerShared>,
    created: std_mpsc::SyncSender<Result<()>>,
) where
    S: NativeSdk,
    F: FnOnce(CreateParams) -> std::result::Result<S, ResultCode>,
{
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            tracing::error!(error = %err, "failed to build owner runtime");
            let _ = created.send(Err(DispatchError::Spawn(err)));
            return;
        }
    };

    let sdk = match factory(params) {
        Ok(sdk) => sdk,
        Err(code) => {
            tracing::error!(%code, client_id = params.client_id, "native instance creation failed");
            let _ = created.send(Err(DispatchError::Native(code)));
            return;
        }
    };

    let _ = created.send(Ok(()));
    drop(created);

    let owner_loop = OwnerLoop {
        sdk,
        tasks,
        signals,
        shared: shared.clone(),
    };
    let sdk = runtime.block_on(owner_loop.run());

    sdk.destroy();
    shared.readiness.reset();
    shared.destroyed.store(true, Ordering::SeqCst);
    tracing::debug!("native instance destroyed on owner thread");
}

struct OwnerLoop<S> {
    sdk: S,
    tasks: mpsc::Receiver<OwnerTask<S>>,
    signals: watch::Receiver<LoopSignal>,
    shared: Arc<OwnerShared>,
}

impl<S: NativeSdk> OwnerLoop<S> {
    async fn run(mut self) -> S {
        let mut ticker = time::interval(self.shared.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut polling = false;
        let mut signal = *self.signals.borrow_and_update();

        loop {
            match signal {
                LoopSignal::Stopping => break,
                LoopSignal::Polling if !polling => {
                    polling = true;
                    ticker.reset_immediately();
                    tracing::debug!(interval = ?self.shared.poll_interval, "poll loop running");
                }
                _ => {}
            }

            tokio::select! {
                biased;

                changed = self.signals.changed() => {
                    signal = match changed {
                        Ok(()) => *self.signals.borrow_and_update(),
                        // Controller dropped without an explicit stop
                        Err(_) => LoopSignal::Stopping,
                    };
                }
                // Due drains go ahead of queued tasks
                _ = ticker.tick(), if polling => self.drain(),
                task = self.tasks.recv() => match task {
                    Some(task) => {
                        tracing::trace!("running owner task");
                        task.run(&mut self.sdk);
                    }
                    None => break,
                },
            }
        }

        self.finish().await
    }

    /// Deliver pending native completions into the registry
    fn drain(&mut self) {
        self.shared.drains.fetch_add(1, Ordering::Relaxed);

        let mut completed = Vec::new();
        let sdk = &mut self.sdk;
        let status = match panic::catch_unwind(AssertUnwindSafe(|| sdk.run_callbacks(&mut completed)))
        {
            Ok(status) => status,
            Err(_) => {
                self.shared.failed_drains.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("native drain panicked");
                return;
            }
        };

        for completion in completed {
            tracing::trace!(id = %completion.token, code = %completion.code, "completion recorded");
            self.shared
                .registry
                .record(completion.token, completion.code, completion.payload);
        }

        if status.is_ok() {
            if self.shared.readiness.mark_ready() {
                tracing::info!("native runtime initialized");
            }
        } else {
            self.shared.failed_drains.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(%status, "native drain failed");
        }
    }

    /// Refuse new work, run what was already accepted and hand the instance back
    async fn finish(mut self) -> S {
        self.tasks.close();

        let mut flushed = 0usize;
        while let Some(task) = self.tasks.recv().await {
            task.run(&mut self.sdk);
            flushed += 1;
        }

        tracing::debug!(flushed, "owner queue closed");
        self.sdk
    }
}
