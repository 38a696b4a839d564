//! Lifecycle controller.
//!
//! [`Core`] owns the owner thread and, through it, the native instance. It is
//! the single entry point for callers: running closures on the owner thread,
//! allocating callback ids, waiting for completions and readiness, and
//! starting and stopping the poll loop.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::arch::{self, PinningResult, WorkerThread};
use crate::config::CoreConfig;
use crate::dispatch::owner::{owner_main, LoopSignal, OwnerShared};
use crate::dispatch::{CallQueue, DrainStats};
use crate::error::{DispatchError, Result};
use crate::native::{CreateParams, NativeSdk, ResultCode};
use crate::registry::{CallbackId, CallbackRegistry, CallbackResult, Payload};
use crate::wait::{self, Readiness, WaitFuture, Waiters};

/// Where a [`Core`] is in its life.
///
/// States only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LifecycleState {
    /// Native instance created, poll loop not running
    Created = 0,
    /// Poll loop running, no successful drain yet
    Started = 1,
    /// At least one drain has succeeded
    Initialized = 2,
    /// Stop requested; new work is refused
    ShuttingDown = 3,
    /// Native instance destroyed
    Destroyed = 4,
}

impl LifecycleState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Created,
            1 => Self::Started,
            2 => Self::Initialized,
            3 => Self::ShuttingDown,
            _ => Self::Destroyed,
        }
    }
}

/// Owner of the native instance and its owner thread.
///
/// `Core` is `Send + Sync` whatever `S` is; share it between callers with an
/// `Arc` or scoped threads. Dropping it shuts it down.
///
/// The blocking methods must not be called from inside an async runtime nor
/// from a closure running on the owner thread; use the `_async` variants and
/// the futures in async code.
pub struct Core<S: NativeSdk> {
    config: CoreConfig,
    queue: CallQueue<S>,
    signals: watch::Sender<LoopSignal>,
    shared: Arc<OwnerShared>,
    waiters: Waiters,
    state: AtomicU8,
    owner: Mutex<Option<WorkerThread<()>>>,
    owner_thread: ThreadId,
    owner_core: Option<usize>,
    pinning_result: PinningResult,
}

impl<S: NativeSdk> Core<S> {
    /// Create the native instance with its default constructor
    pub fn create(config: CoreConfig) -> Result<Self> {
        Self::create_with(config, S::create)
    }

    /// Spawn the owner thread and create the native instance on it with
    /// `factory`.
    ///
    /// Returns once the instance exists. The poll loop does not run until
    /// [`start`](Self::start) is called, but owner-thread calls are served
    /// right away.
    pub fn create_with<F>(config: CoreConfig, factory: F) -> Result<Self>
    where
        F: FnOnce(CreateParams) -> std::result::Result<S, ResultCode> + Send + 'static,
    {
        config.validate()?;

        let registry = Arc::new(CallbackRegistry::new(config.result_retention));
        let readiness = Arc::new(Readiness::new());
        let shared = Arc::new(OwnerShared::new(
            registry.clone(),
            readiness.clone(),
            config.poll_interval,
        ));
        let waiters = Waiters::new(registry, readiness, config.poll_interval);

        let (queue, tasks) = CallQueue::new(config.queue_capacity);
        let (signals, signal_rx) = watch::channel(LoopSignal::Idle);
        let (created_tx, created_rx) = std_mpsc::sync_channel(1);

        let cpu_info = arch::detect_cpu_info();
        let params = config.create_params();
        let owner_shared = shared.clone();

        let worker = arch::create_thread_builder(config.owner_pinning, &cpu_info)
            .name(config.owner_thread_name.clone())
            .spawn(move || {
                owner_main(factory, params, tasks, signal_rx, owner_shared, created_tx)
            })?;

        let created = created_rx
            .recv()
            .unwrap_or(Err(DispatchError::Unavailable));
        if let Err(err) = created {
            if worker.join().is_err() {
                tracing::error!("owner thread panicked during creation");
            }
            return Err(err);
        }

        tracing::info!(
            client_id = config.client_id,
            thread = %config.owner_thread_name,
            core = ?worker.core_id(),
            pinning = ?worker.pinning_result(),
            "native instance created"
        );

        Ok(Self {
            owner_thread: worker.thread_id(),
            owner_core: worker.core_id(),
            pinning_result: worker.pinning_result(),
            owner: Mutex::new(Some(worker)),
            state: AtomicU8::new(LifecycleState::Created as u8),
            config,
            queue,
            signals,
            shared,
            waiters,
        })
    }

    /// Start the poll loop.
    ///
    /// Calling it again is a no-op. Fails with
    /// [`DispatchError::Unavailable`] once shutdown has begun.
    pub fn start(&self) -> Result<()> {
        let started = self.state.compare_exchange(
            LifecycleState::Created as u8,
            LifecycleState::Started as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );

        match started {
            Ok(_) => {
                // Never overwrite a stop that raced ahead of us
                let enabled = self.signals.send_if_modified(|signal| {
                    if *signal == LoopSignal::Idle {
                        *signal = LoopSignal::Polling;
                        true
                    } else {
                        false
                    }
                });
                if enabled {
                    tracing::info!(interval = ?self.config.poll_interval, "poll loop started");
                }
                Ok(())
            }
            Err(current) if current >= LifecycleState::ShuttingDown as u8 => {
                Err(DispatchError::Unavailable)
            }
            Err(_) => Ok(()),
        }
    }

    /// Stop the poll loop and destroy the native instance.
    ///
    /// Tasks accepted before the stop still run; later submissions fail
    /// with [`DispatchError::Unavailable`]. Blocks until the owner thread has
    /// exited, except when called from the owner thread itself; the state
    /// then reads [`LifecycleState::Destroyed`] once the owner loop has torn
    /// the instance down. Safe to call more than once and without a prior
    /// [`start`](Self::start).
    pub fn shutdown(&self) {
        if thread::current().id() == self.owner_thread {
            self.advance(LifecycleState::ShuttingDown);
            self.signals.send_replace(LoopSignal::Stopping);
            tracing::warn!("shutdown requested on the owner thread, not waiting for it");
            return;
        }

        let mut owner = self.owner.lock();
        let Some(worker) = owner.take() else {
            return;
        };

        self.advance(LifecycleState::ShuttingDown);
        self.signals.send_replace(LoopSignal::Stopping);
        tracing::info!("shutting down native runtime");

        if worker.join().is_err() {
            tracing::error!("owner thread panicked");
        }

        self.advance(LifecycleState::Destroyed);
        tracing::info!("native instance destroyed");
    }

    /// Current lifecycle state
    pub fn state(&self) -> LifecycleState {
        match self.stored_state() {
            LifecycleState::Started if self.shared.readiness.is_ready() => {
                LifecycleState::Initialized
            }
            // Stopped from the owner thread: nobody joined, but the loop is gone
            LifecycleState::ShuttingDown if self.shared.is_destroyed() => {
                LifecycleState::Destroyed
            }
            state => state,
        }
    }

    /// Whether the first drain has succeeded and the instance is still alive
    pub fn is_initialized(&self) -> bool {
        self.state() == LifecycleState::Initialized
    }

    /// Run `work` on the owner thread and return its value.
    ///
    /// Calls from different threads never overlap. Fails fast with
    /// [`DispatchError::Unavailable`] once shutdown has begun, and with
    /// [`DispatchError::Panicked`] if `work` panics. `work` must not call
    /// back into this `Core`.
    pub fn run_on_owner<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&mut S) -> T + Send + 'static,
        T: Send + 'static,
    {
        self.ensure_accepting()?;
        self.queue.run(work)
    }

    /// Async variant of [`run_on_owner`](Self::run_on_owner)
    pub async fn run_on_owner_async<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&mut S) -> T + Send + 'static,
        T: Send + 'static,
    {
        self.ensure_accepting()?;
        self.queue.run_async(work).await
    }

    /// Allocate a fresh callback id
    pub fn new_callback_id(&self) -> CallbackId {
        self.shared.registry.next_id()
    }

    /// Record a completion by hand
    pub fn record_result(&self, id: CallbackId, code: ResultCode, payload: Payload) {
        self.shared.registry.record(id, code, payload);
    }

    /// The completion recorded for `id`, if any
    pub fn lookup_result(&self, id: CallbackId) -> Option<CallbackResult> {
        self.shared.registry.lookup(id)
    }

    /// Like [`lookup_result`](Self::lookup_result), failing with
    /// [`DispatchError::NotFound`]
    pub fn callback_result(&self, id: CallbackId) -> Result<CallbackResult> {
        self.shared.registry.get(id)
    }

    /// Block until a completion for `id` is recorded or `timeout` elapses
    pub fn wait_for_callback_result(
        &self,
        id: CallbackId,
        timeout: Duration,
    ) -> Option<CallbackResult> {
        self.waiters.wait_for_result(id, timeout)
    }

    /// Wait for the completion of `id` in the background
    pub fn callback_future(&self, id: CallbackId, timeout: Duration) -> WaitFuture<CallbackResult> {
        self.waiters.result_future(id, timeout)
    }

    /// Block until the first successful drain or `timeout`; `false` on timeout
    pub fn wait_until_initialized(&self, timeout: Duration) -> bool {
        self.waiters.wait_until_initialized(timeout)
    }

    /// Wait for the first successful drain in the background
    pub fn initialized_future(&self, timeout: Duration) -> WaitFuture<()> {
        self.waiters.initialized_future(timeout)
    }

    /// Trigger a correlated native operation without waiting for it.
    ///
    /// `trigger` runs on the owner thread with a fresh callback id to hand to
    /// the native entry point. A non-OK immediate status fails with
    /// [`DispatchError::Native`]; otherwise the id is returned for waiting.
    pub fn begin_correlated<F>(&self, trigger: F) -> Result<CallbackId>
    where
        F: FnOnce(&mut S, CallbackId) -> ResultCode + Send + 'static,
    {
        let id = self.new_callback_id();
        let code = self.run_on_owner(move |sdk| trigger(sdk, id))?;
        accepted(id, code)
    }

    /// Trigger a correlated native operation and wait for its completion.
    ///
    /// `timeout` starts once the operation has been triggered. A completion
    /// with a non-OK status becomes [`DispatchError::Native`]; no completion
    /// in time becomes [`DispatchError::Timeout`].
    pub fn call_correlated<F>(&self, timeout: Duration, trigger: F) -> Result<Payload>
    where
        F: FnOnce(&mut S, CallbackId) -> ResultCode + Send + 'static,
    {
        let id = self.begin_correlated(trigger)?;
        self.wait_for_callback_result(id, timeout)
            .ok_or(DispatchError::Timeout(timeout))?
            .into_payload()
    }

    /// Async variant of [`call_correlated`](Self::call_correlated)
    pub async fn call_correlated_async<F>(&self, timeout: Duration, trigger: F) -> Result<Payload>
    where
        F: FnOnce(&mut S, CallbackId) -> ResultCode + Send + 'static,
    {
        let id = self.new_callback_id();
        let code = self.run_on_owner_async(move |sdk| trigger(sdk, id)).await?;
        accepted(id, code)?;

        self.callback_future(id, timeout).await?.into_payload()
    }

    /// Trigger a native operation without a callback.
    ///
    /// Its completion is never observed: once the native side accepts the
    /// operation, it is assumed to succeed.
    pub fn fire_and_forget<F>(&self, trigger: F) -> Result<()>
    where
        F: FnOnce(&mut S) -> ResultCode + Send + 'static,
    {
        let code = self.run_on_owner(trigger)?;
        if !code.is_ok() {
            return Err(DispatchError::Native(code));
        }

        tracing::debug!("untracked operation accepted, assuming success");
        Ok(())
    }

    /// Wait for readiness, then evaluate `probe` on the owner thread every
    /// poll interval until it yields a value.
    ///
    /// Both phases share one deadline measured from call entry.
    pub fn poll_until<T, P>(&self, timeout: Duration, probe: P) -> Result<T>
    where
        P: Fn(&mut S) -> Option<T> + Send + Sync + 'static,
        T: Send + 'static,
    {
        let deadline = Instant::now() + timeout;
        if !self.wait_until_initialized(timeout) {
            return Err(DispatchError::Timeout(timeout));
        }

        let probe = Arc::new(probe);
        let remaining = deadline.saturating_duration_since(Instant::now());

        wait::poll_until(remaining, self.config.poll_interval, || {
            let probe = probe.clone();
            match self.run_on_owner(move |sdk| (*probe)(sdk)) {
                Ok(Some(value)) => Some(Ok(value)),
                Ok(None) => None,
                Err(err) => Some(Err(err)),
            }
        })
        .unwrap_or(Err(DispatchError::Timeout(timeout)))
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// The registry completions are recorded into
    pub fn registry(&self) -> &CallbackRegistry {
        &self.shared.registry
    }

    /// Id of the owner thread
    pub fn owner_thread_id(&self) -> ThreadId {
        self.owner_thread
    }

    /// Core the owner thread was asked to run on, if any
    pub fn owner_core(&self) -> Option<usize> {
        self.owner_core
    }

    pub fn pinning_result(&self) -> PinningResult {
        self.pinning_result
    }

    /// Drain counters of the poll loop
    pub fn drain_stats(&self) -> DrainStats {
        self.shared.drain_stats()
    }

    fn stored_state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn advance(&self, to: LifecycleState) {
        self.state.fetch_max(to as u8, Ordering::SeqCst);
    }

    fn ensure_accepting(&self) -> Result<()> {
        if self.stored_state() >= LifecycleState::ShuttingDown {
            tracing::debug!("owner call rejected after shutdown");
            return Err(DispatchError::Unavailable);
        }
        Ok(())
    }
}

impl<S: NativeSdk> Drop for Core<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn accepted(id: CallbackId, code: ResultCode) -> Result<CallbackId> {
    if code.is_ok() {
        Ok(id)
    } else {
        tracing::debug!(%id, %code, "native operation rejected");
        Err(DispatchError::Native(code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::{LoopbackOp, LoopbackProbe, LoopbackScript, LoopbackSdk};
    use rand::Rng;
    use std::sync::atomic::AtomicBool;

    const INTERVAL: Duration = Duration::from_millis(10);

    fn config() -> CoreConfig {
        CoreConfig {
            poll_interval: INTERVAL,
            ..CoreConfig::new(4242)
        }
    }

    fn loopback(script: LoopbackScript) -> (Core<LoopbackSdk>, Arc<LoopbackProbe>) {
        let probe = LoopbackProbe::new();
        let factory_probe = probe.clone();
        let core = Core::create_with(config(), move |params| {
            LoopbackSdk::with_script(params, script, factory_probe)
        })
        .unwrap();
        (core, probe)
    }

    fn started() -> (Core<LoopbackSdk>, Arc<LoopbackProbe>) {
        let (core, probe) = loopback(LoopbackScript::default());
        core.start().unwrap();
        assert!(core.wait_until_initialized(Duration::from_secs(2)));
        (core, probe)
    }

    #[test]
    fn test_owner_calls_never_overlap() {
        let (core, probe) = loopback(LoopbackScript::default());
        core.start().unwrap();

        thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    let mut rng = rand::thread_rng();
                    for _ in 0..25 {
                        let pause = Duration::from_micros(rng.gen_range(0..300));
                        core.run_on_owner(move |sdk| sdk.busy(pause)).unwrap();
                    }
                });
            }
        });

        assert_eq!(probe.max_in_flight(), 1);
        assert_eq!(probe.affinity_violations(), 0);
        assert!(probe.calls() >= 200);
        assert_eq!(probe.owner_thread(), Some(core.owner_thread_id()));
    }

    #[test]
    fn test_completions_arrive_while_queue_is_saturated() {
        let (core, probe) = started();
        let stop = AtomicBool::new(false);

        thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    while !stop.load(Ordering::Relaxed) {
                        core.run_on_owner(|sdk| sdk.busy(Duration::from_micros(200)))
                            .unwrap();
                    }
                });
            }
            thread::sleep(INTERVAL * 5);

            let before = core.drain_stats().total;
            let start = Instant::now();
            let timeout = Duration::from_secs(1);
            let payload = core.call_correlated(timeout, |sdk, id| {
                sdk.submit(LoopbackOp::succeed(1), Some(id))
            });
            let waited = start.elapsed();

            thread::sleep(INTERVAL * 20);
            let drained = core.drain_stats().total - before;
            let intervals = (start.elapsed().as_millis() / INTERVAL.as_millis()) as u64;

            // Release the callers before asserting so the scope can end
            stop.store(true, Ordering::Relaxed);

            assert_eq!(payload.unwrap().as_integer(), Some(1));
            assert!(waited < timeout / 2, "completion took {:?} under load", waited);
            assert!(
                drained * 2 >= intervals,
                "{} drains in {} intervals under load",
                drained,
                intervals
            );
        });

        assert_eq!(probe.max_in_flight(), 1);
        assert_eq!(probe.affinity_violations(), 0);
    }

    #[test]
    fn test_start_is_idempotent() {
        let (core, probe) = loopback(LoopbackScript::default());
        assert_eq!(core.state(), LifecycleState::Created);

        core.start().unwrap();
        core.start().unwrap();
        assert!(core.wait_until_initialized(Duration::from_secs(2)));
        assert_eq!(core.state(), LifecycleState::Initialized);

        // A single loop drains at most once per interval
        let before = core.drain_stats().total;
        let start = Instant::now();
        thread::sleep(INTERVAL * 20);
        let drained = core.drain_stats().total - before;
        let intervals = (start.elapsed().as_millis() / INTERVAL.as_millis()) as u64;
        assert!(
            drained <= intervals + 2,
            "{} drains in {} intervals",
            drained,
            intervals
        );

        core.shutdown();
        assert_eq!(probe.max_in_flight(), 1);
    }

    #[test]
    fn test_shutdown_before_start() {
        let (core, probe) = loopback(LoopbackScript::default());

        let start = Instant::now();
        core.shutdown();
        assert!(start.elapsed() < Duration::from_secs(1));

        assert_eq!(core.state(), LifecycleState::Destroyed);
        assert!(probe.is_destroyed());
        assert_eq!(probe.drains(), 0);

        // Idempotent
        core.shutdown();
        assert!(matches!(core.start(), Err(DispatchError::Unavailable)));
    }

    #[test]
    fn test_calls_after_shutdown_are_unavailable() {
        let (core, _probe) = started();
        core.shutdown();

        let start = Instant::now();
        let err = core.run_on_owner(|sdk| sdk.current_user_id()).unwrap_err();
        assert!(err.is_unavailable());
        assert!(start.elapsed() < Duration::from_millis(100));
        assert!(!core.is_initialized());
    }

    #[test]
    fn test_shutdown_with_queued_calls() {
        let (core, probe) = started();
        let core = &core;

        thread::scope(|scope| {
            let blocker = scope.spawn(|| {
                core.run_on_owner(|sdk| sdk.busy(Duration::from_millis(200)))
            });
            thread::sleep(Duration::from_millis(50));

            let queued: Vec<_> = (0..3)
                .map(|i| scope.spawn(move || core_call(core, i)))
                .collect();
            thread::sleep(Duration::from_millis(50));

            let start = Instant::now();
            core.shutdown();
            assert!(start.elapsed() < Duration::from_secs(2));

            assert!(blocker.join().unwrap().is_ok());
            for handle in queued {
                match handle.join().unwrap() {
                    Ok(_) => {}
                    Err(err) => assert!(err.is_unavailable()),
                }
            }
        });

        assert!(probe.is_destroyed());
        assert_eq!(probe.affinity_violations(), 0);
    }

    fn core_call(core: &Core<LoopbackSdk>, value: u32) -> Result<u32> {
        core.run_on_owner(move |_| value)
    }

    #[test]
    fn test_readiness_after_warmup() {
        let script = LoopbackScript {
            warmup_drains: 3,
            ..LoopbackScript::default()
        };
        let (core, _probe) = loopback(script);

        // No loop, no readiness
        let start = Instant::now();
        assert!(!core.wait_until_initialized(INTERVAL * 5));
        assert!(start.elapsed() >= INTERVAL * 5);

        core.start().unwrap();
        assert!(core.wait_until_initialized(Duration::from_secs(2)));
        assert!(core.is_initialized());

        let stats = core.drain_stats();
        assert_eq!(stats.failed, 3);
        assert!(stats.total >= 4);
    }

    #[test]
    fn test_call_correlated_success() {
        let (core, _probe) = started();

        let payload = core
            .call_correlated(Duration::from_secs(2), |sdk, id| {
                sdk.submit(LoopbackOp::succeed("join-secret").after(3), Some(id))
            })
            .unwrap();
        assert_eq!(payload.as_text(), Some("join-secret"));
    }

    #[test]
    fn test_call_correlated_failures() {
        let (core, _probe) = started();

        // Accepted, completes with a failure
        let err = core
            .call_correlated(Duration::from_secs(2), |sdk, id| {
                sdk.submit(LoopbackOp::fail(ResultCode::LOBBY_FULL), Some(id))
            })
            .unwrap_err();
        assert_eq!(err.code(), Some(ResultCode::LOBBY_FULL));

        // Rejected immediately, nothing recorded
        let before = core.registry().len();
        let err = core
            .begin_correlated(|sdk, id| {
                sdk.submit(LoopbackOp::reject(ResultCode::INVALID_PAYLOAD), Some(id))
            })
            .unwrap_err();
        assert_eq!(err.code(), Some(ResultCode::INVALID_PAYLOAD));
        assert_eq!(core.registry().len(), before);
    }

    #[test]
    fn test_call_correlated_times_out_without_poll_loop() {
        let (core, _probe) = loopback(LoopbackScript::default());

        let timeout = Duration::from_millis(150);
        let start = Instant::now();
        let err = core
            .call_correlated(timeout, |sdk, id| sdk.submit(LoopbackOp::succeed(1), Some(id)))
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(start.elapsed() >= timeout);
    }

    #[test]
    fn test_begin_then_wait() {
        let (core, _probe) = started();

        let id = core
            .begin_correlated(|sdk, id| sdk.submit(LoopbackOp::succeed(vec![1u8, 2, 3]), Some(id)))
            .unwrap();
        let result = core
            .wait_for_callback_result(id, Duration::from_secs(2))
            .unwrap();
        assert_eq!(result.id, id);
        assert_eq!(result.payload.as_bytes(), Some(&[1u8, 2, 3][..]));
        assert!(core.callback_result(id).is_ok());
    }

    #[test]
    fn test_manual_record_and_lookup() {
        let (core, _probe) = loopback(LoopbackScript::default());
        let id = core.new_callback_id();

        assert!(core.lookup_result(id).is_none());
        assert!(matches!(
            core.callback_result(id),
            Err(DispatchError::NotFound(missing)) if missing == id
        ));

        core.record_result(id, ResultCode::OK, Payload::from("data"));
        assert_eq!(core.lookup_result(id).unwrap().payload, Payload::from("data"));
    }

    #[test]
    fn test_fire_and_forget() {
        let (core, _probe) = started();

        core.fire_and_forget(|sdk| sdk.submit(LoopbackOp::succeed("ignored"), None))
            .unwrap();
        let pending = core
            .poll_until(Duration::from_secs(2), |sdk| {
                (sdk.pending_operations() == 0).then_some(())
            });
        assert!(pending.is_ok());

        let err = core
            .fire_and_forget(|sdk| sdk.submit(LoopbackOp::reject(ResultCode::RATE_LIMITED), None))
            .unwrap_err();
        assert_eq!(err.code(), Some(ResultCode::RATE_LIMITED));
    }

    #[test]
    fn test_poll_until_current_user() {
        let script = LoopbackScript {
            warmup_drains: 2,
            current_user_id: Some(31337),
            ..LoopbackScript::default()
        };
        let (core, _probe) = loopback(script);

        // Not ready until the loop runs
        assert_eq!(core.run_on_owner(|sdk| sdk.current_user_id()).unwrap(), None);
        assert!(core
            .poll_until(INTERVAL * 5, |sdk| sdk.current_user_id())
            .unwrap_err()
            .is_timeout());

        core.start().unwrap();
        let user = core
            .poll_until(Duration::from_secs(2), |sdk| sdk.current_user_id())
            .unwrap();
        assert_eq!(user, 31337);
    }

    #[test]
    fn test_poll_until_shares_one_deadline() {
        let script = LoopbackScript {
            current_user_id: None,
            ..LoopbackScript::default()
        };
        let (core, _probe) = loopback(script);
        core.start().unwrap();

        let timeout = Duration::from_millis(200);
        let start = Instant::now();
        let err = core
            .poll_until(timeout, |sdk| sdk.current_user_id())
            .unwrap_err();
        let elapsed = start.elapsed();

        assert!(err.is_timeout());
        assert!(elapsed >= timeout);
        assert!(elapsed < timeout + INTERVAL * 10, "overran: {:?}", elapsed);
    }

    #[test]
    fn test_panicking_call_leaves_owner_usable() {
        let (core, _probe) = started();

        let err = core
            .run_on_owner(|_| -> u32 { panic!("feature wrapper bug") })
            .unwrap_err();
        assert!(matches!(err, DispatchError::Panicked(_)));

        assert_eq!(core.run_on_owner(|sdk| sdk.current_user_id()).unwrap(), Some(1));
    }

    #[test]
    fn test_reentrant_call_is_reported() {
        let (core, _probe) = started();
        let core = Arc::new(core);

        let inner = core.clone();
        let err = core
            .run_on_owner(move |_| inner.run_on_owner(|_| 1).is_ok())
            .unwrap_err();
        assert!(matches!(err, DispatchError::Panicked(_)));

        // Still serving
        assert!(core.run_on_owner(|_| ()).is_ok());
    }

    #[test]
    fn test_shutdown_from_owner_thread_reaches_destroyed() {
        let (core, probe) = started();
        let core = Arc::new(core);

        let inner = core.clone();
        core.run_on_owner(move |_| inner.shutdown()).unwrap();

        let destroyed = wait::poll_until(Duration::from_secs(2), INTERVAL, || {
            (core.state() == LifecycleState::Destroyed).then_some(())
        });
        assert!(destroyed.is_some(), "stuck in {:?}", core.state());
        assert!(probe.is_destroyed());
        assert!(core.run_on_owner(|_| ()).unwrap_err().is_unavailable());
    }

    #[test]
    fn test_create_failure() {
        let script = LoopbackScript {
            create_result: ResultCode::NOT_INSTALLED,
            ..LoopbackScript::default()
        };
        let probe = LoopbackProbe::new();
        let result = Core::create_with(config(), move |params| {
            LoopbackSdk::with_script(params, script, probe)
        });

        match result {
            Err(err) => assert_eq!(err.code(), Some(ResultCode::NOT_INSTALLED)),
            Ok(_) => panic!("creation should fail"),
        }
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = CoreConfig {
            queue_capacity: 0,
            ..config()
        };
        let result = Core::<LoopbackSdk>::create(config);
        assert!(matches!(result, Err(DispatchError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_async_surface() {
        let (core, _probe) = loopback(LoopbackScript::default());
        core.start().unwrap();
        core.initialized_future(Duration::from_secs(2)).await.unwrap();

        let calls = (0..4u32).map(|i| {
            let core = &core;
            async move {
                core.call_correlated_async(Duration::from_secs(2), move |sdk, id| {
                    sdk.submit(LoopbackOp::succeed(i64::from(i)), Some(id))
                })
                .await
            }
        });
        let payloads = futures::future::join_all(calls).await;

        for (i, payload) in payloads.into_iter().enumerate() {
            assert_eq!(payload.unwrap().as_integer(), Some(i as i64));
        }

        let user = core
            .run_on_owner_async(|sdk| sdk.current_user_id())
            .await
            .unwrap();
        assert_eq!(user, Some(1));

        // Shutdown joins the owner thread; keep it off the runtime thread
        tokio::task::spawn_blocking(move || core.shutdown())
            .await
            .unwrap();
    }
}
