//! In-process stand-in for the native runtime.
//!
//! `LoopbackSdk` behaves like the real library where the dispatcher is
//! concerned: drains fail until the runtime has warmed up, async operations
//! complete a few drains after they were triggered, and completions are
//! delivered with the token they were triggered with. Every entry point
//! reports to a shared [`LoopbackProbe`] so tests can check that the instance
//! is only touched from its owner thread, one call at a time.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};
use std::time::Duration;

use super::{forward_native_log, Completion, CreateParams, LogLevel, NativeSdk, ResultCode};
use crate::registry::{CallbackId, Payload};

/// How a loopback instance behaves
#[derive(Debug, Clone)]
pub struct LoopbackScript {
    /// Number of drains that fail with `NotRunning` before the first success
    pub warmup_drains: u32,
    /// Status returned by "create instance"
    pub create_result: ResultCode,
    /// Current user id, visible once the runtime is ready
    pub current_user_id: Option<i64>,
    /// Time spent inside every feature call
    pub call_latency: Duration,
}

impl Default for LoopbackScript {
    fn default() -> Self {
        Self {
            warmup_drains: 1,
            create_result: ResultCode::OK,
            current_user_id: Some(1),
            call_latency: Duration::ZERO,
        }
    }
}

/// Counters shared between a loopback instance and the test observing it
#[derive(Debug, Default)]
pub struct LoopbackProbe {
    owner: OnceLock<ThreadId>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: AtomicU64,
    drains: AtomicU64,
    affinity_violations: AtomicU64,
    destroyed: AtomicBool,
}

impl LoopbackProbe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Thread the instance was created on
    pub fn owner_thread(&self) -> Option<ThreadId> {
        self.owner.get().copied()
    }

    /// Number of entry points invoked, drains included
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn drains(&self) -> u64 {
        self.drains.load(Ordering::SeqCst)
    }

    /// Highest number of entry points that were running at the same time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Entry points invoked from a thread other than the owner
    pub fn affinity_violations(&self) -> u64 {
        self.affinity_violations.load(Ordering::SeqCst)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    fn enter(&self) -> Entry<'_> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.owner.get() != Some(&thread::current().id()) {
            self.affinity_violations.fetch_add(1, Ordering::SeqCst);
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        Entry { probe: self }
    }
}

/// Marks one entry point as running until dropped
struct Entry<'a> {
    probe: &'a LoopbackProbe,
}

impl Drop for Entry<'_> {
    fn drop(&mut self) {
        self.probe.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// An async operation to trigger on a loopback instance
#[derive(Debug, Clone)]
pub struct LoopbackOp {
    /// Status returned when the operation is triggered
    pub immediate: ResultCode,
    /// Status delivered with the completion
    pub outcome: ResultCode,
    /// Data delivered with the completion
    pub payload: Payload,
    /// Number of successful drains before the completion fires
    pub after_drains: u32,
}

impl LoopbackOp {
    /// An operation that completes successfully on the next drain
    pub fn succeed(payload: impl Into<Payload>) -> Self {
        Self {
            immediate: ResultCode::OK,
            outcome: ResultCode::OK,
            payload: payload.into(),
            after_drains: 1,
        }
    }

    /// An operation that is accepted but completes with `code`
    pub fn fail(code: ResultCode) -> Self {
        Self {
            immediate: ResultCode::OK,
            outcome: code,
            payload: Payload::Empty,
            after_drains: 1,
        }
    }

    /// An operation that is rejected when triggered
    pub fn reject(code: ResultCode) -> Self {
        Self {
            immediate: code,
            ..Self::fail(code)
        }
    }

    /// Complete after `drains` successful drains instead of one
    pub fn after(mut self, drains: u32) -> Self {
        self.after_drains = drains.max(1);
        self
    }
}

struct PendingOp {
    token: Option<CallbackId>,
    outcome: ResultCode,
    payload: Payload,
    remaining_drains: u32,
}

/// Software implementation of the native runtime
pub struct LoopbackSdk {
    params: CreateParams,
    script: LoopbackScript,
    probe: Arc<LoopbackProbe>,
    drains_seen: u32,
    ready: bool,
    pending: VecDeque<PendingOp>,
}

impl LoopbackSdk {
    /// Create an instance on the current thread, which becomes its owner
    pub fn with_script(
        params: CreateParams,
        script: LoopbackScript,
        probe: Arc<LoopbackProbe>,
    ) -> Result<Self, ResultCode> {
        if !script.create_result.is_ok() {
            return Err(script.create_result);
        }

        let _ = probe.owner.set(thread::current().id());

        Ok(Self {
            params,
            script,
            probe,
            drains_seen: 0,
            ready: false,
            pending: VecDeque::new(),
        })
    }

    /// The probe this instance reports to
    pub fn probe(&self) -> Arc<LoopbackProbe> {
        self.probe.clone()
    }

    /// Parameters the instance was created with
    pub fn params(&self) -> &CreateParams {
        &self.params
    }

    /// Trigger an async operation.
    ///
    /// Without a token the operation still runs, but its completion has
    /// nobody to be delivered to and is discarded.
    pub fn submit(&mut self, op: LoopbackOp, token: Option<CallbackId>) -> ResultCode {
        let _entry = self.probe.enter();
        self.spend_latency();

        if !op.immediate.is_ok() {
            return op.immediate;
        }

        self.pending.push_back(PendingOp {
            token,
            outcome: op.outcome,
            payload: op.payload,
            remaining_drains: op.after_drains,
        });
        ResultCode::OK
    }

    /// Synchronous getter that only answers once the runtime is ready
    pub fn current_user_id(&self) -> Option<i64> {
        let _entry = self.probe.enter();
        self.spend_latency();

        if self.ready {
            self.script.current_user_id
        } else {
            None
        }
    }

    /// A synchronous call that keeps the instance busy for `duration`
    pub fn busy(&mut self, duration: Duration) -> u64 {
        let _entry = self.probe.enter();
        thread::sleep(duration);
        self.probe.calls()
    }

    /// Operations triggered but not completed yet
    pub fn pending_operations(&self) -> usize {
        self.pending.len()
    }

    fn spend_latency(&self) {
        if !self.script.call_latency.is_zero() {
            thread::sleep(self.script.call_latency);
        }
    }
}

impl NativeSdk for LoopbackSdk {
    fn create(params: CreateParams) -> Result<Self, ResultCode> {
        Self::with_script(params, LoopbackScript::default(), LoopbackProbe::new())
    }

    fn run_callbacks(&mut self, completed: &mut Vec<Completion>) -> ResultCode {
        let _entry = self.probe.enter();
        self.probe.drains.fetch_add(1, Ordering::SeqCst);

        if self.drains_seen < self.script.warmup_drains {
            self.drains_seen += 1;
            return ResultCode::NOT_RUNNING;
        }

        if !self.ready {
            self.ready = true;
            forward_native_log(
                self.params.log_level,
                LogLevel::Info,
                "loopback runtime connected",
            );
        }

        let mut still_pending = VecDeque::with_capacity(self.pending.len());
        while let Some(mut op) = self.pending.pop_front() {
            op.remaining_drains = op.remaining_drains.saturating_sub(1);
            if op.remaining_drains > 0 {
                still_pending.push_back(op);
                continue;
            }

            match op.token {
                Some(token) => completed.push(Completion {
                    token,
                    code: op.outcome,
                    payload: op.payload,
                }),
                None => forward_native_log(
                    self.params.log_level,
                    LogLevel::Debug,
                    "completion without callback discarded",
                ),
            }
        }
        self.pending = still_pending;

        ResultCode::OK
    }

    fn destroy(self) {
        let _entry = self.probe.enter();
        self.probe.destroyed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::CreateFlags;

    fn params() -> CreateParams {
        CreateParams {
            client_id: 1,
            flags: CreateFlags::DEFAULT,
            log_level: LogLevel::Debug,
        }
    }

    #[test]
    fn test_warmup_then_ready() {
        let probe = LoopbackProbe::new();
        let script = LoopbackScript {
            warmup_drains: 2,
            ..LoopbackScript::default()
        };
        let mut sdk = LoopbackSdk::with_script(params(), script, probe.clone()).unwrap();
        let mut completed = Vec::new();

        assert_eq!(sdk.current_user_id(), None);
        assert_eq!(sdk.run_callbacks(&mut completed), ResultCode::NOT_RUNNING);
        assert_eq!(sdk.run_callbacks(&mut completed), ResultCode::NOT_RUNNING);
        assert_eq!(sdk.run_callbacks(&mut completed), ResultCode::OK);
        assert_eq!(sdk.current_user_id(), Some(1));

        assert_eq!(probe.drains(), 3);
        assert_eq!(probe.affinity_violations(), 0);
        assert_eq!(probe.max_in_flight(), 1);
    }

    #[test]
    fn test_completion_carries_token() {
        let probe = LoopbackProbe::new();
        let script = LoopbackScript {
            warmup_drains: 0,
            ..LoopbackScript::default()
        };
        let mut sdk = LoopbackSdk::with_script(params(), script, probe).unwrap();
        let token = CallbackId::from_raw(77);
        let mut completed = Vec::new();

        assert_eq!(
            sdk.submit(LoopbackOp::succeed("secret").after(2), Some(token)),
            ResultCode::OK
        );
        assert_eq!(sdk.submit(LoopbackOp::fail(ResultCode::CONFLICT), None), ResultCode::OK);
        assert_eq!(sdk.pending_operations(), 2);

        // First drain: the untracked failure fires and is discarded
        sdk.run_callbacks(&mut completed);
        assert!(completed.is_empty());
        assert_eq!(sdk.pending_operations(), 1);

        sdk.run_callbacks(&mut completed);
        assert_eq!(
            completed,
            vec![Completion {
                token,
                code: ResultCode::OK,
                payload: Payload::from("secret"),
            }]
        );
        assert_eq!(sdk.pending_operations(), 0);
    }

    #[test]
    fn test_rejected_operation_is_not_queued() {
        let mut sdk = LoopbackSdk::create(params()).unwrap();
        let code = sdk.submit(
            LoopbackOp::reject(ResultCode::INVALID_PAYLOAD),
            Some(CallbackId::from_raw(1)),
        );
        assert_eq!(code, ResultCode::INVALID_PAYLOAD);
        assert_eq!(sdk.pending_operations(), 0);
    }

    #[test]
    fn test_create_failure() {
        let script = LoopbackScript {
            create_result: ResultCode::NOT_INSTALLED,
            ..LoopbackScript::default()
        };
        let result = LoopbackSdk::with_script(params(), script, LoopbackProbe::new());
        assert_eq!(result.err(), Some(ResultCode::NOT_INSTALLED));
    }

    #[test]
    fn test_foreign_thread_is_counted() {
        let probe = LoopbackProbe::new();
        let sdk = LoopbackSdk::with_script(params(), LoopbackScript::default(), probe.clone())
            .unwrap();

        thread::spawn(move || {
            let _ = sdk.current_user_id();
            sdk.destroy();
        })
        .join()
        .unwrap();

        assert_eq!(probe.affinity_violations(), 2);
        assert!(probe.is_destroyed());
    }
}
