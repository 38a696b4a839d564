//! Callback correlation registry.
//!
//! Native async operations are triggered with an opaque token and complete
//! later, during a drain on the owner thread. The registry links the two
//! halves: callers allocate a [`CallbackId`] before triggering an operation,
//! the poll loop records the completion under that id, and waiters look it up.
//!
//! The log is append-only and ordered by completion. Entries are never removed
//! by readers; they expire once they are older than the configured retention.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::error::{DispatchError, Result};
use crate::native::ResultCode;

/// Opaque token correlating a native async operation with its completion.
///
/// Ids are allocated from a process-wide counter and never reused.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackId(u64);

impl CallbackId {
    /// Rebuild an id from the raw token handed back by the native runtime
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw token to hand to the native runtime
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "callback_{}", self.0)
    }
}

impl fmt::Debug for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Process-wide id counter, so ids stay unique across registries
static NEXT_CALLBACK_ID: AtomicU64 = AtomicU64::new(1);

/// Operation-specific data carried by a completion.
///
/// The waiter that triggered the operation knows which variant to expect.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Payload {
    /// The operation produces no data
    #[default]
    Empty,
    /// A numeric result such as an entity id or a count
    Integer(i64),
    /// A textual result such as a secret or a route
    Text(String),
    /// Raw bytes such as a storage read
    Bytes(Vec<u8>),
}

impl Payload {
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(bytes) => Some(bytes.as_slice()),
            _ => None,
        }
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<i64> for Payload {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

/// A recorded completion
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackResult {
    /// Id the operation was triggered with
    pub id: CallbackId,
    /// Final native status, passed through unchanged
    pub code: ResultCode,
    /// Operation-specific data
    pub payload: Payload,
    /// When the completion was recorded
    pub recorded_at: Instant,
}

impl CallbackResult {
    /// Translate the native status into a caller-visible result
    pub fn into_payload(self) -> Result<Payload> {
        if self.code.is_ok() {
            Ok(self.payload)
        } else {
            Err(DispatchError::Native(self.code))
        }
    }
}

/// Append-only store of completions keyed by [`CallbackId`]
#[derive(Debug)]
pub struct CallbackRegistry {
    /// Completions in the order they were recorded (front is oldest)
    entries: RwLock<VecDeque<CallbackResult>>,
    /// How long a completion stays readable after it was recorded
    retention: Duration,
}

impl CallbackRegistry {
    /// Create an empty registry whose entries expire after `retention`
    pub fn new(retention: Duration) -> Self {
        Self {
            entries: RwLock::new(VecDeque::new()),
            retention,
        }
    }

    /// Allocate a fresh, never reused callback id
    pub fn next_id(&self) -> CallbackId {
        CallbackId(NEXT_CALLBACK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Append a completion for `id`.
    ///
    /// Expired entries are swept first, so the log stays bounded by the
    /// completion rate times the retention window.
    pub fn record(&self, id: CallbackId, code: ResultCode, payload: Payload) {
        let now = Instant::now();
        let mut entries = self.entries.write();

        let swept = Self::sweep_locked(&mut entries, now, self.retention);
        if swept > 0 {
            tracing::trace!(swept, "expired callback results removed");
        }

        entries.push_back(CallbackResult {
            id,
            code,
            payload,
            recorded_at: now,
        });
    }

    /// Find the completion recorded for `id`, if any.
    ///
    /// This is a linear scan; the first completion recorded for an id wins.
    pub fn lookup(&self, id: CallbackId) -> Option<CallbackResult> {
        self.entries
            .read()
            .iter()
            .find(|entry| entry.id == id)
            .cloned()
    }

    /// Like [`lookup`](Self::lookup), but reports a missing entry as an error
    pub fn get(&self, id: CallbackId) -> Result<CallbackResult> {
        self.lookup(id).ok_or(DispatchError::NotFound(id))
    }

    /// Remove every entry older than the retention window.
    ///
    /// Returns the number of removed entries.
    pub fn sweep_expired(&self) -> usize {
        let mut entries = self.entries.write();
        Self::sweep_locked(&mut entries, Instant::now(), self.retention)
    }

    fn sweep_locked(
        entries: &mut VecDeque<CallbackResult>,
        now: Instant,
        retention: Duration,
    ) -> usize {
        let mut swept = 0;
        while let Some(front) = entries.front() {
            if now.saturating_duration_since(front.recorded_at) <= retention {
                break;
            }
            entries.pop_front();
            swept += 1;
        }
        swept
    }

    /// Number of completions currently held
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Retention window for recorded completions
    pub fn retention(&self) -> Duration {
        self.retention
    }
}
