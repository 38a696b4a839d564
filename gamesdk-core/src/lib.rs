//! gamesdk-core - Thread-affinity dispatcher for a single-threaded game SDK
//!
//! The native runtime this crate wraps must be created, called, polled and
//! destroyed from one thread, and reports the outcome of async operations by
//! firing callbacks during a poll. This library owns that thread and lets
//! any number of threads and async tasks use the runtime safely: calls are
//! marshalled onto the owner thread, completions are correlated with their
//! callers through callback ids, and readiness is observable.

/// Owner-thread construction and CPU placement
pub mod arch;

/// Client facade over a started core
pub mod client;

/// Dispatcher configuration
pub mod config;

/// Call queue and owner-thread loop
pub mod dispatch;

/// Error types
pub mod error;

/// Lifecycle controller
pub mod lifecycle;

/// Logging setup
pub mod logging;

/// Downward boundary to the native runtime
pub mod native;

/// Callback correlation registry
pub mod registry;

/// Readiness and result waiters
pub mod wait;

pub use client::Client;
pub use config::CoreConfig;
pub use dispatch::DrainStats;
pub use error::{DispatchError, Result};
pub use lifecycle::{Core, LifecycleState};
pub use native::{CreateFlags, LogLevel, NativeSdk, ResultCode};
pub use registry::{CallbackId, CallbackResult, Payload};
pub use wait::WaitFuture;
