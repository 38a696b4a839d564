//! Configuration for the dispatcher.

use std::time::Duration;

use crate::arch::PinPolicy;
use crate::error::{DispatchError, Result};
use crate::native::{CreateFlags, CreateParams, LogLevel};

/// Interval shared by the poll loop and every waiter
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Capacity of the owner-thread work queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 128;

/// How long the client facade waits for the first successful drain
pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long recorded completions stay readable
pub const DEFAULT_RESULT_RETENTION: Duration = Duration::from_secs(300);

/// Configuration for a [`Core`](crate::Core).
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Application id handed to the native "create instance" entry point
    pub client_id: i64,

    /// Native creation flags
    pub flags: CreateFlags,

    /// Interval between drains, also used by every waiter
    pub poll_interval: Duration,

    /// Number of owner-thread tasks that may be queued before submitters wait
    pub queue_capacity: usize,

    /// Deadline for the first successful drain when connecting a client
    pub init_timeout: Duration,

    /// How long a recorded completion stays readable.
    ///
    /// Should exceed the longest timeout any waiter uses.
    pub result_retention: Duration,

    /// Where the owner thread runs
    pub owner_pinning: PinPolicy,

    /// Name of the owner thread
    pub owner_thread_name: String,

    /// Minimum level of native log lines forwarded to `tracing`
    pub native_log_level: LogLevel,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            client_id: 0,
            flags: CreateFlags::DEFAULT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            init_timeout: DEFAULT_INIT_TIMEOUT,
            result_retention: DEFAULT_RESULT_RETENTION,
            owner_pinning: PinPolicy::Unpinned,
            owner_thread_name: "gamesdk-owner".to_string(),
            native_log_level: LogLevel::Info,
        }
    }
}

impl CoreConfig {
    /// Default configuration for an application id
    pub fn new(client_id: i64) -> Self {
        Self {
            client_id,
            ..Self::default()
        }
    }

    /// Check the configuration before anything is spawned
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(DispatchError::InvalidConfig(
                "poll_interval must be non-zero".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(DispatchError::InvalidConfig(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.result_retention.is_zero() {
            return Err(DispatchError::InvalidConfig(
                "result_retention must be non-zero".to_string(),
            ));
        }
        // A completion must stay readable for at least one poll
        if self.result_retention < self.poll_interval {
            return Err(DispatchError::InvalidConfig(
                "result_retention must be at least poll_interval".to_string(),
            ));
        }
        if self.owner_thread_name.contains('\0') {
            return Err(DispatchError::InvalidConfig(
                "owner_thread_name must not contain NUL bytes".to_string(),
            ));
        }
        Ok(())
    }

    /// Parameters for the native "create instance" entry point
    pub fn create_params(&self) -> CreateParams {
        CreateParams {
            client_id: self.client_id,
            flags: self.flags,
            log_level: self.native_log_level,
        }
    }
}
