//! Error types for the dispatcher.

use std::time::Duration;

use thiserror::Error;

use crate::native::ResultCode;
use crate::registry::CallbackId;

/// Errors surfaced to callers of the dispatcher
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The native instance is missing or already destroyed
    #[error("native runtime unavailable")]
    Unavailable,

    /// A wait exceeded its deadline without a result
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// A native call or completion reported a non-success status
    #[error("native call failed: {0}")]
    Native(ResultCode),

    /// No completion has been recorded for this callback id yet
    #[error("no result recorded for {0}")]
    NotFound(CallbackId),

    /// A closure panicked while running on the owner thread
    #[error("owner thread task panicked: {0}")]
    Panicked(String),

    /// The owner thread or a waiter thread could not be spawned
    #[error("failed to spawn thread")]
    Spawn(#[source] std::io::Error),

    /// The configuration was rejected before anything was started
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl DispatchError {
    /// The native status code behind this error, if there is one
    pub fn code(&self) -> Option<ResultCode> {
        match self {
            Self::Native(code) => Some(*code),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable)
    }
}

/// Result type used throughout the crate
pub type Result<T, E = DispatchError> = std::result::Result<T, E>;
