//! Downward boundary to the native game-platform runtime.
//!
//! This module defines what the dispatcher needs from the native library:
//! - creating and destroying an instance
//! - draining pending events ("run callbacks"), which is where deferred
//!   completions are delivered
//! - the status codes every native entry point returns
//!
//! The instance type never needs to be `Send`: it is created, used and
//! destroyed on the owner thread only.

pub mod loopback;

pub use loopback::{LoopbackOp, LoopbackProbe, LoopbackScript, LoopbackSdk};

use std::fmt;

use crate::registry::{CallbackId, Payload};

/// Status code returned by native entry points and carried by completions.
///
/// Unknown codes are preserved as-is so they can be reported verbatim.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ResultCode(i32);

macro_rules! result_codes {
    ($($name:ident = $value:literal => $label:literal,)*) => {
        impl ResultCode {
            $(pub const $name: Self = Self($value);)*

            /// Symbolic name of this code, if it is one of the documented ones
            pub fn name(&self) -> Option<&'static str> {
                match self.0 {
                    $($value => Some($label),)*
                    _ => None,
                }
            }
        }
    };
}

result_codes! {
    OK = 0 => "Ok",
    SERVICE_UNAVAILABLE = 1 => "ServiceUnavailable",
    INVALID_VERSION = 2 => "InvalidVersion",
    LOCK_FAILED = 3 => "LockFailed",
    INTERNAL_ERROR = 4 => "InternalError",
    INVALID_PAYLOAD = 5 => "InvalidPayload",
    INVALID_COMMAND = 6 => "InvalidCommand",
    INVALID_PERMISSIONS = 7 => "InvalidPermissions",
    NOT_FETCHED = 8 => "NotFetched",
    NOT_FOUND = 9 => "NotFound",
    CONFLICT = 10 => "Conflict",
    INVALID_SECRET = 11 => "InvalidSecret",
    INVALID_JOIN_SECRET = 12 => "InvalidJoinSecret",
    NO_ELIGIBLE_ACTIVITY = 13 => "NoEligibleActivity",
    INVALID_INVITE = 14 => "InvalidInvite",
    NOT_AUTHENTICATED = 15 => "NotAuthenticated",
    INVALID_ACCESS_TOKEN = 16 => "InvalidAccessToken",
    APPLICATION_MISMATCH = 17 => "ApplicationMismatch",
    INVALID_DATA_URL = 18 => "InvalidDataUrl",
    INVALID_BASE64 = 19 => "InvalidBase64",
    NOT_FILTERED = 20 => "NotFiltered",
    LOBBY_FULL = 21 => "LobbyFull",
    INVALID_LOBBY_SECRET = 22 => "InvalidLobbySecret",
    INVALID_FILENAME = 23 => "InvalidFilename",
    INVALID_FILE_SIZE = 24 => "InvalidFileSize",
    INVALID_ENTITLEMENT = 25 => "InvalidEntitlement",
    NOT_INSTALLED = 26 => "NotInstalled",
    NOT_RUNNING = 27 => "NotRunning",
    INSUFFICIENT_BUFFER = 28 => "InsufficientBuffer",
    PURCHASE_CANCELED = 29 => "PurchaseCanceled",
    INVALID_GUILD = 30 => "InvalidGuild",
    INVALID_EVENT = 31 => "InvalidEvent",
    INVALID_CHANNEL = 32 => "InvalidChannel",
    INVALID_ORIGIN = 33 => "InvalidOrigin",
    RATE_LIMITED = 34 => "RateLimited",
    OAUTH2_ERROR = 35 => "OAuth2Error",
    SELECT_CHANNEL_TIMEOUT = 36 => "SelectChannelTimeout",
    GET_GUILD_TIMEOUT = 37 => "GetGuildTimeout",
    SELECT_VOICE_FORCE_REQUIRED = 38 => "SelectVoiceForceRequired",
    CAPTURE_SHORTCUT_ALREADY_LISTENING = 39 => "CaptureShortcutAlreadyListening",
    UNAUTHORIZED_FOR_ACHIEVEMENT = 40 => "UnauthorizedForAchievement",
    INVALID_GIFT_CODE = 41 => "InvalidGiftCode",
    PURCHASE_ERROR = 42 => "PurchaseError",
    TRANSACTION_ABORTED = 43 => "TransactionAborted",
    DRAWING_INIT_FAILED = 44 => "DrawingInitFailed",
}

impl ResultCode {
    /// Wrap a raw status code as returned across the native boundary
    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    /// The raw status code
    pub const fn raw(&self) -> i32 {
        self.0
    }

    /// Whether this is the success code
    pub const fn is_ok(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}({})", name, self.0),
            None => write!(f, "Unknown({})", self.0),
        }
    }
}

impl fmt::Debug for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Flags passed to the native "create instance" entry point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CreateFlags(u64);

impl CreateFlags {
    /// Require the platform client to be running
    pub const DEFAULT: Self = Self(0);
    /// Do not require the platform client to be running
    pub const NO_REQUIRE_CLIENT: Self = Self(1);

    pub const fn bits(&self) -> u64 {
        self.0
    }
}

/// Severity of a log line emitted by the native runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
}

/// Re-emit a native log line as a `tracing` event.
///
/// Lines more verbose than `min_level` are dropped.
pub fn forward_native_log(min_level: LogLevel, level: LogLevel, message: &str) {
    if level > min_level {
        return;
    }

    match level {
        LogLevel::Error => tracing::error!(target: "gamesdk::native", "{}", message),
        LogLevel::Warn => tracing::warn!(target: "gamesdk::native", "{}", message),
        LogLevel::Info => tracing::info!(target: "gamesdk::native", "{}", message),
        LogLevel::Debug => tracing::debug!(target: "gamesdk::native", "{}", message),
    }
}

/// Parameters handed to the native "create instance" entry point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateParams {
    /// Application id registered with the platform
    pub client_id: i64,
    /// Creation flags
    pub flags: CreateFlags,
    /// Minimum level of native log lines forwarded to `tracing`
    pub log_level: LogLevel,
}

/// A deferred completion delivered by the native runtime during a drain
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    /// Token the caller supplied when it triggered the operation
    pub token: CallbackId,
    /// Final status of the operation
    pub code: ResultCode,
    /// Operation-specific result data
    pub payload: Payload,
}

/// The native runtime as seen by the dispatcher.
///
/// Every method is invoked on the owner thread only.
pub trait NativeSdk: 'static {
    /// Create a new native instance
    fn create(params: CreateParams) -> Result<Self, ResultCode>
    where
        Self: Sized;

    /// Process pending events.
    ///
    /// Completions fired during this drain are pushed onto `completed`.
    fn run_callbacks(&mut self, completed: &mut Vec<Completion>) -> ResultCode;

    /// Destroy the native instance
    fn destroy(self)
    where
        Self: Sized,
    {
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_code_display() {
        assert_eq!(ResultCode::OK.to_string(), "Ok(0)");
        assert_eq!(ResultCode::NOT_RUNNING.to_string(), "NotRunning(27)");
        assert_eq!(
            ResultCode::DRAWING_INIT_FAILED.to_string(),
            "DrawingInitFailed(44)"
        );
        assert_eq!(ResultCode::from_raw(99).to_string(), "Unknown(99)");
        assert_eq!(ResultCode::from_raw(-1).name(), None);
    }

    #[test]
    fn test_result_code_raw_round_trip() {
        let code = ResultCode::from_raw(21);
        assert_eq!(code, ResultCode::LOBBY_FULL);
        assert_eq!(code.raw(), 21);
        assert!(!code.is_ok());
        assert!(ResultCode::OK.is_ok());
    }

    #[test]
    fn test_log_level_ordering() {
        assert!(LogLevel::Error < LogLevel::Warn);
        assert!(LogLevel::Info < LogLevel::Debug);

        // Filtered lines are simply dropped
        forward_native_log(LogLevel::Error, LogLevel::Debug, "dropped");
        forward_native_log(LogLevel::Debug, LogLevel::Warn, "kept");
    }

    #[test]
    fn test_create_flags() {
        assert_eq!(CreateFlags::default(), CreateFlags::DEFAULT);
        assert_eq!(CreateFlags::NO_REQUIRE_CLIENT.bits(), 1);
    }
}
