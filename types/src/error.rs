//! Error taxonomy and native code translation.
//!
//! Native collaborators report failures as [`NativeError`] (a status from the
//! native code space plus a message). The lifecycle never surfaces those
//! directly: every native failure is mapped into a [`LifecycleError`] at the
//! boundary where it happened.

use std::time::Duration;

use thiserror::Error;

use crate::{RequestId, ResultCode};

/// Status codes of the native code space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeStatus {
    InvalidParameter,
    OutOfMemory,
    PermissionDenied,
    AlreadyExists,
    InvalidOperation,
    NotSupported,
    Io,
    Unknown(i32),
}

impl NativeStatus {
    /// Map a raw native return code.
    ///
    /// Returns `None` for `0` (success): success is not a status of an error.
    #[must_use]
    pub fn from_raw(code: i32) -> Option<Self> {
        match code {
            0 => None,
            -22 => Some(Self::InvalidParameter),
            -12 => Some(Self::OutOfMemory),
            -13 => Some(Self::PermissionDenied),
            -17 => Some(Self::AlreadyExists),
            -38 => Some(Self::InvalidOperation),
            -95 => Some(Self::NotSupported),
            -5 => Some(Self::Io),
            other => Some(Self::Unknown(other)),
        }
    }

    #[must_use]
    pub fn raw(self) -> i32 {
        match self {
            Self::InvalidParameter => -22,
            Self::OutOfMemory => -12,
            Self::PermissionDenied => -13,
            Self::AlreadyExists => -17,
            Self::InvalidOperation => -38,
            Self::NotSupported => -95,
            Self::Io => -5,
            Self::Unknown(code) => code,
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::InvalidParameter => "invalid parameter",
            Self::OutOfMemory => "out of memory",
            Self::PermissionDenied => "permission denied",
            Self::AlreadyExists => "already exists",
            Self::InvalidOperation => "invalid operation",
            Self::NotSupported => "not supported",
            Self::Io => "i/o error",
            Self::Unknown(_) => "unknown error",
        }
    }
}

/// A failure reported by the native collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{} ({}): {message}", .status.label(), .status.raw())]
pub struct NativeError {
    status: NativeStatus,
    message: String,
}

impl NativeError {
    #[must_use]
    pub fn new(status: NativeStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Transport-level failure (pipe closed, process gone, framing error).
    #[must_use]
    pub fn io(message: impl Into<String>) -> Self {
        Self::new(NativeStatus::Io, message)
    }

    #[must_use]
    pub fn status(&self) -> NativeStatus {
        self.status
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<anyhow::Error> for NativeError {
    fn from(err: anyhow::Error) -> Self {
        Self::io(format!("{err:#}"))
    }
}

/// Errors surfaced by the handle lifecycle.
#[derive(Debug, Clone, Error)]
pub enum LifecycleError {
    /// No live handle and no way to lazily create one.
    #[error("{operation}: not running")]
    NotRunning { operation: &'static str },

    /// The native side reports the resource is already held.
    #[error("{operation}: already running ({source})")]
    AlreadyRunning {
        operation: &'static str,
        #[source]
        source: NativeError,
    },

    /// Handle acquisition or subscription failed; nothing was retained.
    #[error("initialization failed: {source}")]
    InitializationFailed {
        #[source]
        source: NativeError,
    },

    /// A value outside its defined range, or empty where one is required.
    #[error("invalid argument `{name}`: {reason}")]
    InvalidArgument { name: &'static str, reason: String },

    /// A native call returned a non-success code.
    #[error("{operation} failed: {source}")]
    OperationFailed {
        operation: &'static str,
        #[source]
        source: NativeError,
    },

    /// The waiter was cancelled before a response arrived.
    #[error("request {request_id} cancelled")]
    Cancelled { request_id: RequestId },

    /// No response arrived within the configured timeout.
    #[error("request {request_id} timed out after {after:?}")]
    TimedOut {
        request_id: RequestId,
        after: Duration,
    },

    /// The response arrived but carried a non-success result.
    #[error("request {request_id} completed with {}", .result.label())]
    CommandFailed {
        request_id: RequestId,
        result: ResultCode,
        payload: Option<serde_json::Value>,
    },
}

impl LifecycleError {
    #[must_use]
    pub fn not_running(operation: &'static str) -> Self {
        Self::NotRunning { operation }
    }

    #[must_use]
    pub fn invalid_argument(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name,
            reason: reason.into(),
        }
    }

    /// Translate a native failure raised while acquiring a handle.
    #[must_use]
    pub fn from_acquire(err: NativeError) -> Self {
        match err.status() {
            NativeStatus::AlreadyExists => Self::AlreadyRunning {
                operation: "acquire",
                source: err,
            },
            _ => Self::InitializationFailed { source: err },
        }
    }

    /// Translate a native failure raised by an operation on a live handle.
    #[must_use]
    pub fn from_native(operation: &'static str, err: NativeError) -> Self {
        match err.status() {
            NativeStatus::InvalidParameter => Self::InvalidArgument {
                name: operation,
                reason: err.message().to_string(),
            },
            _ => Self::OperationFailed {
                operation,
                source: err,
            },
        }
    }

    #[must_use]
    pub fn is_not_running(&self) -> bool {
        matches!(self, Self::NotRunning { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_status_round_trips_known_codes() {
        for code in [-22, -12, -13, -17, -38, -95, -5] {
            let status = NativeStatus::from_raw(code).unwrap();
            assert_eq!(status.raw(), code);
            assert!(!matches!(status, NativeStatus::Unknown(_)));
        }
    }

    #[test]
    fn native_status_success_is_not_an_error() {
        assert_eq!(NativeStatus::from_raw(0), None);
    }

    #[test]
    fn native_status_unknown_keeps_raw_code() {
        assert_eq!(NativeStatus::from_raw(-4242), Some(NativeStatus::Unknown(-4242)));
        assert_eq!(NativeStatus::Unknown(-4242).raw(), -4242);
    }

    #[test]
    fn acquire_already_exists_maps_to_already_running() {
        let err = LifecycleError::from_acquire(NativeError::new(
            NativeStatus::AlreadyExists,
            "server handle exists",
        ));
        assert!(matches!(err, LifecycleError::AlreadyRunning { .. }));
    }

    #[test]
    fn acquire_other_failures_map_to_initialization_failed() {
        let err = LifecycleError::from_acquire(NativeError::new(NativeStatus::OutOfMemory, "oom"));
        assert!(matches!(err, LifecycleError::InitializationFailed { .. }));
    }

    #[test]
    fn invalid_parameter_maps_to_invalid_argument() {
        let err = LifecycleError::from_native(
            "send",
            NativeError::new(NativeStatus::InvalidParameter, "bad target"),
        );
        match err {
            LifecycleError::InvalidArgument { name, reason } => {
                assert_eq!(name, "send");
                assert_eq!(reason, "bad target");
            }
            other => panic!("expected InvalidArgument, got {other:?}"),
        }
    }

    #[test]
    fn other_native_failures_map_to_operation_failed() {
        let err = LifecycleError::from_native("respond", NativeError::io("pipe closed"));
        assert!(matches!(
            err,
            LifecycleError::OperationFailed {
                operation: "respond",
                ..
            }
        ));
        assert_eq!(
            err.to_string(),
            "respond failed: i/o error (-5): pipe closed"
        );
    }

    #[test]
    fn anyhow_errors_become_io_failures() {
        let err: NativeError = anyhow::anyhow!("writer channel closed").into();
        assert_eq!(err.status(), NativeStatus::Io);
        assert_eq!(err.message(), "writer channel closed");
    }
}
