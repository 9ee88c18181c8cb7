//! Error handling types for workbridge
//!
//! This module provides the error type surfaced to bridge callers.

use std::sync::PoisonError;
use std::time::Duration;
use thiserror::Error;

/// Error returned to callers of bridge operations.
///
/// `Clone` because a single initialization outcome is broadcast to every
/// caller waiting on the gate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// The bridge was closed (explicitly or after a transport failure)
    /// before a terminal message arrived.
    #[error("bridge terminated")]
    Terminated,

    /// The channel transport failed (spawn failure, broken pipe, EOF).
    #[error("transport error: {message}")]
    Transport { message: String },

    /// The background host reported an `error` message for this request.
    #[error("operation failed: {message}")]
    Operation { message: String },

    /// The background host's startup sequence failed.
    #[error("initialization failed: {message}")]
    InitializationFailed { message: String },

    /// No terminal message arrived within the configured request timeout.
    #[error("request timed out after {after:?}")]
    Timeout { after: Duration },

    /// The success payload did not match the operation's result shape.
    #[error("failed to decode response: {message}")]
    Decode { message: String },

    /// A request with the same id is already pending.
    #[error("duplicate request id")]
    DuplicateRequestId,
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

impl BridgeError {
    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        BridgeError::Transport {
            message: message.into(),
        }
    }

    /// Create an operation error
    pub fn operation(message: impl Into<String>) -> Self {
        BridgeError::Operation {
            message: message.into(),
        }
    }

    /// Create an initialization error
    pub fn initialization_failed(message: impl Into<String>) -> Self {
        BridgeError::InitializationFailed {
            message: message.into(),
        }
    }

    /// Create a decode error
    pub fn decode(message: impl Into<String>) -> Self {
        BridgeError::Decode {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(e: std::io::Error) -> Self {
        BridgeError::transport(e.to_string())
    }
}

/// Recover the guard from a poisoned lock instead of propagating the panic.
///
/// Every mutex in the bridge guards plain bookkeeping (maps, a state enum),
/// so the data stays consistent even if a holder panicked.
pub(crate) trait LockResultExt<T> {
    /// The context parameter identifies which operation triggered lock
    /// recovery in the log.
    fn recover_poison(self, context: &str) -> T;
}

impl<T> LockResultExt<T> for Result<T, PoisonError<T>> {
    fn recover_poison(self, context: &str) -> T {
        match self {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!(
                    target: "workbridge::lock_recovery",
                    "Recovered from poisoned lock in {}",
                    context
                );
                poisoned.into_inner()
            }
        }
    }
}
