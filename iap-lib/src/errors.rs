//! Error types for in-app purchase operations.
//!
//! Every fallible operation returns [`IapResult`]. Platform failures keep the
//! platform's own numeric code untouched: Play Billing response codes and
//! StoreKit error codes live in different spaces, so callers should only
//! compare [`IapError::native_code`] against the documented codes of the
//! platform they are running on.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::manager::ConnectionState;
use crate::platform::NativeError;

/// Error categories for FFI and mobile integration.
///
/// These are the crate's own categories and are unrelated to the native
/// platform codes carried by [`IapError::Platform`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum IapErrorCode {
    /// Operation attempted outside the ready state
    NotReady = 1000,
    /// `connect()` while already connecting or connected
    AlreadyConnected = 1001,
    /// Manager was disconnected for good
    Closed = 1002,
    /// Pending outcome abandoned because the connection went away
    Disconnected = 1003,
    /// Product missing from the cache
    NotFound = 2000,
    /// Invalid request argument
    InvalidArgument = 2001,
    /// User cancelled the purchase
    UserCancelled = 3000,
    /// Purchase awaits external approval
    Pending = 3001,
    /// Passthrough platform failure
    Platform = 4000,
    /// Invalid configuration
    Config = 5000,
}

/// The operation a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Connect,
    LookupProducts,
    LaunchPurchase,
    Consume,
    Acknowledge,
    QueryOwnedPurchases,
    Restore,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::LookupProducts => "lookup products",
            Self::LaunchPurchase => "launch purchase",
            Self::Consume => "consume",
            Self::Acknowledge => "acknowledge",
            Self::QueryOwnedPurchases => "query owned purchases",
            Self::Restore => "restore",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type for in-app purchase operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IapError {
    /// The operation requires a ready connection.
    #[error("{operation} requires a ready connection")]
    NotReady {
        /// Operation that was attempted
        operation: Operation,
    },

    /// `connect()` was re-entered.
    #[error("connection is already {state}")]
    AlreadyConnected {
        /// State observed when `connect()` was called
        state: ConnectionState,
    },

    /// The manager was disconnected and cannot be reused.
    #[error("purchase manager has been disconnected")]
    Closed,

    /// A pending outcome was abandoned by teardown or service loss.
    #[error("{operation} abandoned: connection to the store was lost")]
    Disconnected {
        /// Operation that was pending
        operation: Operation,
    },

    /// Product is not in the cache; look it up first.
    #[error("product not found: {product_id}. Look it up before purchasing")]
    NotFound {
        /// Requested product identifier
        product_id: String,
    },

    /// Invalid request argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The user cancelled the purchase. Not an application failure.
    #[error("purchase cancelled by user")]
    UserCancelled,

    /// The purchase awaits external approval; watch the update stream.
    #[error("purchase of {product_id} is pending approval")]
    Pending {
        /// Product awaiting approval
        product_id: String,
    },

    /// Failure reported by the platform, passed through verbatim.
    #[error("{operation} failed: {message}")]
    Platform {
        /// Operation that failed
        operation: Operation,
        /// Platform message, unmodified
        message: String,
        /// Platform-native error code
        code: Option<i32>,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl IapError {
    /// Wrap a native failure for the given operation.
    pub fn platform(operation: Operation, error: NativeError) -> Self {
        Self::Platform {
            operation,
            message: error.message,
            code: Some(error.code),
        }
    }

    /// Get the error category for FFI/mobile integration.
    pub fn code(&self) -> IapErrorCode {
        match self {
            Self::NotReady { .. } => IapErrorCode::NotReady,
            Self::AlreadyConnected { .. } => IapErrorCode::AlreadyConnected,
            Self::Closed => IapErrorCode::Closed,
            Self::Disconnected { .. } => IapErrorCode::Disconnected,
            Self::NotFound { .. } => IapErrorCode::NotFound,
            Self::InvalidArgument(_) => IapErrorCode::InvalidArgument,
            Self::UserCancelled => IapErrorCode::UserCancelled,
            Self::Pending { .. } => IapErrorCode::Pending,
            Self::Platform { .. } => IapErrorCode::Platform,
            Self::Config(_) => IapErrorCode::Config,
        }
    }

    /// The error message. Platform failures return the native message as-is.
    pub fn message(&self) -> String {
        match self {
            Self::Platform { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// The platform's own error code, when the failure came from the platform.
    pub fn native_code(&self) -> Option<i32> {
        match self {
            Self::Platform { code, .. } => *code,
            _ => None,
        }
    }

    /// Returns true for outcomes that are not application failures.
    pub fn is_benign(&self) -> bool {
        matches!(self, Self::UserCancelled | Self::Pending { .. })
    }

    /// Returns true if reconnecting and repeating the call may succeed.
    ///
    /// The crate never retries on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Disconnected { .. } | Self::NotReady { .. })
    }
}

/// Common result alias for purchase operations.
pub type IapResult<T> = std::result::Result<T, IapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_error_keeps_native_message_and_code() {
        let err = IapError::platform(
            Operation::LookupProducts,
            NativeError::new(3, "Billing unavailable"),
        );
        assert_eq!(err.code(), IapErrorCode::Platform);
        assert_eq!(err.message(), "Billing unavailable");
        assert_eq!(err.native_code(), Some(3));
        assert_eq!(err.to_string(), "lookup products failed: Billing unavailable");
    }

    #[test]
    fn test_benign_outcomes() {
        assert!(IapError::UserCancelled.is_benign());
        assert!(IapError::Pending {
            product_id: "coins_100".into()
        }
        .is_benign());
        assert!(!IapError::Closed.is_benign());
        assert_eq!(IapError::UserCancelled.native_code(), None);
    }

    #[test]
    fn test_error_display() {
        let err = IapError::NotReady {
            operation: Operation::Restore,
        };
        assert_eq!(err.to_string(), "restore requires a ready connection");
        assert!(err.is_retryable());

        let err = IapError::AlreadyConnected {
            state: ConnectionState::Ready,
        };
        assert_eq!(err.to_string(), "connection is already ready");
    }
}
