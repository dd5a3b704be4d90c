//! Service client error types.

use std::time::Duration;

use thiserror::Error;

/// Fault codes used by the downstream services (HTTP status semantics).
pub mod codes {
    pub const BAD_REQUEST: i64 = 400;
    pub const NOT_FOUND: i64 = 404;
    pub const CONFLICT: i64 = 409;
    pub const INTERNAL: i64 = 500;
}

/// Errors returned by a request/reply call.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The remote service answered with a structured fault.
    #[error("'{pattern}' fault {code}: {message}")]
    Fault {
        pattern: String,
        code: i64,
        message: String,
    },

    /// No reply arrived within the call timeout.
    #[error("'{pattern}' timed out after {after:?}")]
    Timeout { pattern: String, after: Duration },

    /// The connection failed or was closed mid-call.
    #[error("'{pattern}' transport error: {reason}")]
    Transport { pattern: String, reason: String },

    /// A request or reply could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ServiceError {
    pub fn fault(pattern: impl Into<String>, code: i64, message: impl Into<String>) -> Self {
        ServiceError::Fault {
            pattern: pattern.into(),
            code,
            message: message.into(),
        }
    }

    pub fn transport(pattern: impl Into<String>, reason: impl ToString) -> Self {
        ServiceError::Transport {
            pattern: pattern.into(),
            reason: reason.to_string(),
        }
    }

    /// Fault code, if the remote side produced one.
    pub fn code(&self) -> Option<i64> {
        match self {
            ServiceError::Fault { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// True for a conflict fault, i.e. the request was already applied.
    pub fn is_conflict(&self) -> bool {
        self.code() == Some(codes::CONFLICT)
    }

    /// True for failures where the remote side may never have seen the call.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ServiceError::Timeout { .. } | ServiceError::Transport { .. }
        )
    }
}

/// Convenience type alias for service results.
pub type Result<T> = std::result::Result<T, ServiceError>;
