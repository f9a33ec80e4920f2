//! Failure taxonomy for guarded operations.
//!
//! Whether a failure may be retried is decided where the error is created,
//! not by inspecting messages downstream. An operation returns one of:
//!
//! - [`OperationError::Retryable`]: transient, optionally with a suggested delay
//! - [`OperationError::NonRetryable`]: permanent, input-level fault
//! - [`OperationError::Classified`]: a known [`ErrorKind`] whose retry policy
//!   depends on the active [`RetryConfig`]

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::config::RetryConfig;

/// Category of a classified failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    Connection,
    Parse,
    EmptyResponse,
    InvalidArgument,
    TypeMismatch,
    Other,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Connection => "connection",
            Self::Parse => "parse",
            Self::EmptyResponse => "empty_response",
            Self::InvalidArgument => "invalid_argument",
            Self::TypeMismatch => "type_mismatch",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by an operation guarded by the retry executor.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OperationError {
    #[error("{message}")]
    Retryable {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("{message}")]
    NonRetryable { message: String },

    #[error("{kind} error: {message}")]
    Classified { kind: ErrorKind, message: String },
}

impl OperationError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::Retryable {
            message: message.into(),
            retry_after: None,
        }
    }

    /// A transient failure that suggests how long to wait before retrying.
    pub fn retry_after(message: impl Into<String>, delay: Duration) -> Self {
        Self::Retryable {
            message: message.into(),
            retry_after: Some(delay),
        }
    }

    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self::NonRetryable {
            message: message.into(),
        }
    }

    pub fn classified(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Classified {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::classified(ErrorKind::Timeout, message)
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::classified(ErrorKind::Connection, message)
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::classified(ErrorKind::Parse, message)
    }

    pub fn empty_response(message: impl Into<String>) -> Self {
        Self::classified(ErrorKind::EmptyResponse, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::classified(ErrorKind::InvalidArgument, message)
    }

    /// Stable class label recorded in the outcome ledger.
    pub fn class(&self) -> &'static str {
        match self {
            Self::Retryable { .. } => "retryable",
            Self::NonRetryable { .. } => "non_retryable",
            Self::Classified { kind, .. } => kind.as_str(),
        }
    }

    /// Delay suggested by the failing dependency, if any.
    pub fn suggested_delay(&self) -> Option<Duration> {
        match self {
            Self::Retryable { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Whether another attempt is allowed under `config`.
    pub fn is_retryable(&self, config: &RetryConfig) -> bool {
        match self {
            Self::NonRetryable { .. } => false,
            Self::Retryable { .. } => true,
            Self::Classified { kind, .. } => match kind {
                ErrorKind::Timeout => config.retry_on_timeout,
                ErrorKind::Connection => config.retry_on_connection_error,
                ErrorKind::Parse => config.retry_on_parse_error,
                ErrorKind::EmptyResponse => config.retry_on_empty_response,
                ErrorKind::InvalidArgument | ErrorKind::TypeMismatch => false,
                ErrorKind::Other => true,
            },
        }
    }
}
