//! Error types for Callflow.
//!
//! All errors in Callflow are represented by the `CallflowError` enum.
//! Errors are `Clone` and serializable so a failed node can keep its error
//! on its `CallContext` after the run has finished.

use std::io::ErrorKind;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for all Callflow operations.
#[derive(Deserialize, Serialize, Error, Debug, Clone, PartialEq)]
pub enum CallflowError {
    /// Malformed graph or unresolvable configuration: duplicate or missing node
    /// ids, dangling successors, cycles, unresolved back-references.
    #[error("configuration error: {0}")]
    Config(String),

    /// Network failure or a non-2xx HTTP response.
    #[error("transport error (status: {status:?}): {message}")]
    Transport {
        status: Option<u16>,
        message: String,
    },

    /// The remote service answered with an envelope whose code is not a success code.
    #[error("remote error, code: {code}, message: {message}")]
    Envelope {
        code: i64,
        message: String,
    },

    /// Polling exceeded its wall-clock budget.
    #[error("polling timed out after {elapsed_ms}ms (timeout {timeout_ms}ms)")]
    Timeout {
        elapsed_ms: u64,
        timeout_ms: u64,
    },

    /// Every retry attempt failed; `last` is the error of the final attempt.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<CallflowError>,
    },

    /// Polling used up its attempts without the condition holding.
    #[error("polling attempts exhausted after {attempts} attempts{}", .last.as_ref().map(|e| format!(": {e}")).unwrap_or_default())]
    PollingAttemptsExhausted {
        attempts: u32,
        last: Option<Box<CallflowError>>,
    },

    /// Data conversion errors (JSON, base64, schema).
    #[error("{0}")]
    Convert(String),

    /// Engine-level errors (runtime misuse of a scheduler or engine).
    #[error("{0}")]
    Engine(String),

    /// I/O operation errors.
    #[error("{0}")]
    IoError(String),
}

impl CallflowError {
    /// Returns the innermost error, unwrapping retry and polling wrappers.
    pub fn root_cause(&self) -> &CallflowError {
        match self {
            CallflowError::RetriesExhausted {
                last, ..
            } => last.root_cause(),
            CallflowError::PollingAttemptsExhausted {
                last: Some(last),
                ..
            } => last.root_cause(),
            other => other,
        }
    }

    /// HTTP status carried by a transport error, if any.
    pub fn status(&self) -> Option<u16> {
        match self.root_cause() {
            CallflowError::Transport {
                status, ..
            } => *status,
            _ => None,
        }
    }
}

impl From<CallflowError> for String {
    fn from(val: CallflowError) -> Self {
        val.to_string()
    }
}

impl From<std::io::Error> for CallflowError {
    fn from(error: std::io::Error) -> Self {
        CallflowError::IoError(error.to_string())
    }
}

impl From<CallflowError> for std::io::Error {
    fn from(val: CallflowError) -> Self {
        #[allow(clippy::io_other_error)]
        std::io::Error::new(ErrorKind::Other, val.to_string())
    }
}

impl From<serde_json::Error> for CallflowError {
    fn from(error: serde_json::Error) -> Self {
        CallflowError::Convert(error.to_string())
    }
}

impl From<base64::DecodeError> for CallflowError {
    fn from(error: base64::DecodeError) -> Self {
        CallflowError::Convert(format!("invalid base64 data: {}", error))
    }
}

impl From<jsonschema::ValidationError<'_>> for CallflowError {
    fn from(error: jsonschema::ValidationError<'_>) -> Self {
        CallflowError::Convert(error.to_string())
    }
}

impl From<reqwest::Error> for CallflowError {
    fn from(error: reqwest::Error) -> Self {
        CallflowError::Transport {
            status: error.status().map(|s| s.as_u16()),
            message: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_cause_unwraps_retry_and_polling() {
        let inner = CallflowError::Transport {
            status: Some(503),
            message: "unavailable".to_string(),
        };
        let err = CallflowError::RetriesExhausted {
            attempts: 3,
            last: Box::new(inner.clone()),
        };
        assert_eq!(err.root_cause(), &inner);
        assert_eq!(err.status(), Some(503));

        let err = CallflowError::PollingAttemptsExhausted {
            attempts: 2,
            last: None,
        };
        assert_eq!(err.root_cause(), &err);
        assert_eq!(err.to_string(), "polling attempts exhausted after 2 attempts");
    }
}
