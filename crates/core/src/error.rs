use crate::digest::Digest;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Machine-readable code attached to a failure.
///
/// Daemon-level failures use HTTP-like numbers (404, 503, ...). Failures
/// raised by user code may carry whatever code the code chose, which is
/// often a string such as `"ENOENT"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorCode {
    Number(i64),
    Text(String),
}

impl From<i64> for ErrorCode {
    fn from(code: i64) -> Self {
        ErrorCode::Number(code)
    }
}

impl From<&str> for ErrorCode {
    fn from(code: &str) -> Self {
        ErrorCode::Text(code.to_string())
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::Number(n) => write!(f, "{n}"),
            ErrorCode::Text(s) => f.write_str(s),
        }
    }
}

/// A failure raised while running source inside a sandbox.
///
/// Covers load failures (syntax errors, unknown modules), errors thrown by
/// an invoked handle, and failing expansion hooks.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ExecutionError {
    pub message: String,
    pub code: Option<ErrorCode>,
}

impl ExecutionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<ErrorCode>) -> Self {
        self.code = Some(code.into());
        self
    }
}

/// Errors that can occur while serving requests.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Digest was not found")]
    NotFound { digest: Digest },

    #[error("No support for {capability} in this node")]
    CapabilityDisabled { capability: &'static str },

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("Node is shutting down")]
    ShuttingDown,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("cannot resolve module: {0}")]
    ModuleResolution(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Code reported alongside the message in an error acknowledgment.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Error::NotFound { .. } => Some(ErrorCode::Number(404)),
            Error::ShuttingDown => Some(ErrorCode::Number(503)),
            Error::InvalidRequest(_) => Some(ErrorCode::Number(400)),
            Error::Execution(e) => e.code.clone(),
            Error::CapabilityDisabled { .. } | Error::ModuleResolution(_) | Error::Io(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
