//! Error types for the OSS cluster client
//!
//! Every error surfaced to callers carries a stable name (see [`Error::name`])
//! so calling code can branch on it, e.g. `err.name() == "NoSuchKeyError"`.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the client
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Object Errors
    // =========================================================================
    #[error("No such key: {key} (node {node})")]
    NoSuchKey { key: String, node: String },

    #[error("Invalid object key: {0:?}")]
    InvalidKey(String),

    // =========================================================================
    // Node Errors
    // =========================================================================
    #[error("Node unreachable: {node} - {reason}")]
    Connectivity { node: String, reason: String },

    #[error("Operation {operation} on node {node} timed out after {elapsed:?}")]
    Timeout {
        node: String,
        operation: String,
        elapsed: Duration,
    },

    #[error("Backend error from node {node}: HTTP {status} - {reason}")]
    Backend {
        node: String,
        status: u16,
        reason: String,
    },

    // =========================================================================
    // Construction Errors
    // =========================================================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NoSuchKey,
    InvalidKey,
    Connectivity,
    Timeout,
    Configuration,
    Backend,
    Io,
    Parse,
    Internal,
}

impl ErrorKind {
    /// Stable, inspectable error name
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::NoSuchKey => "NoSuchKeyError",
            ErrorKind::InvalidKey => "InvalidKeyError",
            ErrorKind::Connectivity => "ConnectivityError",
            ErrorKind::Timeout => "TimeoutError",
            ErrorKind::Configuration => "ConfigurationError",
            ErrorKind::Backend => "BackendError",
            ErrorKind::Io => "IoError",
            ErrorKind::Parse => "ParseError",
            ErrorKind::Internal => "InternalError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NoSuchKey { .. } => ErrorKind::NoSuchKey,
            Error::InvalidKey(_) => ErrorKind::InvalidKey,
            Error::Connectivity { .. } => ErrorKind::Connectivity,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::Backend { .. } => ErrorKind::Backend,
            Error::Configuration(_) => ErrorKind::Configuration,
            Error::Internal(_) => ErrorKind::Internal,
            Error::JsonParse(_) | Error::YamlParse(_) => ErrorKind::Parse,
            Error::Io(_) => ErrorKind::Io,
        }
    }

    /// Stable error name, e.g. `NoSuchKeyError`
    pub fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// Check if the scheduler may retry this error on another node
    ///
    /// Timeouts are treated like connectivity failures.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Connectivity { .. } | Error::Timeout { .. })
    }

    /// Check if this error indicates the key is absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NoSuchKey { .. })
    }

    pub(crate) fn no_such_key(key: impl Into<String>, node: impl Into<String>) -> Self {
        Error::NoSuchKey {
            key: key.into(),
            node: node.into(),
        }
    }

    pub(crate) fn connectivity(node: impl Into<String>, reason: impl ToString) -> Self {
        Error::Connectivity {
            node: node.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type alias for the client
pub type Result<T> = std::result::Result<T, Error>;
