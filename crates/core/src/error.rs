// crates/core/src/error.rs
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the durable registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Snapshot at {path} is corrupt: {message}")]
    CorruptSnapshot { path: PathBuf, message: String },

    #[error("Snapshot directory not writable: {path}")]
    PermissionDenied { path: PathBuf },

    #[error("IO error on snapshot {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode snapshot: {0}")]
    Encode(#[source] serde_json::Error),
}

impl RegistryError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            _ => Self::Io { path, source },
        }
    }

    pub fn corrupt(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::CorruptSnapshot {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn is_corrupt(&self) -> bool {
        matches!(self, Self::CorruptSnapshot { .. })
    }
}

/// Failure of one call, encoded into the reply rather than raised to the transport.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CallError {
    #[error("rpc: can't find method {0}")]
    MethodNotFound(String),

    #[error("rpc: decode error: {0}")]
    Decode(String),

    #[error("rpc: invalid params for {method}: {message}")]
    InvalidParams { method: String, message: String },

    #[error("{0}")]
    Service(String),
}

impl CallError {
    pub fn service(message: impl Into<String>) -> Self {
        Self::Service(message.into())
    }

    pub fn invalid_params(method: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::InvalidParams {
            method: method.into(),
            message: message.to_string(),
        }
    }

    /// Short label used for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            CallError::MethodNotFound(_) => "method_not_found",
            CallError::Decode(_) => "decode",
            CallError::InvalidParams { .. } => "invalid_params",
            CallError::Service(_) => "service",
        }
    }
}
