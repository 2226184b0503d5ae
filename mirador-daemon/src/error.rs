use std::path::PathBuf;

use thiserror::Error;

/// Error surface for the daemon runtime and its client protocol.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("state store error: {0}")]
    Store(#[from] mirador_core::StoreError),

    #[error(transparent)]
    Switch(#[from] mirador_sync::SwitchError),

    #[error(transparent)]
    Service(#[from] mirador_sync::ServiceError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("daemon protocol error: {0}")]
    Protocol(String),

    /// The daemon answered, but the instance was locked by another request.
    #[error("{0}")]
    Busy(String),

    #[error("daemon is not running (socket missing: {socket})")]
    DaemonNotRunning { socket: PathBuf },
}

impl DaemonError {
    pub fn is_busy(&self) -> bool {
        match self {
            DaemonError::Busy(_) => true,
            DaemonError::Service(err) => err.is_busy(),
            _ => false,
        }
    }
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
