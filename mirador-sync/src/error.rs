//! Error types for mirador-sync.

use std::path::PathBuf;

use thiserror::Error;

use mirador_core::{types::InstanceId, StoreError};

/// Failures of one switch (or news push) against the shared repository.
#[derive(Debug, Error)]
pub enum SwitchError {
    /// The namespace cannot be turned into a remote (bad characters, or no such fork).
    #[error("invalid remote '{namespace}': {reason}")]
    InvalidRemote { namespace: String, reason: String },

    /// The ref does not exist on the resolved remote.
    #[error("unknown ref '{git_ref}' in '{namespace}'")]
    UnknownRef { namespace: String, git_ref: String },

    /// The strict merge of master was rejected. The merge has been aborted.
    #[error("merge conflict in {}", .paths.join(", "))]
    MergeConflict { paths: Vec<String> },

    /// Network or authentication failure during fetch or push.
    #[error("transport error talking to '{remote}': {detail}")]
    Transport { remote: String, detail: String },

    /// The site hook failed after the git side was already published.
    #[error("site notification failed: {detail}")]
    Notify { detail: String },

    /// Caller-supplied value rejected before touching the repository.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A git command failed in a way that has no dedicated variant.
    #[error("git {command} failed: {detail}")]
    Git { command: String, detail: String },

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SwitchError {
    /// True for the failure kinds callers are expected to see in normal operation.
    pub fn is_classified(&self) -> bool {
        !matches!(self, SwitchError::Git { .. } | SwitchError::Io { .. })
    }

    /// One human-readable message per failure class.
    pub fn user_message(&self) -> String {
        match self {
            SwitchError::InvalidRemote { namespace, .. } => {
                format!("'{namespace}' is not a usable namespace.")
            }
            SwitchError::UnknownRef { namespace, git_ref } => {
                format!("Could not find '{git_ref}' in '{namespace}'.")
            }
            SwitchError::MergeConflict { paths } => format!(
                "Merging master failed because of conflicts in: {}.",
                paths.join(", ")
            ),
            SwitchError::Transport { remote, .. } => {
                format!("Could not reach the git remote '{remote}', please try again.")
            }
            SwitchError::Notify { .. } => {
                "The preview was published but the site could not be updated.".to_string()
            }
            SwitchError::InvalidInput(msg) => msg.clone(),
            SwitchError::Git { .. } | SwitchError::Io { .. } => {
                "Something went wrong, the error has been logged.".to_string()
            }
        }
    }
}

/// Failures of a [`crate::PreviewService`] operation.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Another operation holds the instance lock.
    #[error("instance {0} is busy")]
    Busy(InstanceId),

    /// The instance never showed a preview, so there is nothing to re-apply or flag.
    #[error("instance {0} has no preview state")]
    NoPreview(InstanceId),

    /// Every instance is reserved or busy.
    #[error("no instance is available")]
    NoInstanceAvailable,

    #[error("state store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Switch(#[from] SwitchError),
}

impl ServiceError {
    pub fn is_busy(&self) -> bool {
        matches!(self, ServiceError::Busy(_))
    }

    pub fn is_classified(&self) -> bool {
        match self {
            ServiceError::Store(StoreError::InstanceNotFound { .. }) => true,
            ServiceError::Store(_) => false,
            ServiceError::Switch(err) => err.is_classified(),
            _ => true,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            ServiceError::Busy(id) => format!("Instance {id} is busy, try again in a moment."),
            ServiceError::NoPreview(id) => format!("Instance {id} is not showing anything yet."),
            ServiceError::NoInstanceAvailable => {
                "All preview instances are in use, try again later.".to_string()
            }
            ServiceError::Store(StoreError::InstanceNotFound { id, .. }) => {
                format!("There is no instance {id}.")
            }
            ServiceError::Store(_) => "Something went wrong, the error has been logged.".to_string(),
            ServiceError::Switch(err) => err.user_message(),
        }
    }
}

/// Convenience constructor for [`SwitchError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SwitchError {
    SwitchError::Io {
        path: path.into(),
        source,
    }
}
