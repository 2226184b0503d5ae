//! Error types for mirador-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from settings and state store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying I/O failure (file not found, permission denied, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization error (write/save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load: includes file path and line context from serde_yaml.
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None`: cannot locate `~/.mirador/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// No instance definition exists for the requested id.
    #[error("instance {id} is not defined (expected {path})")]
    InstanceNotFound { id: u32, path: PathBuf },

    /// An instance with this id is already defined.
    #[error("instance {id} already exists")]
    InstanceExists { id: u32 },
}
