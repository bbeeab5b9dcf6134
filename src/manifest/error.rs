//! Error types for manifest loading and validation.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from reading or validating the manifest.
///
/// These are fatal at startup. During a watch-mode reload they are logged
/// and the previous manifest file keeps being watched.
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Manifest not found (tried {tried:?})")]
    NotFound { tried: Vec<PathBuf> },

    #[error("Failed to read manifest {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid YAML in {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("{location}: {reason}")]
    Invalid { location: String, reason: String },

    #[error("Manifest must contain at least one item")]
    Empty,
}

impl ManifestError {
    pub(crate) fn invalid(location: impl Into<String>, reason: impl Into<String>) -> Self {
        ManifestError::Invalid {
            location: location.into(),
            reason: reason.into(),
        }
    }
}
