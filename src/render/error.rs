//! Error types for rendering.

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Errors from a single-file or batch render.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Failed to read data source {path}: {source}")]
    DataSourceRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse data source {path}: {reason}")]
    DataSourceParse { path: PathBuf, reason: String },

    #[error("Failed to read template {path}: {source}")]
    TemplateRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Template error in {path}: {reason}")]
    Template { path: PathBuf, reason: String },

    #[error("Renderer failed for {path}: {reason}")]
    Renderer { path: PathBuf, reason: String },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Render target {target} is no longer running")]
    Cancelled { target: String },

    #[error("{failed} of {total} file(s) failed to render:{}", format_details(.errors))]
    Batch {
        failed: usize,
        total: usize,
        errors: Vec<Arc<RenderError>>,
    },
}

impl RenderError {
    /// Path of the file the error is about, when there is one.
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            RenderError::DataSourceRead { path, .. }
            | RenderError::DataSourceParse { path, .. }
            | RenderError::TemplateRead { path, .. }
            | RenderError::Template { path, .. }
            | RenderError::Renderer { path, .. }
            | RenderError::Write { path, .. } => Some(path),
            RenderError::Cancelled { .. } | RenderError::Batch { .. } => None,
        }
    }
}

fn format_details(errors: &[Arc<RenderError>]) -> String {
    errors.iter().map(|e| format!("\n  - {e}")).collect()
}
