//! Top-level error type and the shared error sink.

use std::fmt::Display;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use thiserror::Error;

use crate::manifest::ManifestError;
use crate::render::RenderError;
use crate::watcher::WatchError;

/// Errors surfaced by the supervisor to the binary.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Watch(#[from] WatchError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("Invalid settings: {0}")]
    Settings(#[from] Box<figment::Error>),

    #[error("{count} error(s) during one-shot render")]
    OneShotFailed { count: usize },
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Collects runtime errors that have no caller to return to.
///
/// Every report is logged; the count decides the exit status in one-shot mode.
#[derive(Debug, Clone, Default)]
pub struct ErrorSink {
    count: Arc<AtomicUsize>,
}

impl ErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log an error for a component and count it.
    pub fn report(&self, component: &str, error: &dyn Display) {
        tracing::error!("[{component}] {error}");
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    /// Number of errors reported so far.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_counts_across_clones() {
        let sink = ErrorSink::new();
        let other = sink.clone();

        sink.report("test", &"first");
        other.report("test", &"second");

        assert_eq!(sink.count(), 2);
    }
}
