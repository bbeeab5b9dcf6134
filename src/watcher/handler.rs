//! Handler trait and event records for watch sessions.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use super::{HandlerError, WatchError};

/// Normalised filesystem event kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchEventKind {
    /// A path appeared (or was present at the initial scan).
    Add,
    /// A known path's content or metadata changed.
    Change,
    /// A known path disappeared.
    Unlink,
}

impl WatchEventKind {
    /// Whether the event can trigger a render.
    pub fn is_update(self) -> bool {
        matches!(self, WatchEventKind::Add | WatchEventKind::Change)
    }
}

impl fmt::Display for WatchEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WatchEventKind::Add => "add",
            WatchEventKind::Change => "change",
            WatchEventKind::Unlink => "unlink",
        };
        f.write_str(name)
    }
}

/// A normalised event delivered to a [`WatchHandler`].
#[derive(Debug)]
pub struct WatchEvent<E> {
    pub kind: WatchEventKind,
    pub path: PathBuf,
    pub is_dir: bool,
    /// Cache entry for the path, when the session keeps a cache and owns the path.
    pub entry: Option<Arc<E>>,
    /// True for events produced by the initial scan.
    pub initial: bool,
}

/// Receives events from a watch session.
///
/// `on_event` runs on its own task, so a slow handler never blocks the
/// session loop. Errors returned from it are tagged with the path and
/// routed to `on_error`.
#[async_trait]
pub trait WatchHandler<E>: Send + Sync
where
    E: Send + Sync + 'static,
{
    /// Handler name for logging.
    fn name(&self) -> &str;

    /// Handle one normalised event.
    async fn on_event(&self, event: WatchEvent<E>) -> Result<(), HandlerError>;

    /// Handle a session or handler fault.
    fn on_error(&self, error: WatchError) {
        tracing::error!("[{}] {error}", self.name());
    }
}
