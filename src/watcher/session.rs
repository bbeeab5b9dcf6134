//! Watch sessions: one `notify` watcher over a set of path patterns.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::error::WatchError;
use super::handler::{WatchEvent, WatchEventKind, WatchHandler};
use super::path_registry::{FileStamp, PathRegistry};
use super::stabilizer::WriteStabilizer;
use crate::cache::CacheBinding;
use crate::manifest::PathPattern;

/// Capacity of the channel between the notify thread and the session loop.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// A running watch session.
///
/// Created through [`WatchSession::builder`]. `start` returns once the initial
/// scan has been dispatched and every initial handler has finished.
pub struct WatchSession {
    name: String,
    roots: Vec<PathBuf>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl WatchSession {
    pub fn builder<E>(name: impl Into<String>) -> WatchSessionBuilder<E>
    where
        E: Send + Sync + 'static,
    {
        WatchSessionBuilder::new(name.into())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directories handed to the native watcher.
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Close the native watcher and end the event loop.
    ///
    /// Handlers already running are left to finish; nothing new is dispatched
    /// once this returns.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        crate::debug_event!(self.name, "closed");
    }
}

impl Drop for WatchSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Builder for a [`WatchSession`].
pub struct WatchSessionBuilder<E> {
    name: String,
    patterns: Vec<PathPattern>,
    stability: Option<Duration>,
    poll_interval: Duration,
    cache: Option<CacheBinding<E>>,
    handler: Option<Arc<dyn WatchHandler<E>>>,
}

impl<E> WatchSessionBuilder<E>
where
    E: Send + Sync + 'static,
{
    fn new(name: String) -> Self {
        Self {
            name,
            patterns: Vec::new(),
            stability: None,
            poll_interval: Duration::from_millis(100),
            cache: None,
            handler: None,
        }
    }

    pub fn patterns(mut self, patterns: Vec<PathPattern>) -> Self {
        self.patterns = patterns;
        self
    }

    /// Hold add/change back until a file is unchanged for `stability`.
    pub fn stability(mut self, stability: Option<Duration>, poll_interval: Duration) -> Self {
        self.stability = stability;
        self.poll_interval = poll_interval;
        self
    }

    /// Keep a cache map in step with the events.
    pub fn cache(mut self, binding: CacheBinding<E>) -> Self {
        self.cache = Some(binding);
        self
    }

    pub fn handler(mut self, handler: Arc<dyn WatchHandler<E>>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Establish the watch, run the initial scan and start the event loop.
    pub async fn start(self) -> Result<WatchSession, WatchError> {
        let handler = self.handler.ok_or_else(|| WatchError::InitFailed {
            reason: format!("{}: handler is required", self.name),
        })?;

        let cancel = CancellationToken::new();
        if self.patterns.is_empty() {
            crate::debug_event!(self.name, "idle", "no patterns");
            return Ok(WatchSession {
                name: self.name,
                roots: Vec::new(),
                cancel,
                task: None,
            });
        }

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = tx.blocking_send(res);
        })?;

        let watch_roots = PathRegistry::compute_watch_roots(&self.patterns);
        for (root, mode) in &watch_roots {
            watcher
                .watch(root, *mode)
                .map_err(|e| WatchError::PathWatchFailed {
                    path: root.clone(),
                    reason: e.to_string(),
                })?;
            crate::debug_event!(self.name, "watching", "{} ({mode:?})", root.display());
        }

        let mut state = SessionState {
            name: self.name.clone(),
            patterns: self.patterns,
            registry: PathRegistry::new(),
            stabilizer: self.stability.map(WriteStabilizer::new),
            cache: self.cache,
            handler,
            tracker: TaskTracker::new(),
        };

        state.initial_scan().await;
        crate::debug_event!(
            state.name,
            "ready",
            "{} path(s) under {} root(s)",
            state.registry.path_count(),
            watch_roots.len()
        );

        let task = tokio::spawn(state.run(rx, watcher, self.poll_interval, cancel.clone()));

        Ok(WatchSession {
            name: self.name,
            roots: watch_roots.into_iter().map(|(root, _)| root).collect(),
            cancel,
            task: Some(task),
        })
    }
}

/// State owned by the session loop.
struct SessionState<E> {
    name: String,
    patterns: Vec<PathPattern>,
    registry: PathRegistry,
    stabilizer: Option<WriteStabilizer>,
    cache: Option<CacheBinding<E>>,
    handler: Arc<dyn WatchHandler<E>>,
    tracker: TaskTracker,
}

impl<E> SessionState<E>
where
    E: Send + Sync + 'static,
{
    /// Report every existing match as an add and wait for the handlers.
    async fn initial_scan(&mut self) {
        let paths: BTreeSet<PathBuf> = self.patterns.iter().flat_map(|p| p.expand()).collect();

        let mut pending = Vec::with_capacity(paths.len());
        for path in paths {
            let stamp = FileStamp::of(&path);
            if let Some(kind) = self.registry.observe(&path, stamp) {
                let is_dir = stamp.is_some_and(|s| s.is_dir);
                pending.push(self.dispatch(kind, path, is_dir, true));
            }
        }

        for task in pending {
            let _ = task.await;
        }
    }

    async fn run(
        mut self,
        mut rx: mpsc::Receiver<notify::Result<Event>>,
        watcher: notify::RecommendedWatcher,
        poll_interval: Duration,
        cancel: CancellationToken,
    ) {
        let mut tick = interval(poll_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let stabilizing = self.stabilizer.as_ref().is_some_and(|s| s.has_pending());

            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                received = rx.recv() => match received {
                    Some(Ok(event)) => self.handle_event(event),
                    Some(Err(e)) => self.handler.on_error(WatchError::EventError {
                        details: e.to_string(),
                    }),
                    None => break,
                },

                _ = tick.tick(), if stabilizing => self.flush_stable(),
            }
        }

        drop(watcher);
        crate::debug_event!(self.name, "stopped");
    }

    fn owns(&self, path: &std::path::Path) -> bool {
        self.registry.contains(path) || self.patterns.iter().any(|p| p.matches(path))
    }

    fn handle_event(&mut self, event: Event) {
        if matches!(event.kind, EventKind::Access(_)) {
            return;
        }

        for path in event.paths {
            if !self.owns(&path) {
                continue;
            }

            let stamp = FileStamp::of(&path);
            let settle = stamp.is_some_and(|s| !s.is_dir);
            match self.stabilizer.as_mut() {
                Some(stabilizer) if settle => {
                    stabilizer.record(path, stamp);
                    continue;
                }
                // Deletions bypass the stabiliser
                Some(stabilizer) if stamp.is_none() => stabilizer.remove(&path),
                _ => {}
            }
            self.observe(path, stamp);
        }
    }

    fn flush_stable(&mut self) {
        let Some(stabilizer) = self.stabilizer.as_mut() else {
            return;
        };
        for path in stabilizer.take_ready(FileStamp::of) {
            let stamp = FileStamp::of(&path);
            self.observe(path, stamp);
        }
    }

    fn observe(&mut self, path: PathBuf, stamp: Option<FileStamp>) {
        let was_dir = self.registry.get(&path).is_some_and(|s| s.is_dir);
        let Some(kind) = self.registry.observe(&path, stamp) else {
            crate::debug_event!(self.name, "unchanged", "{}", path.display());
            return;
        };
        let is_dir = stamp.map_or(was_dir, |s| s.is_dir);
        crate::debug_event!(self.name, kind, "{}", path.display());
        self.dispatch(kind, path, is_dir, false);
    }

    /// Update the cache and hand the event to the handler on its own task.
    fn dispatch(
        &self,
        kind: WatchEventKind,
        path: PathBuf,
        is_dir: bool,
        initial: bool,
    ) -> JoinHandle<()> {
        let entry = self
            .cache
            .as_ref()
            .and_then(|cache| cache.apply(kind, &path, is_dir));

        let event = WatchEvent {
            kind,
            path: path.clone(),
            is_dir,
            entry,
            initial,
        };

        let handler = Arc::clone(&self.handler);
        self.tracker.spawn(async move {
            let inner = Arc::clone(&handler);
            let outcome = tokio::spawn(async move { inner.on_event(event).await }).await;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(source)) => handler.on_error(WatchError::HandlerFailed {
                    handler: handler.name().to_string(),
                    path,
                    source,
                }),
                Err(_) => handler.on_error(WatchError::HandlerPanicked {
                    handler: handler.name().to_string(),
                    path,
                }),
            }
        })
    }
}
