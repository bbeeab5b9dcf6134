//! Config unit orchestration.
//!
//! A [`UnitRunner`] drives one manifest item through its lifecycle:
//!
//! ```text
//! Initializing ──► SourcesReady ──► Active ──► Closed
//!  (source sessions   (src_init)     (files session,
//!   scan, no renders)                 initial renders)
//! ```
//!
//! Source sessions (custom, datasources, templates, dependencies) fill their
//! caches during the initial scan without rendering. Once they are ready the
//! files session starts; its initial scan renders every file. From then on a
//! source change triggers the unit's batch target and a file change triggers
//! that file's own target.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;

use crate::cache::{
    CacheBinding, CacheMaps, DataSourceEntry, EntryFactory, FileEntry, PathEntry,
    data_source_factory, path_factory, resolve_file,
};
use crate::config::Settings;
use crate::error::ErrorSink;
use crate::hooks::HookRunner;
use crate::manifest::{ConfigUnit, FilePathRef, HookSpec, find_owner, patterns_of};
use crate::render::{
    BatchCause, BatchJob, BatchTrigger, EnvironmentLoader, FileJob, FileTrigger, RenderEnvironment,
    RenderScope, Renderer,
};
use crate::scheduler::{RatePolicy, RenderHandle, spawn_target};
use crate::watcher::{HandlerError, WatchError, WatchEvent, WatchHandler, WatchSession};

/// Collaborators and tuning shared by every unit of a manifest.
#[derive(Clone)]
pub struct UnitRuntime {
    pub renderer: Arc<dyn Renderer>,
    pub loader: Arc<dyn EnvironmentLoader>,
    /// Global bound on renders in flight.
    pub permits: Arc<Semaphore>,
    pub sink: ErrorSink,
    /// Tracks background hook processes.
    pub hooks: TaskTracker,
    pub file_policy: RatePolicy,
    pub batch_policy: RatePolicy,
    pub stability: Option<Duration>,
    pub poll_interval: Duration,
}

impl UnitRuntime {
    pub fn from_settings(
        settings: &Settings,
        renderer: Arc<dyn Renderer>,
        loader: Arc<dyn EnvironmentLoader>,
    ) -> Self {
        let permits = match settings.render.concurrency {
            0 => Semaphore::MAX_PERMITS,
            n => n,
        };

        Self {
            renderer,
            loader,
            permits: Arc::new(Semaphore::new(permits)),
            sink: ErrorSink::new(),
            hooks: TaskTracker::new(),
            file_policy: settings.render.file_policy(),
            batch_policy: settings.render.batch_policy(),
            stability: settings.watch.stability(),
            poll_interval: settings.watch.poll_interval(),
        }
    }
}

impl fmt::Debug for UnitRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitRuntime")
            .field("renderer", &self.renderer.name())
            .field("file_policy", &self.file_policy)
            .field("batch_policy", &self.batch_policy)
            .field("stability", &self.stability)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Initializing,
    SourcesReady,
    Active,
    Closed,
}

/// A running config unit.
pub struct UnitRunner {
    label: String,
    watch: bool,
    caches: CacheMaps,
    scope: Arc<RenderScope>,
    sessions: Vec<WatchSession>,
    state: UnitState,
}

impl UnitRunner {
    /// Start every session of the unit and run the initial render pass.
    ///
    /// In one-shot mode (`watch: false`) the sessions are closed again before
    /// this returns.
    pub async fn start(unit: ConfigUnit, runtime: &UnitRuntime) -> Result<Self, WatchError> {
        let label = unit.label();
        let unit = Arc::new(unit);
        let caches = CacheMaps::default();
        let src_init = Arc::new(AtomicBool::new(false));

        let scope = Arc::new(RenderScope {
            label: label.clone(),
            renderer: Arc::clone(&runtime.renderer),
            permits: Arc::clone(&runtime.permits),
            environment: Arc::new(RwLock::new(Arc::new(RenderEnvironment::default()))),
            datasources: Arc::clone(&caches.datasources),
            templates: Arc::clone(&caches.templates),
            pass_through: unit.other_data_sources.clone(),
            args: unit.args.clone(),
            on_change: unit.on_change.clone(),
            hooks: HookRunner::with_tracker(label.clone(), runtime.hooks.clone()),
        });

        let batch = spawn_target(
            format!("{label}:batch"),
            BatchJob {
                scope: Arc::clone(&scope),
                files: Arc::clone(&caches.files),
            },
            runtime.batch_policy,
            runtime.sink.clone(),
        );

        let mut runner = Self {
            label: label.clone(),
            watch: unit.watch,
            caches,
            scope: Arc::clone(&scope),
            sessions: Vec::new(),
            state: UnitState::Initializing,
        };
        crate::debug_event!(label, "initializing");

        let source = |name: &str| SourceHandler {
            name: format!("{label}:{name}"),
            src_init: Arc::clone(&src_init),
            batch: batch.clone(),
            sink: runtime.sink.clone(),
        };

        let custom_handler = Arc::new(CustomHandler {
            name: format!("{label}:custom"),
            records: unit.custom.clone(),
            loader: Arc::clone(&runtime.loader),
            scope: Arc::clone(&scope),
            src_init: Arc::clone(&src_init),
            batch: batch.clone(),
            sink: runtime.sink.clone(),
        });

        let (custom, datasources, templates, dependencies) = tokio::try_join!(
            WatchSession::builder::<()>(format!("{label}:custom"))
                .patterns(patterns_of(&unit.custom))
                .stability(runtime.stability, runtime.poll_interval)
                .handler(custom_handler)
                .start(),
            WatchSession::builder::<DataSourceEntry>(format!("{label}:datasources"))
                .patterns(unit.data_source_patterns())
                .stability(runtime.stability, runtime.poll_interval)
                .cache(CacheBinding::new(
                    Arc::clone(&runner.caches.datasources),
                    data_source_factory(unit.file_data_sources.clone()),
                ))
                .handler(Arc::new(source("datasources")))
                .start(),
            WatchSession::builder::<PathEntry>(format!("{label}:templates"))
                .patterns(patterns_of(&unit.templates))
                .stability(runtime.stability, runtime.poll_interval)
                .cache(CacheBinding::new(
                    Arc::clone(&runner.caches.templates),
                    path_factory(unit.templates.clone()),
                ))
                .handler(Arc::new(source("templates")))
                .start(),
            WatchSession::builder::<PathEntry>(format!("{label}:dependencies"))
                .patterns(patterns_of(&unit.dependencies))
                .stability(runtime.stability, runtime.poll_interval)
                .cache(CacheBinding::new(
                    Arc::clone(&runner.caches.dependencies),
                    path_factory(unit.dependencies.clone()),
                ))
                .handler(Arc::new(source("dependencies")))
                .start(),
        )?;
        runner
            .sessions
            .extend([custom, datasources, templates, dependencies]);

        src_init.store(true, Ordering::SeqCst);
        runner.state = UnitState::SourcesReady;
        crate::debug_event!(
            label,
            "sources ready",
            "{} data source file(s), {} template(s), {} dependency file(s)",
            runner.caches.datasources.read().len(),
            runner.caches.templates.read().len(),
            runner.caches.dependencies.read().len()
        );

        let files = WatchSession::builder::<FileEntry>(format!("{label}:files"))
            .patterns(unit.files.iter().map(|f| f.input.clone()).collect())
            .stability(runtime.stability, runtime.poll_interval)
            .cache(CacheBinding::new(
                Arc::clone(&runner.caches.files),
                file_factory(&unit, &scope, runtime),
            ))
            .handler(Arc::new(FilesHandler {
                name: format!("{label}:files"),
                sink: runtime.sink.clone(),
            }))
            .start()
            .await;

        match files {
            Ok(files) => runner.sessions.push(files),
            Err(e) => {
                runner.shutdown().await;
                return Err(e);
            }
        }

        runner.state = UnitState::Active;
        crate::log_event!(
            label,
            "active",
            "{} file(s){}",
            runner.caches.files.read().len(),
            if runner.watch { ", watching" } else { "" }
        );

        if !runner.watch {
            runner.stop_sessions().await;
        }

        Ok(runner)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> UnitState {
        self.state
    }

    pub fn is_watching(&self) -> bool {
        self.watch && self.state == UnitState::Active
    }

    pub fn caches(&self) -> &CacheMaps {
        &self.caches
    }

    /// Current render environment.
    pub fn environment(&self) -> Arc<RenderEnvironment> {
        self.scope.environment()
    }

    async fn stop_sessions(&mut self) {
        for session in self.sessions.drain(..) {
            session.stop().await;
        }
    }

    /// Stop every session and drop the cached entries.
    ///
    /// Render targets finish in-flight work once their entries are gone.
    pub async fn shutdown(mut self) {
        self.stop_sessions().await;
        self.caches.clear();
        self.state = UnitState::Closed;
        crate::debug_event!(self.label, "closed");
    }
}

/// Factory for the files map: resolves the output path and spawns the entry's target.
fn file_factory(
    unit: &Arc<ConfigUnit>,
    scope: &Arc<RenderScope>,
    runtime: &UnitRuntime,
) -> EntryFactory<FileEntry> {
    let files = unit.files.clone();
    let scope = Arc::clone(scope);
    let policy = runtime.file_policy;
    let sink = runtime.sink.clone();

    Arc::new(move |path: &Path| {
        let target = resolve_file(&files, path)?;
        let job = FileJob {
            filepath: path.to_path_buf(),
            owner: Arc::clone(&target.owner),
            output_path: target.output_path.clone(),
            scope: Arc::clone(&scope),
        };
        let render = spawn_target(
            format!("{}:{}", scope.label, path.display()),
            job,
            policy,
            sink.clone(),
        );

        Some(FileEntry {
            filepath: path.to_path_buf(),
            owner: target.owner,
            output_path: target.output_path,
            output_dir: target.output_dir,
            render,
        })
    })
}

/// Entries whose record can carry a source-level hook.
trait SourceEntry: Send + Sync + 'static {
    fn on_change(&self) -> Option<&HookSpec>;
}

impl SourceEntry for PathEntry {
    fn on_change(&self) -> Option<&HookSpec> {
        self.owner.on_change.as_ref()
    }
}

impl SourceEntry for DataSourceEntry {
    fn on_change(&self) -> Option<&HookSpec> {
        self.owner.on_change.as_ref()
    }
}

/// Data sources, templates and dependencies: changes re-render the whole unit.
struct SourceHandler {
    name: String,
    src_init: Arc<AtomicBool>,
    batch: RenderHandle<BatchTrigger>,
    sink: ErrorSink,
}

#[async_trait]
impl<E: SourceEntry> WatchHandler<E> for SourceHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_event(&self, event: WatchEvent<E>) -> Result<(), HandlerError> {
        if !self.src_init.load(Ordering::SeqCst) || !event.kind.is_update() {
            return Ok(());
        }
        let Some(entry) = event.entry else {
            return Ok(());
        };

        crate::debug_event!(self.name, event.kind, "{}", event.path.display());
        self.batch.trigger(BatchTrigger {
            cause: Some(BatchCause {
                path: event.path,
                on_change: entry.on_change().cloned(),
            }),
        });
        Ok(())
    }

    fn on_error(&self, error: WatchError) {
        self.sink.report(&self.name, &error);
    }
}

/// Custom environment files: each add/change replaces the unit's environment.
struct CustomHandler {
    name: String,
    records: Vec<Arc<FilePathRef>>,
    loader: Arc<dyn EnvironmentLoader>,
    scope: Arc<RenderScope>,
    src_init: Arc<AtomicBool>,
    batch: RenderHandle<BatchTrigger>,
    sink: ErrorSink,
}

#[async_trait]
impl WatchHandler<()> for CustomHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_event(&self, event: WatchEvent<()>) -> Result<(), HandlerError> {
        if !event.kind.is_update() || event.is_dir {
            return Ok(());
        }

        let current = self.scope.environment();
        let Some(next) = self.loader.load(&event.path, &current).await? else {
            return Ok(());
        };
        self.scope.replace_environment(next);
        crate::log_event!(self.name, "environment loaded", "{}", event.path.display());

        if self.src_init.load(Ordering::SeqCst) {
            let on_change = find_owner(&self.records, &event.path, |r| &r.path)
                .and_then(|r| r.on_change.clone());
            self.batch.trigger(BatchTrigger {
                cause: Some(BatchCause {
                    path: event.path,
                    on_change,
                }),
            });
        }
        Ok(())
    }

    fn on_error(&self, error: WatchError) {
        self.sink.report(&self.name, &error);
    }
}

/// Files: each add/change renders that file.
struct FilesHandler {
    name: String,
    sink: ErrorSink,
}

#[async_trait]
impl WatchHandler<FileEntry> for FilesHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_event(&self, event: WatchEvent<FileEntry>) -> Result<(), HandlerError> {
        if !event.kind.is_update() {
            return Ok(());
        }
        let Some(entry) = event.entry else {
            return Ok(());
        };

        // The unit hook only follows a file's own change, never the initial pass
        let trigger = FileTrigger {
            causal: !event.initial,
        };
        entry.render.render(trigger).await?;
        Ok(())
    }

    fn on_error(&self, error: WatchError) {
        self.sink.report(&self.name, &error);
    }
}
