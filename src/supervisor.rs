//! Top-level supervisor: manifest loading, unit lifecycle and hot reload.
//!
//! In watch mode (any unit has `watch: true`) the manifest file itself is
//! watched. A change tears down every unit and its sessions before the new
//! manifest's units start their initial scan.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::error::{EngineError, EngineResult};
use crate::manifest::{ConfigUnit, PathPattern, load_manifest, resolve_manifest_path};
use crate::render::{EnvironmentLoader, Renderer, ValuesLoader, renderer};
use crate::unit::{UnitRunner, UnitRuntime};
use crate::watcher::{
    FileStamp, HandlerError, WatchError, WatchEvent, WatchEventKind, WatchHandler, WatchSession,
};

/// How a supervised run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// No unit watches; the initial pass completed.
    Completed,
    /// Shutdown was requested while watching.
    Stopped,
}

pub struct Supervisor {
    settings: Settings,
    root: PathBuf,
    runtime: UnitRuntime,
}

impl Supervisor {
    /// Supervisor using the renderer selected in the settings.
    pub fn new(settings: Settings) -> Self {
        let renderer = renderer::from_config(&settings.render);
        Self::with_collaborators(settings, renderer, Arc::new(ValuesLoader))
    }

    pub fn with_collaborators(
        settings: Settings,
        renderer: Arc<dyn Renderer>,
        loader: Arc<dyn EnvironmentLoader>,
    ) -> Self {
        let root = settings.resolved_root();
        let runtime = UnitRuntime::from_settings(&settings, renderer, loader);
        Self {
            settings,
            root,
            runtime,
        }
    }

    fn manifest_path(&self) -> PathBuf {
        crate::manifest::resolve(&self.root, &self.settings.manifest_path.to_string_lossy())
    }

    /// Number of errors reported by units so far.
    pub fn error_count(&self) -> usize {
        self.runtime.sink.count()
    }

    /// Run until the initial pass completes (one-shot) or `shutdown` fires (watch mode).
    pub async fn run(&self, shutdown: CancellationToken) -> EngineResult<RunOutcome> {
        let manifest_path = self.manifest_path();
        let mut reloading = false;

        loop {
            // Stamp taken before reading so edits made while units start are not lost
            let watched =
                resolve_manifest_path(&manifest_path).unwrap_or_else(|_| manifest_path.clone());
            let loaded_stamp = FileStamp::of(&watched);

            let (resolved, units) = match load_manifest(&manifest_path, &self.root).await {
                Ok(loaded) => loaded,
                Err(e) if reloading => {
                    tracing::error!("[supervisor] manifest rejected, keeping watch: {e}");
                    match self
                        .await_manifest_change(&watched, loaded_stamp, &shutdown)
                        .await?
                    {
                        true => continue,
                        false => return Ok(RunOutcome::Stopped),
                    }
                }
                Err(e) => return Err(e.into()),
            };

            let watch = units.iter().any(|u| u.watch);
            crate::log_event!(
                "supervisor",
                "loaded",
                "{} unit(s) from {}",
                units.len(),
                resolved.display()
            );

            let runners = match self.start_units(units, watch).await {
                Ok(runners) => runners,
                Err(e) => {
                    self.wait_for_hooks().await;
                    return Err(e);
                }
            };

            if !watch {
                shutdown_all(runners).await;
                self.wait_for_hooks().await;
                return match self.error_count() {
                    0 => Ok(RunOutcome::Completed),
                    count => Err(EngineError::OneShotFailed { count }),
                };
            }

            let reload = self
                .await_manifest_change(&resolved, loaded_stamp, &shutdown)
                .await;
            crate::log_event!("supervisor", "stopping units");
            shutdown_all(runners).await;

            match reload? {
                true => {
                    crate::log_event!("supervisor", "reloading", "{}", resolved.display());
                    reloading = true;
                }
                false => return Ok(RunOutcome::Stopped),
            }
        }
    }

    /// Start every unit concurrently.
    ///
    /// In watch mode a unit that fails to start is reported and the others
    /// keep running. In one-shot mode the first failure cancels the starts
    /// still in progress and stops the units already running.
    async fn start_units(
        &self,
        units: Vec<ConfigUnit>,
        watch: bool,
    ) -> EngineResult<Vec<UnitRunner>> {
        let mut starting = JoinSet::new();
        for unit in units {
            let runtime = self.runtime.clone();
            starting.spawn(async move {
                let index = unit.index;
                let label = unit.label();
                (index, label, UnitRunner::start(unit, &runtime).await)
            });
        }

        let mut runners = Vec::new();
        let mut failure: Option<WatchError> = None;
        while let Some(joined) = starting.join_next().await {
            let (index, label, started) = match joined {
                Ok(done) => done,
                Err(e) if e.is_cancelled() => continue,
                Err(e) => (
                    usize::MAX,
                    "supervisor".to_string(),
                    Err(WatchError::InitFailed {
                        reason: format!("unit start task failed: {e}"),
                    }),
                ),
            };
            match started {
                Ok(runner) => runners.push((index, runner)),
                // A unit that cannot watch must not take the others down
                Err(e) if watch => self.runtime.sink.report(&label, &e),
                Err(e) => {
                    if failure.is_none() {
                        starting.abort_all();
                        failure = Some(e);
                    }
                }
            }
        }

        runners.sort_by_key(|(index, _)| *index);
        let runners = runners.into_iter().map(|(_, runner)| runner).collect();
        match failure {
            Some(e) => {
                shutdown_all(runners).await;
                Err(e.into())
            }
            None => Ok(runners),
        }
    }

    /// Watch the manifest until it changes (`true`) or shutdown is requested (`false`).
    ///
    /// A manifest that no longer matches `loaded` counts as changed right away.
    /// The manifest session is closed before this returns.
    async fn await_manifest_change(
        &self,
        manifest: &Path,
        loaded: Option<FileStamp>,
        shutdown: &CancellationToken,
    ) -> EngineResult<bool> {
        let pattern = PathPattern::new(manifest.to_string_lossy()).map_err(|reason| {
            WatchError::InitFailed {
                reason: format!("manifest path: {reason}"),
            }
        })?;

        let (tx, mut rx) = mpsc::channel(1);
        let session = WatchSession::builder::<()>("manifest")
            .patterns(vec![pattern])
            .stability(self.runtime.stability, self.runtime.poll_interval)
            .handler(Arc::new(ManifestHandler { tx }))
            .start()
            .await?;
        crate::debug_event!("supervisor", "watching manifest", "{}", manifest.display());

        if FileStamp::of(manifest) != loaded {
            crate::debug_event!("supervisor", "manifest changed during start");
            session.stop().await;
            return Ok(true);
        }

        let changed = tokio::select! {
            _ = shutdown.cancelled() => false,
            received = rx.recv() => received.is_some(),
        };

        session.stop().await;
        Ok(changed)
    }

    async fn wait_for_hooks(&self) {
        let hooks = &self.runtime.hooks;
        hooks.close();
        hooks.wait().await;
        hooks.reopen();
    }
}

async fn shutdown_all(runners: Vec<UnitRunner>) {
    for runner in runners {
        runner.shutdown().await;
    }
}

/// Signals a reload when the manifest file is rewritten.
struct ManifestHandler {
    tx: mpsc::Sender<()>,
}

#[async_trait]
impl WatchHandler<()> for ManifestHandler {
    fn name(&self) -> &str {
        "manifest"
    }

    async fn on_event(&self, event: WatchEvent<()>) -> Result<(), HandlerError> {
        // Editors that replace the file produce unlink + add
        let reload = match event.kind {
            WatchEventKind::Change => true,
            WatchEventKind::Add => !event.initial,
            WatchEventKind::Unlink => false,
        };
        if reload {
            let _ = self.tx.try_send(());
        }
        Ok(())
    }
}
