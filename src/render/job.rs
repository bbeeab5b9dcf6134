//! Single-file and batch render jobs.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::context::build_context;
use super::environment::RenderEnvironment;
use super::renderer::{RenderOutput, RenderRequest, Renderer};
use super::RenderError;
use crate::cache::{CacheMap, DataSourceEntry, FileEntry, PathEntry, snapshot};
use crate::hooks::HookRunner;
use crate::manifest::{DataSourceRef, FileSpec, HookSpec};
use crate::scheduler::{RenderJob, Trigger};

/// Per-unit state shared by every render job of the unit.
pub struct RenderScope {
    pub label: String,
    pub renderer: Arc<dyn Renderer>,
    /// Shared by all units; bounds renders in flight.
    pub permits: Arc<Semaphore>,
    pub environment: Arc<RwLock<Arc<RenderEnvironment>>>,
    pub datasources: CacheMap<DataSourceEntry>,
    pub templates: CacheMap<PathEntry>,
    pub pass_through: Vec<Arc<DataSourceRef>>,
    pub args: Vec<String>,
    pub on_change: Option<HookSpec>,
    pub hooks: HookRunner,
}

impl RenderScope {
    /// Current environment snapshot.
    pub fn environment(&self) -> Arc<RenderEnvironment> {
        Arc::clone(&self.environment.read())
    }

    /// Swap in a new environment. Renders already running keep the old one.
    pub fn replace_environment(&self, next: RenderEnvironment) {
        *self.environment.write() = Arc::new(next);
    }
}

/// Trigger for a single-file target.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileTrigger {
    /// Set when the file's own change event caused the render.
    pub causal: bool,
}

impl Trigger for FileTrigger {
    fn merge(&mut self, newer: Self) {
        self.causal |= newer.causal;
    }
}

/// The source event behind a batch render.
#[derive(Debug, Clone)]
pub struct BatchCause {
    pub path: PathBuf,
    pub on_change: Option<HookSpec>,
}

/// Trigger for a unit's batch target.
#[derive(Debug, Clone, Default)]
pub struct BatchTrigger {
    pub cause: Option<BatchCause>,
}

impl Trigger for BatchTrigger {
    fn merge(&mut self, newer: Self) {
        if newer.cause.is_some() {
            self.cause = newer.cause;
        }
    }
}

/// Write rendered text, creating the parent directory when it is missing.
pub async fn write_output(path: &Path, text: &str) -> Result<(), RenderError> {
    let write_error = |source| RenderError::Write {
        path: path.to_path_buf(),
        source,
    };

    match tokio::fs::write(path, text).await {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            if let Some(dir) = path.parent() {
                tokio::fs::create_dir_all(dir).await.map_err(write_error)?;
            }
            tokio::fs::write(path, text).await.map_err(write_error)
        }
        result => result.map_err(write_error),
    }
}

/// Renders one file entry.
///
/// Holds a data-only snapshot of the entry so the target never keeps its own
/// handle alive.
pub struct FileJob {
    pub filepath: PathBuf,
    pub owner: Arc<FileSpec>,
    pub output_path: Option<PathBuf>,
    pub scope: Arc<RenderScope>,
}

impl FileJob {
    fn request(&self, data_sources: &[Arc<DataSourceEntry>]) -> RenderRequest {
        let scope = &self.scope;
        let mut args = scope.args.clone();
        args.extend(self.owner.args.iter().cloned());

        RenderRequest {
            input: self.filepath.clone(),
            output: self.output_path.clone(),
            left_delimiter: self.owner.left_delimiter.clone(),
            right_delimiter: self.owner.right_delimiter.clone(),
            args,
            data: Default::default(),
            data_files: data_sources
                .iter()
                .map(|e| (e.output_alias.clone(), e.filepath.clone()))
                .collect(),
            pass_through: scope
                .pass_through
                .iter()
                .map(|ds| (ds.pass_through_alias(), ds.url.clone()))
                .collect(),
            templates: snapshot(&scope.templates)
                .iter()
                .map(|e| e.filepath.clone())
                .collect(),
            environment: scope.environment(),
            root: self.owner.root.clone(),
        }
    }
}

#[async_trait]
impl RenderJob for FileJob {
    type Trigger = FileTrigger;

    async fn run(&self, trigger: FileTrigger) -> Result<(), RenderError> {
        let scope = &self.scope;
        let _permit = scope
            .permits
            .acquire()
            .await
            .map_err(|_| RenderError::Cancelled {
                target: self.filepath.display().to_string(),
            })?;

        let data_sources = snapshot(&scope.datasources);
        let mut request = self.request(&data_sources);
        request.data = build_context(&data_sources).await?;

        match scope.renderer.render(request).await? {
            RenderOutput::Text(text) => match &self.output_path {
                Some(path) => write_output(path, &text).await?,
                None => {
                    let mut stdout = tokio::io::stdout();
                    stdout
                        .write_all(text.as_bytes())
                        .await
                        .map_err(|source| RenderError::Write {
                            path: PathBuf::from("<stdout>"),
                            source,
                        })?;
                    let _ = stdout.flush().await;
                }
            },
            RenderOutput::Written => {}
        }

        match &self.output_path {
            Some(output) => crate::log_event!(
                scope.label,
                "rendered",
                "{} -> {}",
                self.filepath.display(),
                output.display()
            ),
            None => crate::log_event!(scope.label, "rendered", "{}", self.filepath.display()),
        }

        if let Some(hook) = &self.owner.on_change {
            scope.hooks.fire(hook, &self.filepath);
        }
        if trigger.causal
            && let Some(hook) = &scope.on_change
        {
            scope.hooks.fire(hook, &self.filepath);
        }

        Ok(())
    }
}

/// Re-renders every file of a unit after a source change.
pub struct BatchJob {
    pub scope: Arc<RenderScope>,
    pub files: CacheMap<FileEntry>,
}

#[async_trait]
impl RenderJob for BatchJob {
    type Trigger = BatchTrigger;

    async fn run(&self, trigger: BatchTrigger) -> Result<(), RenderError> {
        let entries = snapshot(&self.files);
        let total = entries.len();
        if total == 0 {
            return Ok(());
        }

        if let Some(cause) = &trigger.cause {
            crate::log_event!(
                self.scope.label,
                "batch",
                "{total} file(s) after change to {}",
                cause.path.display()
            );
        }

        let mut renders = JoinSet::new();
        for entry in entries {
            let handle = entry.render.clone();
            renders.spawn(async move { handle.render(FileTrigger { causal: false }).await });
        }

        let mut errors = Vec::new();
        while let Some(joined) = renders.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => errors.push(e),
                Err(e) => errors.push(Arc::new(RenderError::Cancelled {
                    target: format!("{} ({e})", self.scope.label),
                })),
            }
        }

        let failed = errors.len();
        if failed < total {
            let context_path = trigger
                .cause
                .as_ref()
                .map(|c| c.path.clone())
                .unwrap_or_default();
            if let Some(hook) = trigger.cause.as_ref().and_then(|c| c.on_change.as_ref()) {
                self.scope.hooks.fire(hook, &context_path);
            }
            if let Some(hook) = &self.scope.on_change {
                self.scope.hooks.fire(hook, &context_path);
            }
        }

        if failed > 0 {
            return Err(RenderError::Batch {
                failed,
                total,
                errors,
            });
        }
        Ok(())
    }
}
