//! On-change hook processes.
//!
//! Hooks run after successful renders. Their failures are logged and never
//! reach the render that triggered them.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio_util::task::TaskTracker;

use crate::manifest::HookSpec;

#[derive(Error, Debug)]
pub enum HookError {
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program} {}' exited with {}", .args.join(" "), format_code(.code))]
    ProcessExit {
        program: String,
        args: Vec<String>,
        code: Option<i32>,
    },
}

fn format_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {code}"),
        None => "a signal".to_string(),
    }
}

/// Runs hook commands on behalf of one unit.
///
/// Background hooks are spawned on a shared tracker so the supervisor can
/// wait for them before a one-shot run exits.
#[derive(Debug, Clone)]
pub struct HookRunner {
    component: Arc<str>,
    tracker: TaskTracker,
}

impl HookRunner {
    pub fn new(component: impl Into<String>) -> Self {
        Self::with_tracker(component, TaskTracker::new())
    }

    pub fn with_tracker(component: impl Into<String>, tracker: TaskTracker) -> Self {
        Self {
            component: Arc::from(component.into()),
            tracker,
        }
    }

    /// Run a hook to completion.
    ///
    /// `context_path` is the file whose render caused the hook; it tags the
    /// captured output.
    pub async fn run(&self, spec: &HookSpec, context_path: &Path) -> Result<(), HookError> {
        let program = spec.program().to_string();
        let component = &self.component;
        crate::debug_event!(component, "hook", "{} ({})", spec.display(), context_path.display());

        let mut child = Command::new(&program)
            .args(spec.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| HookError::Spawn {
                program: program.clone(),
                source,
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let command = spec.display();
        let tag = format!("[{component}] {} [{command}]", context_path.display());

        // Both pipes are consumed while the process runs
        tokio::join!(
            forward(stdout, spec.capture_stdout, |line| {
                tracing::debug!("{tag} stdout: {line}");
            }),
            forward(stderr, spec.capture_stderr, |line| {
                tracing::error!("{tag} {line}");
            }),
        );

        let status = child.wait().await.map_err(|source| HookError::Spawn {
            program: program.clone(),
            source,
        })?;

        if status.success() {
            Ok(())
        } else {
            Err(HookError::ProcessExit {
                program,
                args: spec.args().to_vec(),
                code: status.code(),
            })
        }
    }

    /// Run a hook in the background, logging any failure.
    pub fn fire(&self, spec: &HookSpec, context_path: &Path) {
        let runner = self.clone();
        let spec = spec.clone();
        let context_path: PathBuf = context_path.to_path_buf();

        self.tracker.spawn(async move {
            if let Err(e) = runner.run(&spec, &context_path).await {
                tracing::error!(
                    "[{}] hook failed for {}: {e}",
                    runner.component,
                    context_path.display()
                );
            }
        });
    }
}

/// Consume one child pipe.
///
/// Captured streams are logged line by line as they arrive; the rest are
/// discarded without buffering.
async fn forward<R, F>(pipe: Option<R>, capture: bool, on_line: F)
where
    R: AsyncRead + Unpin,
    F: FnMut(&str),
{
    let Some(pipe) = pipe else {
        return;
    };
    if capture {
        let _ = read_lines(pipe, on_line).await;
    } else {
        let _ = drain(pipe).await;
    }
}

/// Feed every non-blank line (lossy UTF-8) to `on_line` until EOF.
async fn read_lines<R, F>(pipe: R, mut on_line: F) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    F: FnMut(&str),
{
    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            return Ok(());
        }
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end_matches(['\n', '\r']);
        if !line.trim().is_empty() {
            on_line(line);
        }
    }
}

async fn drain<R: AsyncRead + Unpin>(mut pipe: R) -> std::io::Result<u64> {
    tokio::io::copy(&mut pipe, &mut tokio::io::sink()).await
}
