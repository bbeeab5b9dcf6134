//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reconf::config::{PolicyKind, Settings};
use reconf::render::{JinjaRenderer, RenderError, RenderOutput, RenderRequest, Renderer};

/// Settings tuned for tests: no write stabilisation and short windows.
pub fn test_settings(root: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.workspace_root = Some(root.to_path_buf());
    settings.manifest_path = root.join("config.yml");
    settings.render.file_delay_ms = 50;
    settings.render.batch_delay_ms = 100;
    settings.render.policy = PolicyKind::Debounce;
    settings.watch.await_write_ms = 0;
    settings.watch.poll_interval_ms = 20;
    settings
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

/// Wait until `path` exists and contains `expected`.
pub async fn wait_for_content(path: &Path, expected: &str) -> bool {
    wait_until(Duration::from_secs(5), || {
        std::fs::read_to_string(path).is_ok_and(|c| c == expected)
    })
    .await
}

/// Number of lines in a file, zero when it does not exist.
pub fn line_count(path: &Path) -> usize {
    std::fs::read_to_string(path)
        .map(|c| c.lines().count())
        .unwrap_or(0)
}

/// Wraps the jinja renderer and counts calls.
#[derive(Default)]
pub struct CountingRenderer {
    inner: JinjaRenderer,
    calls: AtomicUsize,
}

impl CountingRenderer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Renderer for CountingRenderer {
    fn name(&self) -> &str {
        "counting"
    }

    async fn render(&self, request: RenderRequest) -> Result<RenderOutput, RenderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.render(request).await
    }
}
