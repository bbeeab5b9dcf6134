//! Engine settings.
//!
//! Layered configuration:
//! - Default values
//! - TOML settings file (`reconf.toml` or `--settings <path>`)
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `RECONF_` and use double underscores
//! to separate nested levels:
//! - `RECONF_MANIFEST_PATH=/etc/reconf.yml` sets `manifest_path`
//! - `RECONF_RENDER__CONCURRENCY=8` sets `render.concurrency`
//! - `RECONF_WATCH__AWAIT_WRITE_MS=0` disables write stabilisation

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::scheduler::RatePolicy;

/// Default settings file looked up in the working directory.
pub const DEFAULT_SETTINGS_FILE: &str = "reconf.toml";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Version of the settings schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Path to the YAML manifest
    #[serde(default = "default_manifest_path")]
    pub manifest_path: PathBuf,

    /// Root used to resolve relative manifest paths (defaults to the working directory)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<PathBuf>,

    #[serde(default)]
    pub render: RenderConfig,

    #[serde(default)]
    pub watch: WatchConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RenderConfig {
    /// Maximum renders in flight across all units (0 = unlimited)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Rate window for single-file renders
    #[serde(default = "default_file_delay_ms")]
    pub file_delay_ms: u64,

    /// Rate window for batch renders triggered by data sources, templates or dependencies
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,

    /// How bursts are collapsed
    #[serde(default)]
    pub policy: PolicyKind,

    /// Which renderer performs the substitution
    #[serde(default)]
    pub engine: EngineKind,

    /// External renderer settings, used when `engine = "process"`
    #[serde(default)]
    pub process: ProcessRendererConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    #[default]
    Debounce,
    Throttle,
    Immediate,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    #[default]
    Jinja,
    Process,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProcessRendererConfig {
    #[serde(default = "default_process_program")]
    pub program: String,

    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WatchConfig {
    /// How long a file must be unchanged before add/change is emitted (0 = off)
    #[serde(default = "default_await_write_ms")]
    pub await_write_ms: u64,

    /// Poll interval while waiting for writes to settle
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Default level: error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-module overrides (target -> level)
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

fn default_version() -> u32 {
    1
}
fn default_manifest_path() -> PathBuf {
    PathBuf::from("config.yml")
}
fn default_concurrency() -> usize {
    1000
}
fn default_file_delay_ms() -> u64 {
    500
}
fn default_batch_delay_ms() -> u64 {
    1000
}
fn default_process_program() -> String {
    "gomplate".to_string()
}
fn default_await_write_ms() -> u64 {
    2000
}
fn default_poll_interval_ms() -> u64 {
    100
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            manifest_path: default_manifest_path(),
            workspace_root: None,
            render: RenderConfig::default(),
            watch: WatchConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            file_delay_ms: default_file_delay_ms(),
            batch_delay_ms: default_batch_delay_ms(),
            policy: PolicyKind::default(),
            engine: EngineKind::default(),
            process: ProcessRendererConfig::default(),
        }
    }
}

impl Default for ProcessRendererConfig {
    fn default() -> Self {
        Self {
            program: default_process_program(),
            args: Vec::new(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            await_write_ms: default_await_write_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl RenderConfig {
    /// Rate policy for single-file targets.
    pub fn file_policy(&self) -> RatePolicy {
        RatePolicy::from_kind(self.policy, Duration::from_millis(self.file_delay_ms))
    }

    /// Rate policy for per-unit batch targets.
    pub fn batch_policy(&self) -> RatePolicy {
        RatePolicy::from_kind(self.policy, Duration::from_millis(self.batch_delay_ms))
    }
}

impl WatchConfig {
    /// Write stabilisation window, `None` when disabled.
    pub fn stability(&self) -> Option<Duration> {
        (self.await_write_ms > 0).then(|| Duration::from_millis(self.await_write_ms))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Settings {
    /// Load settings from defaults, `reconf.toml` in the working directory, and env.
    pub fn load() -> Result<Self, Box<figment::Error>> {
        Self::load_from(DEFAULT_SETTINGS_FILE)
    }

    /// Load settings from a specific TOML file (missing files are skipped).
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            // Double underscore separates nested levels, single underscore stays in names
            .merge(Env::prefixed("RECONF_").map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
            .extract()
            .map_err(Box::new)
    }

    /// Workspace root used for relative path resolution.
    pub fn resolved_root(&self) -> PathBuf {
        self.workspace_root
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Render the effective settings as TOML.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.version, 1);
        assert_eq!(settings.manifest_path, PathBuf::from("config.yml"));
        assert_eq!(settings.render.concurrency, 1000);
        assert_eq!(settings.render.file_delay_ms, 500);
        assert_eq!(settings.render.batch_delay_ms, 1000);
        assert_eq!(settings.render.policy, PolicyKind::Debounce);
        assert_eq!(settings.watch.await_write_ms, 2000);
        assert_eq!(settings.watch.poll_interval_ms, 100);
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("reconf.toml");

        let toml_content = r#"
manifest_path = "/etc/reconf/config.yml"

[render]
concurrency = 4
policy = "throttle"
engine = "process"

[render.process]
program = "gomplate"
args = ["--verbose"]

[watch]
await_write_ms = 0
"#;

        fs::write(&config_path, toml_content).unwrap();

        let settings = Settings::load_from(&config_path).unwrap();
        assert_eq!(settings.manifest_path, PathBuf::from("/etc/reconf/config.yml"));
        assert_eq!(settings.render.concurrency, 4);
        assert_eq!(settings.render.policy, PolicyKind::Throttle);
        assert_eq!(settings.render.engine, EngineKind::Process);
        assert_eq!(settings.render.process.args, vec!["--verbose"]);
        assert!(settings.watch.stability().is_none());
        // Untouched values keep their defaults
        assert_eq!(settings.render.file_delay_ms, 500);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let settings = Settings::load_from(temp_dir.path().join("absent.toml")).unwrap();
        assert_eq!(settings.render.batch_delay_ms, 1000);
    }

    #[test]
    fn test_policies_follow_kind() {
        let mut settings = Settings::default();
        assert_eq!(
            settings.render.file_policy(),
            RatePolicy::Debounce(Duration::from_millis(500))
        );

        settings.render.policy = PolicyKind::Throttle;
        assert_eq!(
            settings.render.batch_policy(),
            RatePolicy::Throttle(Duration::from_millis(1000))
        );
    }

    #[test]
    fn test_to_toml_round_trips_through_loader() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("reconf.toml");

        let mut settings = Settings::default();
        settings.render.concurrency = 2;
        fs::write(&path, settings.to_toml().unwrap()).unwrap();

        let loaded = Settings::load_from(&path).unwrap();
        assert_eq!(loaded.render.concurrency, 2);
    }
}
