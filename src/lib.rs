//! reconf: a reactive configuration renderer.
//!
//! A YAML manifest lists config units. Each unit names template files to
//! render, the data sources, templates and dependency files they read, and
//! hooks to run after a render. The engine renders every unit once and, for
//! units with `watch: true`, keeps the outputs current as inputs change.

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod hooks;
pub mod logging;
pub mod manifest;
pub mod paths;
pub mod render;
pub mod scheduler;
pub mod supervisor;
pub mod unit;
pub mod watcher;

pub use config::Settings;
pub use error::{EngineError, EngineResult, ErrorSink};
pub use supervisor::{RunOutcome, Supervisor};
