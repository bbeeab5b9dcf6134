//! Rendering: context assembly, renderers and the render jobs run by the scheduler.

pub mod context;
pub mod environment;
mod error;
mod helpers;
mod job;
pub mod renderer;

pub use environment::{EnvironmentLoader, RenderEnvironment, ValuesLoader};
pub use error::RenderError;
pub use job::{BatchCause, BatchJob, BatchTrigger, FileJob, FileTrigger, RenderScope, write_output};
pub use renderer::{JinjaRenderer, ProcessRenderer, RenderOutput, RenderRequest, Renderer};
