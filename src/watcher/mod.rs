//! File watching.
//!
//! A [`WatchSession`] owns one native `notify` watcher over a set of path
//! patterns and turns raw notifications into add/change/unlink events for a
//! [`WatchHandler`]. Sessions can keep a cache map in step with the events.
//!
//! # Architecture
//!
//! ```text
//! notify thread ──► channel ──► session loop
//!                                 - PathRegistry (known paths, stamps)
//!                                 - WriteStabilizer (optional)
//!                                 - CacheBinding (optional)
//!                                       │
//!                                       ▼
//!                         WatchHandler::on_event (own task)
//! ```

mod error;
mod handler;
mod path_registry;
mod session;
mod stabilizer;

pub use error::{HandlerError, WatchError};
pub use handler::{WatchEvent, WatchEventKind, WatchHandler};
pub use path_registry::{FileStamp, PathRegistry};
pub use session::{WatchSession, WatchSessionBuilder};
pub use stabilizer::WriteStabilizer;
