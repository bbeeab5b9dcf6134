//! Render scheduling.
//!
//! Every render target (one per output file, one batch target per unit) is a
//! small actor task fed by a channel. The actor guarantees at most one run in
//! flight for its target and collapses bursts of triggers according to a
//! [`RatePolicy`]:
//!
//! ```text
//! trigger ─┐
//! trigger ─┼─► channel ─► actor ─► policy wait ─► merge ─► RenderJob::run
//! trigger ─┘                 ▲                                   │
//!                            └──────── next burst ◄──────────────┘
//! ```
//!
//! Triggers that arrive while a run is in flight wait in the channel and are
//! merged into exactly one follow-up run.

mod target;

pub use target::{RenderHandle, RenderOutcome, spawn_target};

use std::time::Duration;

use async_trait::async_trait;

use crate::config::PolicyKind;
use crate::render::RenderError;

/// How a target collapses bursts of triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatePolicy {
    /// Run once the target has been quiet for the window.
    Debounce(Duration),
    /// Start runs at least the interval apart.
    Throttle(Duration),
    /// Run as soon as the previous run finished.
    Immediate,
}

impl RatePolicy {
    pub fn from_kind(kind: PolicyKind, window: Duration) -> Self {
        match kind {
            PolicyKind::Debounce => RatePolicy::Debounce(window),
            PolicyKind::Throttle => RatePolicy::Throttle(window),
            PolicyKind::Immediate => RatePolicy::Immediate,
        }
    }
}

/// Payload delivered to a render target.
///
/// Triggers coalesced into one run are folded with `merge`, oldest first.
pub trait Trigger: Send + 'static {
    fn merge(&mut self, newer: Self);
}

/// The work a render target performs.
#[async_trait]
pub trait RenderJob: Send + Sync + 'static {
    type Trigger: Trigger;

    async fn run(&self, trigger: Self::Trigger) -> Result<(), RenderError>;
}
