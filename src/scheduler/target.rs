//! Render target actor.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep_until, timeout};

use super::{RatePolicy, RenderJob, Trigger};
use crate::error::ErrorSink;
use crate::render::RenderError;

/// Result handed to waiters. Shared because one run can serve many waiters.
pub type RenderOutcome = Result<(), Arc<RenderError>>;

struct Request<T> {
    trigger: T,
    waiter: Option<oneshot::Sender<RenderOutcome>>,
}

/// Triggers and waiters collected for one run.
struct Coalesced<T> {
    trigger: T,
    waiters: Vec<oneshot::Sender<RenderOutcome>>,
    merged: usize,
}

impl<T: Trigger> Coalesced<T> {
    fn new(first: Request<T>) -> Self {
        Self {
            trigger: first.trigger,
            waiters: first.waiter.into_iter().collect(),
            merged: 1,
        }
    }

    fn absorb(&mut self, next: Request<T>) {
        self.trigger.merge(next.trigger);
        self.waiters.extend(next.waiter);
        self.merged += 1;
    }

    fn drain(&mut self, rx: &mut mpsc::UnboundedReceiver<Request<T>>) {
        while let Ok(next) = rx.try_recv() {
            self.absorb(next);
        }
    }
}

/// Cloneable handle to a running render target.
///
/// The actor exits once every handle is dropped and queued work has run.
pub struct RenderHandle<T> {
    label: Arc<str>,
    tx: mpsc::UnboundedSender<Request<T>>,
}

impl<T> Clone for RenderHandle<T> {
    fn clone(&self) -> Self {
        Self {
            label: Arc::clone(&self.label),
            tx: self.tx.clone(),
        }
    }
}

impl<T> std::fmt::Debug for RenderHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderHandle")
            .field("label", &self.label)
            .finish()
    }
}

impl<T: Trigger> RenderHandle<T> {
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Request a run without waiting for it. Failures go to the error sink.
    ///
    /// Returns false when the target is no longer running.
    pub fn trigger(&self, trigger: T) -> bool {
        self.tx
            .send(Request {
                trigger,
                waiter: None,
            })
            .is_ok()
    }

    /// Request a run and wait for the outcome of the run that serves it.
    pub async fn render(&self, trigger: T) -> RenderOutcome {
        let (waiter, outcome) = oneshot::channel();
        let request = Request {
            trigger,
            waiter: Some(waiter),
        };
        if self.tx.send(request).is_err() {
            return Err(self.cancelled());
        }
        outcome.await.unwrap_or_else(|_| Err(self.cancelled()))
    }

    fn cancelled(&self) -> Arc<RenderError> {
        Arc::new(RenderError::Cancelled {
            target: self.label.to_string(),
        })
    }
}

/// Spawn the actor for a render target and return its handle.
///
/// Must be called from within a tokio runtime.
pub fn spawn_target<J: RenderJob>(
    label: impl Into<String>,
    job: J,
    policy: RatePolicy,
    sink: ErrorSink,
) -> RenderHandle<J::Trigger> {
    let label: Arc<str> = Arc::from(label.into());
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(run_target(Arc::clone(&label), job, policy, sink, rx));

    RenderHandle { label, tx }
}

async fn run_target<J: RenderJob>(
    label: Arc<str>,
    job: J,
    policy: RatePolicy,
    sink: ErrorSink,
    mut rx: mpsc::UnboundedReceiver<Request<J::Trigger>>,
) {
    let mut last_start: Option<Instant> = None;

    while let Some(first) = rx.recv().await {
        let mut batch = Coalesced::new(first);

        match policy {
            RatePolicy::Debounce(quiet) => loop {
                match timeout(quiet, rx.recv()).await {
                    Ok(Some(next)) => batch.absorb(next),
                    // Quiet period elapsed, or every handle is gone
                    Ok(None) | Err(_) => break,
                }
            },
            RatePolicy::Throttle(interval) => {
                if let Some(start) = last_start {
                    sleep_until(start + interval).await;
                }
                batch.drain(&mut rx);
            }
            RatePolicy::Immediate => batch.drain(&mut rx),
        }

        if batch.merged > 1 {
            crate::debug_event!("scheduler", "coalesced", "{label}: {} triggers", batch.merged);
        }

        last_start = Some(Instant::now());
        let outcome = job.run(batch.trigger).await.map_err(Arc::new);

        if batch.waiters.is_empty() {
            if let Err(e) = &outcome {
                sink.report(&label, e);
            }
        } else {
            for waiter in batch.waiters {
                let _ = waiter.send(outcome.clone());
            }
        }
    }

    crate::debug_event!("scheduler", "stopped", "{label}");
}
