//! Write stabilisation for file change events.
//!
//! Holds add/change notifications back until the file has stopped changing,
//! so half-written files are never read by a render.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use super::path_registry::FileStamp;

#[derive(Debug)]
struct PendingWrite {
    stamp: Option<FileStamp>,
    since: Instant,
}

/// Tracks paths whose writes have not settled yet.
#[derive(Debug)]
pub struct WriteStabilizer {
    pending: HashMap<PathBuf, PendingWrite>,
    /// How long a file's stamp must stay unchanged.
    stability: Duration,
}

impl WriteStabilizer {
    pub fn new(stability: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            stability,
        }
    }

    /// Record a write notification.
    ///
    /// Restarts the stability window when the stamp differs from the last one seen.
    pub fn record(&mut self, path: PathBuf, stamp: Option<FileStamp>) {
        let now = Instant::now();
        self.pending
            .entry(path)
            .and_modify(|p| {
                if p.stamp != stamp {
                    p.stamp = stamp;
                    p.since = now;
                }
            })
            .or_insert(PendingWrite { stamp, since: now });
    }

    /// Forget a path (it was deleted).
    pub fn remove(&mut self, path: &Path) {
        self.pending.remove(path);
    }

    /// Re-stat every pending path and take the ones that have been stable long enough.
    ///
    /// Paths that vanished are dropped; the unlink is reported by the event stream.
    pub fn take_ready(&mut self, stat: impl Fn(&Path) -> Option<FileStamp>) -> Vec<PathBuf> {
        let now = Instant::now();
        let stability = self.stability;
        let mut ready = Vec::new();

        self.pending.retain(|path, pending| {
            let current = stat(path);
            if current.is_none() {
                return false;
            }
            if current != pending.stamp {
                pending.stamp = current;
                pending.since = now;
                return true;
            }
            if now.duration_since(pending.since) >= stability {
                ready.push(path.clone());
                false
            } else {
                true
            }
        });

        ready.sort();
        ready
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}
