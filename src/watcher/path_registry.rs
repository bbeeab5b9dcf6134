//! Known-path registry and watch root computation.
//!
//! The registry remembers a stamp for every path a session has reported,
//! which is what turns raw notifications into add/change/unlink events and
//! filters out duplicate notifications for unchanged files.

use std::collections::HashMap;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use notify::RecursiveMode;

use super::handler::WatchEventKind;
use crate::manifest::PathPattern;

/// Cheap snapshot of a path's metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStamp {
    pub len: u64,
    pub modified: Option<SystemTime>,
    pub is_dir: bool,
}

impl FileStamp {
    pub fn from_metadata(meta: &Metadata) -> Self {
        Self {
            len: meta.len(),
            modified: meta.modified().ok(),
            is_dir: meta.is_dir(),
        }
    }

    /// Stat a path, `None` when it does not exist.
    pub fn of(path: &Path) -> Option<Self> {
        std::fs::metadata(path).ok().map(|m| Self::from_metadata(&m))
    }
}

/// Registry of paths a session has reported.
#[derive(Debug, Default)]
pub struct PathRegistry {
    known: HashMap<PathBuf, FileStamp>,
}

impl PathRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a fresh observation into the registry.
    ///
    /// Returns the event to emit, or `None` when nothing observable changed.
    pub fn observe(&mut self, path: &Path, stamp: Option<FileStamp>) -> Option<WatchEventKind> {
        match (self.known.get(path).copied(), stamp) {
            (None, Some(stamp)) => {
                self.known.insert(path.to_path_buf(), stamp);
                Some(WatchEventKind::Add)
            }
            (Some(old), Some(stamp)) if old == stamp => None,
            (Some(_), Some(stamp)) => {
                self.known.insert(path.to_path_buf(), stamp);
                Some(WatchEventKind::Change)
            }
            (Some(_), None) => {
                self.known.remove(path);
                Some(WatchEventKind::Unlink)
            }
            (None, None) => None,
        }
    }

    /// Last stamp seen for a path.
    pub fn get(&self, path: &Path) -> Option<FileStamp> {
        self.known.get(path).copied()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.known.contains_key(path)
    }

    pub fn path_count(&self) -> usize {
        self.known.len()
    }

    /// Compute the directories to hand to `notify` for a set of patterns.
    ///
    /// Globs are watched recursively from their static base, literals through
    /// their parent directory. Missing roots fall back to the nearest existing
    /// ancestor (watched recursively) so files created later are still seen.
    pub fn compute_watch_roots(patterns: &[PathPattern]) -> Vec<(PathBuf, RecursiveMode)> {
        let mut roots: Vec<(PathBuf, RecursiveMode)> = Vec::new();

        for pattern in patterns {
            let mut root = pattern.watch_root();
            if root.as_os_str().is_empty() {
                root = PathBuf::from(".");
            }

            let mut mode = if pattern.is_glob() {
                RecursiveMode::Recursive
            } else {
                RecursiveMode::NonRecursive
            };

            while !root.exists() {
                match root.parent() {
                    Some(parent) if !parent.as_os_str().is_empty() => {
                        root = parent.to_path_buf();
                        mode = RecursiveMode::Recursive;
                    }
                    _ => {
                        root = PathBuf::from(".");
                        mode = RecursiveMode::Recursive;
                        break;
                    }
                }
            }

            match roots.iter_mut().find(|(existing, _)| *existing == root) {
                Some((_, existing_mode)) => {
                    if mode == RecursiveMode::Recursive {
                        *existing_mode = RecursiveMode::Recursive;
                    }
                }
                None => roots.push((root, mode)),
            }
        }

        roots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn stamp(len: u64, secs: u64) -> Option<FileStamp> {
        Some(FileStamp {
            len,
            modified: Some(SystemTime::UNIX_EPOCH + Duration::from_secs(secs)),
            is_dir: false,
        })
    }

    #[test]
    fn test_observe_lifecycle() {
        let mut registry = PathRegistry::new();
        let path = Path::new("/t/a.tmpl");

        assert_eq!(registry.observe(path, stamp(1, 1)), Some(WatchEventKind::Add));
        assert_eq!(registry.observe(path, stamp(2, 2)), Some(WatchEventKind::Change));
        assert_eq!(registry.observe(path, None), Some(WatchEventKind::Unlink));
        assert!(!registry.contains(path));
        assert_eq!(registry.observe(path, stamp(3, 3)), Some(WatchEventKind::Add));
    }

    #[test]
    fn test_duplicate_notification_dropped() {
        let mut registry = PathRegistry::new();
        let path = Path::new("/t/a.tmpl");

        assert_eq!(registry.observe(path, stamp(1, 1)), Some(WatchEventKind::Add));
        assert_eq!(registry.observe(path, stamp(1, 1)), None);
        assert_eq!(registry.path_count(), 1);
    }

    #[test]
    fn test_unknown_unlink_ignored() {
        let mut registry = PathRegistry::new();
        assert_eq!(registry.observe(Path::new("/t/gone"), None), None);
    }

    #[test]
    fn test_watch_roots_merge_and_fallback() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        std::fs::create_dir_all(root.join("tmpl")).unwrap();

        let patterns = vec![
            PathPattern::new(root.join("tmpl/a.tmpl").to_string_lossy()).unwrap(),
            PathPattern::new(root.join("tmpl/**/*.tmpl").to_string_lossy()).unwrap(),
            PathPattern::new(root.join("missing/deeper/*.yaml").to_string_lossy()).unwrap(),
        ];

        let roots = PathRegistry::compute_watch_roots(&patterns);

        assert_eq!(roots.len(), 2);
        assert_eq!(roots[0], (root.join("tmpl"), RecursiveMode::Recursive));
        assert_eq!(roots[1], (root.to_path_buf(), RecursiveMode::Recursive));
    }
}
