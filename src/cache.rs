//! Per-unit path caches.
//!
//! Each unit keeps four maps (dependencies, data sources, templates, files)
//! from path to an immutable entry. A map is written only by the watch
//! session bound to it; renders read snapshots.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::manifest::{DataSourceRef, FilePathRef, FileSpec, find_owner, resolve};
use crate::paths::PathInfo;
use crate::render::FileTrigger;
use crate::scheduler::RenderHandle;
use crate::watcher::WatchEventKind;

pub type CacheMap<E> = Arc<RwLock<IndexMap<PathBuf, Arc<E>>>>;

/// Builds the entry for a path, or `None` when no record owns it.
pub type EntryFactory<E> = Arc<dyn Fn(&Path) -> Option<E> + Send + Sync>;

pub fn new_map<E>() -> CacheMap<E> {
    Arc::new(RwLock::new(IndexMap::new()))
}

/// Clone out the current entries, in insertion order.
pub fn snapshot<E>(map: &CacheMap<E>) -> Vec<Arc<E>> {
    map.read().values().cloned().collect()
}

/// A cache map paired with the factory that fills it.
pub struct CacheBinding<E> {
    map: CacheMap<E>,
    factory: EntryFactory<E>,
}

impl<E> Clone for CacheBinding<E> {
    fn clone(&self) -> Self {
        Self {
            map: Arc::clone(&self.map),
            factory: Arc::clone(&self.factory),
        }
    }
}

impl<E> fmt::Debug for CacheBinding<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheBinding")
            .field("entries", &self.map.read().len())
            .finish()
    }
}

impl<E> CacheBinding<E> {
    pub fn new(map: CacheMap<E>, factory: EntryFactory<E>) -> Self {
        Self { map, factory }
    }

    pub fn map(&self) -> &CacheMap<E> {
        &self.map
    }

    /// Keep the map in step with an event and return the entry for the path.
    ///
    /// Directories never touch the map. Add/change reuse a cached entry or
    /// build one; unlink removes the entry.
    pub fn apply(&self, kind: WatchEventKind, path: &Path, is_dir: bool) -> Option<Arc<E>> {
        if is_dir {
            return None;
        }

        match kind {
            WatchEventKind::Unlink => {
                self.map.write().shift_remove(path);
                None
            }
            WatchEventKind::Add | WatchEventKind::Change => {
                if let Some(existing) = self.map.read().get(path) {
                    return Some(Arc::clone(existing));
                }
                let entry = Arc::new((self.factory)(path)?);
                self.map
                    .write()
                    .insert(path.to_path_buf(), Arc::clone(&entry));
                Some(entry)
            }
        }
    }
}

/// Dependency, template or custom file entry.
#[derive(Debug)]
pub struct PathEntry {
    pub filepath: PathBuf,
    pub owner: Arc<FilePathRef>,
}

/// File-backed data source entry.
#[derive(Debug)]
pub struct DataSourceEntry {
    pub filepath: PathBuf,
    pub owner: Arc<DataSourceRef>,
    pub info: PathInfo,
    /// Alias the file's data is placed under.
    pub output_alias: String,
}

/// File to render, with its bound render target.
#[derive(Debug)]
pub struct FileEntry {
    pub filepath: PathBuf,
    pub owner: Arc<FileSpec>,
    pub output_path: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub render: RenderHandle<FileTrigger>,
}

/// The four maps of one unit.
#[derive(Debug)]
pub struct CacheMaps {
    pub dependencies: CacheMap<PathEntry>,
    pub datasources: CacheMap<DataSourceEntry>,
    pub templates: CacheMap<PathEntry>,
    pub files: CacheMap<FileEntry>,
}

impl Default for CacheMaps {
    fn default() -> Self {
        Self {
            dependencies: new_map(),
            datasources: new_map(),
            templates: new_map(),
            files: new_map(),
        }
    }
}

impl CacheMaps {
    pub fn clear(&self) {
        self.dependencies.write().clear();
        self.datasources.write().clear();
        self.templates.write().clear();
        self.files.write().clear();
    }
}

/// Factory for dependency and template maps.
pub fn path_factory(records: Vec<Arc<FilePathRef>>) -> EntryFactory<PathEntry> {
    Arc::new(move |path: &Path| {
        let owner = find_owner(&records, path, |r| &r.path)?;
        Some(PathEntry {
            filepath: path.to_path_buf(),
            owner: Arc::clone(owner),
        })
    })
}

/// Factory for the data-source map. Only file-backed sources own paths.
pub fn data_source_factory(records: Vec<Arc<DataSourceRef>>) -> EntryFactory<DataSourceEntry> {
    Arc::new(move |path: &Path| {
        let local = |ds: &Arc<DataSourceRef>| {
            ds.local
                .as_ref()
                .map(|l| (Arc::clone(ds), l.clone()))
        };
        let (owner, local) = records
            .iter()
            .filter_map(local)
            .find(|(_, l)| l.path.matches_exact(path))
            .or_else(|| {
                records
                    .iter()
                    .filter_map(local)
                    .find(|(_, l)| l.path.matches_glob(path))
            })?;

        let info = PathInfo::classify(path, local.path.as_str());
        let output_alias = local.alias.render(&info);
        Some(DataSourceEntry {
            filepath: path.to_path_buf(),
            owner,
            info,
            output_alias,
        })
    })
}

/// Resolved output location of a file to render.
#[derive(Debug, Clone)]
pub struct FileTarget {
    pub owner: Arc<FileSpec>,
    pub output_path: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
}

/// Find the file spec owning `path` and apply its output template.
pub fn resolve_file(files: &[Arc<FileSpec>], path: &Path) -> Option<FileTarget> {
    let owner = find_owner(files, path, |f| &f.input)?;
    let output_path = owner.output.as_ref().map(|template| {
        let info = PathInfo::classify(path, owner.input.as_str());
        resolve(&owner.root, &template.render(&info))
    });
    let output_dir = output_path
        .as_deref()
        .and_then(Path::parent)
        .map(Path::to_path_buf);

    Some(FileTarget {
        owner: Arc::clone(owner),
        output_path,
        output_dir,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{LocalSource, PathPattern, PathTemplate};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn record(path: &str) -> Arc<FilePathRef> {
        Arc::new(FilePathRef {
            path: PathPattern::new(path).unwrap(),
            on_change: None,
            args: Vec::new(),
        })
    }

    fn file_spec(input: &str, output: &str) -> Arc<FileSpec> {
        Arc::new(FileSpec {
            input: PathPattern::new(input).unwrap(),
            output: Some(PathTemplate::compile(output).unwrap()),
            left_delimiter: None,
            right_delimiter: None,
            on_change: None,
            args: Vec::new(),
            root: PathBuf::from("/t"),
        })
    }

    #[test]
    fn test_binding_creates_once_and_removes_on_unlink() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let inner = path_factory(vec![record("/t/*.yaml")]);
        let factory: EntryFactory<PathEntry> = Arc::new(move |p: &Path| {
            counter.fetch_add(1, Ordering::SeqCst);
            inner(p)
        });
        let binding = CacheBinding::new(new_map(), factory);
        let path = Path::new("/t/a.yaml");

        let first = binding.apply(WatchEventKind::Add, path, false).unwrap();
        let second = binding.apply(WatchEventKind::Change, path, false).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert!(binding.apply(WatchEventKind::Unlink, path, false).is_none());
        assert!(binding.map().read().is_empty());
    }

    #[test]
    fn test_binding_skips_directories_and_unowned_paths() {
        let binding = CacheBinding::new(new_map(), path_factory(vec![record("/t/*.yaml")]));

        assert!(binding.apply(WatchEventKind::Add, Path::new("/t/sub"), true).is_none());
        assert!(binding.apply(WatchEventKind::Add, Path::new("/t/a.json"), false).is_none());
        assert!(binding.map().read().is_empty());
    }

    #[test]
    fn test_exact_owner_wins_over_glob() {
        let glob = record("/t/*.yaml");
        let exact = record("/t/a.yaml");
        let factory = path_factory(vec![Arc::clone(&glob), Arc::clone(&exact)]);

        let entry = factory(Path::new("/t/a.yaml")).unwrap();
        assert!(Arc::ptr_eq(&entry.owner, &exact));
        let entry = factory(Path::new("/t/b.yaml")).unwrap();
        assert!(Arc::ptr_eq(&entry.owner, &glob));
    }

    #[test]
    fn test_data_source_alias_from_path() {
        let source = Arc::new(DataSourceRef {
            url: "/t/values/*.yaml".to_string(),
            alias: Some("values.[name]".to_string()),
            on_change: None,
            args: Vec::new(),
            local: Some(LocalSource {
                path: PathPattern::new("/t/values/*.yaml").unwrap(),
                alias: PathTemplate::compile("values.[name]").unwrap(),
            }),
        });
        let factory = data_source_factory(vec![source]);

        let entry = factory(Path::new("/t/values/db.yaml")).unwrap();
        assert_eq!(entry.output_alias, "values.db");
        assert!(factory(Path::new("/t/other/db.yaml")).is_none());
    }

    #[test]
    fn test_output_path_keeps_input_name() {
        let files = vec![file_spec("/t/tmpl/*.conf.tmpl", "/t/out/[name]")];

        let target = resolve_file(&files, Path::new("/t/tmpl/app.conf.tmpl")).unwrap();
        assert_eq!(target.output_path, Some(PathBuf::from("/t/out/app.conf")));
        assert_eq!(target.output_dir, Some(PathBuf::from("/t/out")));
    }

    #[test]
    fn test_output_path_relative_after_interpolation() {
        let files = vec![
            file_spec("/t/tmpl/**/*.tmpl", "[subdirectory]/[name].out"),
            file_spec("/t/conf/*.tmpl", "[directory]/[name].conf"),
        ];

        let target = resolve_file(&files, Path::new("/t/tmpl/web/app.tmpl")).unwrap();
        assert_eq!(target.output_path, Some(PathBuf::from("/t/web/app.out")));
        assert_eq!(target.output_dir, Some(PathBuf::from("/t/web")));

        // Interpolating an absolute directory keeps the path as is
        let target = resolve_file(&files, Path::new("/t/conf/db.tmpl")).unwrap();
        assert_eq!(target.output_path, Some(PathBuf::from("/t/conf/db.conf")));
    }
}
