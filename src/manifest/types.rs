//! Typed, validated manifest records.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use glob::{MatchOptions, Pattern};
use indexmap::IndexSet;
use url::Url;

use super::template::PathTemplate;
use crate::paths::{is_glob, static_base};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// A declared path: either a literal file or a glob.
#[derive(Debug, Clone)]
pub struct PathPattern {
    raw: String,
    glob: Option<Pattern>,
}

impl PathPattern {
    pub fn new(raw: impl Into<String>) -> Result<Self, String> {
        let raw = raw.into();
        let glob = if is_glob(&raw) {
            Some(Pattern::new(&raw).map_err(|e| format!("invalid glob {raw:?}: {e}"))?)
        } else {
            None
        };
        Ok(Self { raw, glob })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_glob(&self) -> bool {
        self.glob.is_some()
    }

    /// Exact equality with the declared path.
    pub fn matches_exact(&self, path: &Path) -> bool {
        path == Path::new(&self.raw)
    }

    /// Glob match (literal patterns never glob-match).
    pub fn matches_glob(&self, path: &Path) -> bool {
        self.glob
            .as_ref()
            .is_some_and(|g| g.matches_path_with(path, MATCH_OPTIONS))
    }

    pub fn matches(&self, path: &Path) -> bool {
        self.matches_exact(path) || self.matches_glob(path)
    }

    /// Directory a watcher must observe to see this pattern's files.
    pub fn watch_root(&self) -> PathBuf {
        static_base(&self.raw)
    }

    /// Paths currently matching the pattern, in sorted order.
    pub fn expand(&self) -> Vec<PathBuf> {
        match &self.glob {
            Some(_) => glob::glob_with(&self.raw, MATCH_OPTIONS)
                .map(|paths| paths.filter_map(Result::ok).collect())
                .unwrap_or_default(),
            None => {
                let path = PathBuf::from(&self.raw);
                if path.exists() { vec![path] } else { Vec::new() }
            }
        }
    }
}

/// Find the record owning `path`: exact matches win over glob matches,
/// and among each kind the first declared record wins.
pub fn find_owner<'a, T>(
    records: &'a [Arc<T>],
    path: &Path,
    pattern_of: impl Fn(&T) -> &PathPattern,
) -> Option<&'a Arc<T>> {
    records
        .iter()
        .find(|r| pattern_of(r.as_ref()).matches_exact(path))
        .or_else(|| {
            records
                .iter()
                .find(|r| pattern_of(r.as_ref()).matches_glob(path))
        })
}

/// External command run after a successful render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookSpec {
    /// Program followed by its arguments (never empty).
    pub command: Vec<String>,
    pub capture_stdout: bool,
    pub capture_stderr: bool,
}

impl HookSpec {
    pub fn program(&self) -> &str {
        self.command.first().map(String::as_str).unwrap_or_default()
    }

    pub fn args(&self) -> &[String] {
        self.command.get(1..).unwrap_or_default()
    }

    /// Full command line for logs.
    pub fn display(&self) -> String {
        self.command.join(" ")
    }
}

/// A dependency, template or custom loader file.
#[derive(Debug, Clone)]
pub struct FilePathRef {
    pub path: PathPattern,
    pub on_change: Option<HookSpec>,
    pub args: Vec<String>,
}

/// Local file backing for a data source.
#[derive(Debug, Clone)]
pub struct LocalSource {
    pub path: PathPattern,
    pub alias: PathTemplate,
}

#[derive(Debug, Clone)]
pub struct DataSourceRef {
    /// Declared location (a `file:` URL, a bare path, or any other URL).
    pub url: String,
    pub alias: Option<String>,
    pub on_change: Option<HookSpec>,
    pub args: Vec<String>,
    /// Present when the source resolves to local files.
    pub local: Option<LocalSource>,
}

impl DataSourceRef {
    /// Alias used for pass-through sources (falls back to the URL itself).
    pub fn pass_through_alias(&self) -> String {
        self.alias.clone().unwrap_or_else(|| self.url.clone())
    }
}

/// Where a data-source location points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    Local(PathBuf),
    Remote(Url),
}

impl SourceLocation {
    /// Classify a data-source string.
    ///
    /// `file:` URLs and strings that are not absolute URLs are local paths;
    /// every other scheme is passed through to the renderer.
    pub fn parse(raw: &str, root: &Path) -> Result<Self, String> {
        match Url::parse(raw) {
            Ok(url) if url.scheme() == "file" => {
                let path = url
                    .to_file_path()
                    .map_err(|_| format!("cannot convert {raw:?} to a local path"))?;
                Ok(SourceLocation::Local(path))
            }
            Ok(url) => Ok(SourceLocation::Remote(url)),
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                Ok(SourceLocation::Local(resolve(root, raw)))
            }
            Err(e) => Err(format!("invalid data source url {raw:?}: {e}")),
        }
    }
}

/// A file to render.
#[derive(Debug, Clone)]
pub struct FileSpec {
    pub input: PathPattern,
    pub output: Option<PathTemplate>,
    pub left_delimiter: Option<String>,
    pub right_delimiter: Option<String>,
    pub on_change: Option<HookSpec>,
    pub args: Vec<String>,
    /// Workspace root; outputs that render to relative paths land under it.
    pub root: PathBuf,
}

/// One manifest item.
#[derive(Debug, Clone)]
pub struct ConfigUnit {
    /// Position in the manifest, used in logs.
    pub index: usize,
    pub watch: bool,
    pub dependencies: Vec<Arc<FilePathRef>>,
    pub templates: Vec<Arc<FilePathRef>>,
    pub custom: Vec<Arc<FilePathRef>>,
    pub file_data_sources: Vec<Arc<DataSourceRef>>,
    pub other_data_sources: Vec<Arc<DataSourceRef>>,
    pub files: Vec<Arc<FileSpec>>,
    pub on_change: Option<HookSpec>,
    pub args: Vec<String>,
}

impl ConfigUnit {
    /// Label used as the log component for this unit.
    pub fn label(&self) -> String {
        format!("unit#{}", self.index)
    }

    /// Patterns of the file-backed data sources.
    pub fn data_source_patterns(&self) -> Vec<PathPattern> {
        self.file_data_sources
            .iter()
            .filter_map(|ds| ds.local.as_ref().map(|l| l.path.clone()))
            .collect()
    }
}

/// Collect the distinct patterns of a list of path records.
pub fn patterns_of(records: &[Arc<FilePathRef>]) -> Vec<PathPattern> {
    let mut seen = IndexSet::new();
    records
        .iter()
        .filter(|r| seen.insert(r.path.as_str().to_string()))
        .map(|r| r.path.clone())
        .collect()
}

/// Resolve a manifest path against the workspace root.
pub fn resolve(root: &Path, raw: &str) -> PathBuf {
    let path = Path::new(raw);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path.strip_prefix("./").unwrap_or(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(path: &str) -> Arc<FilePathRef> {
        Arc::new(FilePathRef {
            path: PathPattern::new(path).unwrap(),
            on_change: None,
            args: Vec::new(),
        })
    }

    #[test]
    fn test_exact_match_wins_over_earlier_glob() {
        let records = vec![record("/t/*.tmpl"), record("/t/a.tmpl")];
        let owner = find_owner(&records, Path::new("/t/a.tmpl"), |r| &r.path).unwrap();
        assert_eq!(owner.path.as_str(), "/t/a.tmpl");
    }

    #[test]
    fn test_glob_fallback_and_miss() {
        let records = vec![record("/t/*.tmpl")];
        assert!(find_owner(&records, Path::new("/t/b.tmpl"), |r| &r.path).is_some());
        assert!(find_owner(&records, Path::new("/t/sub/b.tmpl"), |r| &r.path).is_none());
        assert!(find_owner(&records, Path::new("/t/b.yaml"), |r| &r.path).is_none());
    }

    #[test]
    fn test_double_star_crosses_directories() {
        let pattern = PathPattern::new("/t/**/*.tmpl").unwrap();
        assert!(pattern.matches(Path::new("/t/a/b/c.tmpl")));
        assert_eq!(pattern.watch_root(), PathBuf::from("/t"));
    }

    #[test]
    fn test_source_location_kinds() {
        let root = Path::new("/work");
        assert_eq!(
            SourceLocation::parse("file:///etc/data.yaml", root).unwrap(),
            SourceLocation::Local(PathBuf::from("/etc/data.yaml"))
        );
        assert_eq!(
            SourceLocation::parse("data/app.yaml", root).unwrap(),
            SourceLocation::Local(PathBuf::from("/work/data/app.yaml"))
        );
        assert!(matches!(
            SourceLocation::parse("https://example.com/cfg.json", root).unwrap(),
            SourceLocation::Remote(_)
        ));
    }

    #[test]
    fn test_hook_spec_parts() {
        let hook = HookSpec {
            command: vec!["nginx".into(), "-s".into(), "reload".into()],
            capture_stdout: false,
            capture_stderr: true,
        };
        assert_eq!(hook.program(), "nginx");
        assert_eq!(hook.args(), ["-s".to_string(), "reload".to_string()]);
        assert_eq!(hook.display(), "nginx -s reload");
    }
}
