//! Path classification for output paths and data-source aliases.
//!
//! Given a file and the glob (or literal path) that matched it, [`PathInfo`]
//! breaks the file path into the pieces that `[key]` placeholders refer to.

use std::path::{Component, Path, PathBuf};

/// Characters that make a path component a glob.
const GLOB_CHARS: &[char] = &['*', '?', '[', '{'];

/// Template keys understood by [`PathInfo::get`].
pub const PATH_KEYS: &[&str] = &[
    "directory",
    "subdirectory",
    "namespace",
    "basename",
    "name",
    "stem",
    "extensions",
    "ext",
    "inner_ext",
];

/// Structured metadata derived from a matched path.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PathInfo {
    /// Parent directory of the file.
    pub directory: String,
    /// Parent directory relative to the pattern's static base.
    pub subdirectory: String,
    /// `subdirectory` with separators mapped to dots.
    pub namespace: String,
    /// File name including extensions.
    pub basename: String,
    /// File name minus its last extension, with `tmpl` components dropped.
    pub name: String,
    /// File name without any extension.
    pub stem: String,
    /// Full extension chain (`conf.tmpl`).
    pub extensions: String,
    /// Last extension (`tmpl`).
    pub ext: String,
    /// Extension chain minus the last one (`conf`).
    pub inner_ext: String,
}

impl PathInfo {
    /// Classify `path` against the pattern that matched it.
    pub fn classify(path: &Path, pattern: &str) -> Self {
        let parent = path.parent().unwrap_or_else(|| Path::new(""));
        let base = static_base(pattern);

        let subdirectory = parent
            .strip_prefix(&base)
            .map(join_components)
            .unwrap_or_default();

        let basename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        // A leading dot belongs to the name, not to an extension
        let (lead, rest) = match basename.strip_prefix('.') {
            Some(rest) => (".", rest),
            None => ("", basename.as_str()),
        };

        let (stem, extensions) = match rest.split_once('.') {
            Some((stem, exts)) => (format!("{lead}{stem}"), exts.to_string()),
            None => (basename.clone(), String::new()),
        };

        let (inner_ext, ext) = match extensions.rsplit_once('.') {
            Some((inner, last)) => (inner.to_string(), last.to_string()),
            None => (String::new(), extensions.clone()),
        };

        let without_last = match rest.rsplit_once('.') {
            Some((head, _)) => format!("{lead}{head}"),
            None => basename.clone(),
        };
        let name = without_last
            .split('.')
            .filter(|part| *part != "tmpl")
            .collect::<Vec<_>>()
            .join(".");

        Self {
            directory: parent.to_string_lossy().into_owned(),
            namespace: subdirectory.replace('/', "."),
            subdirectory,
            basename,
            name,
            stem,
            extensions,
            ext,
            inner_ext,
        }
    }

    /// Look up a template key.
    pub fn get(&self, key: &str) -> Option<&str> {
        let value = match key {
            "directory" => &self.directory,
            "subdirectory" => &self.subdirectory,
            "namespace" => &self.namespace,
            "basename" => &self.basename,
            "name" => &self.name,
            "stem" => &self.stem,
            "extensions" => &self.extensions,
            "ext" => &self.ext,
            "inner_ext" => &self.inner_ext,
            _ => return None,
        };
        Some(value.as_str())
    }
}

/// Whether a pattern contains glob metacharacters.
pub fn is_glob(pattern: &str) -> bool {
    pattern.contains(GLOB_CHARS)
}

/// Longest leading run of non-glob components.
///
/// For a literal path this is its parent directory.
pub fn static_base(pattern: &str) -> PathBuf {
    let path = Path::new(pattern);

    if !is_glob(pattern) {
        return path.parent().map(Path::to_path_buf).unwrap_or_default();
    }

    let mut base = PathBuf::new();
    for component in path.components() {
        if component.as_os_str().to_string_lossy().contains(GLOB_CHARS) {
            break;
        }
        base.push(component);
    }
    base
}

fn join_components(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Collapse doubled separators produced by empty template keys.
pub fn normalize_path(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut prev_slash = false;
    for ch in raw.chars() {
        if ch == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_base_of_glob() {
        assert_eq!(static_base("/srv/tmpl/**/*.tmpl"), PathBuf::from("/srv/tmpl"));
        assert_eq!(static_base("conf/*.yaml"), PathBuf::from("conf"));
        assert_eq!(static_base("*.tmpl"), PathBuf::new());
    }

    #[test]
    fn test_static_base_of_literal_is_parent() {
        assert_eq!(static_base("/srv/tmpl/a.tmpl"), PathBuf::from("/srv/tmpl"));
    }

    #[test]
    fn test_classify_nested_glob() {
        let info = PathInfo::classify(
            Path::new("/srv/tmpl/nginx/sites/default.conf.tmpl"),
            "/srv/tmpl/**/*.tmpl",
        );

        assert_eq!(info.directory, "/srv/tmpl/nginx/sites");
        assert_eq!(info.subdirectory, "nginx/sites");
        assert_eq!(info.namespace, "nginx.sites");
        assert_eq!(info.basename, "default.conf.tmpl");
        assert_eq!(info.name, "default.conf");
        assert_eq!(info.stem, "default");
        assert_eq!(info.extensions, "conf.tmpl");
        assert_eq!(info.ext, "tmpl");
        assert_eq!(info.inner_ext, "conf");
    }

    #[test]
    fn test_literal_matches_like_glob() {
        let literal = PathInfo::classify(Path::new("/srv/a.tmpl"), "/srv/a.tmpl");
        let glob = PathInfo::classify(Path::new("/srv/a.tmpl"), "/srv/*.tmpl");

        assert_eq!(literal, glob);
        assert_eq!(literal.subdirectory, "");
        assert_eq!(literal.name, "a");
    }

    #[test]
    fn test_name_round_trip_for_output_template() {
        let input = PathInfo::classify(Path::new("work/a.tmpl"), "work/*.tmpl");
        let output_name = format!("{}.out", input.name);
        let output = PathInfo::classify(&Path::new("work").join(&output_name), "work/*.out");

        assert_eq!(output.stem, input.stem);
        assert_eq!(output.name, input.name);
    }

    #[test]
    fn test_dotfile_keeps_leading_dot() {
        let info = PathInfo::classify(Path::new("/etc/.env.tmpl"), "/etc/*");
        assert_eq!(info.stem, ".env");
        assert_eq!(info.name, ".env");
        assert_eq!(info.ext, "tmpl");
    }

    #[test]
    fn test_no_extension() {
        let info = PathInfo::classify(Path::new("/etc/hosts"), "/etc/hosts");
        assert_eq!(info.name, "hosts");
        assert_eq!(info.stem, "hosts");
        assert_eq!(info.ext, "");
        assert_eq!(info.extensions, "");
    }

    #[test]
    fn test_get_known_and_unknown_keys() {
        let info = PathInfo::classify(Path::new("/a/b.yaml"), "/a/*.yaml");
        for key in PATH_KEYS {
            assert!(info.get(key).is_some(), "missing key {key}");
        }
        assert_eq!(info.get("bogus"), None);
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/out//a.conf"), "/out/a.conf");
        assert_eq!(normalize_path("out///x"), "out/x");
    }
}
