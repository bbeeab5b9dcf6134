//! Manifest loading, validation and normalisation.
//!
//! A manifest is a YAML document holding one config unit or a list of them.
//! Raw shapes live in [`schema`]; this module turns them into the typed
//! records of [`types`], resolving relative paths against the workspace root.

mod error;
mod schema;
mod template;
mod types;

pub use error::ManifestError;
pub use template::PathTemplate;
pub use types::{
    ConfigUnit, DataSourceRef, FilePathRef, FileSpec, HookSpec, LocalSource, PathPattern,
    SourceLocation, find_owner, patterns_of, resolve,
};

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use schema::{RawDataSource, RawFile, RawFilePath, RawHook, RawUnit};

/// Alias used for file data sources that declare none.
const DEFAULT_ALIAS: &str = "[name]";

/// Find the manifest on disk, preferring `.yaml` over `.yml`.
pub fn resolve_manifest_path(path: &Path) -> Result<PathBuf, ManifestError> {
    let stem = path.with_extension("");
    let candidates = [
        stem.with_extension("yaml"),
        stem.with_extension("yml"),
        path.to_path_buf(),
    ];

    candidates
        .iter()
        .find(|c| c.is_file())
        .cloned()
        .ok_or_else(|| ManifestError::NotFound {
            tried: candidates.to_vec(),
        })
}

/// Read and parse the manifest, returning the resolved path alongside the units.
pub async fn load_manifest(
    path: &Path,
    root: &Path,
) -> Result<(PathBuf, Vec<ConfigUnit>), ManifestError> {
    let resolved = resolve_manifest_path(path)?;
    let source = tokio::fs::read_to_string(&resolved)
        .await
        .map_err(|source| ManifestError::Io {
            path: resolved.clone(),
            source,
        })?;

    let units = parse_manifest(&source, &resolved, root)?;
    Ok((resolved, units))
}

/// Parse manifest text.
pub fn parse_manifest(
    source: &str,
    origin: &Path,
    root: &Path,
) -> Result<Vec<ConfigUnit>, ManifestError> {
    let document: serde_yaml::Value =
        serde_yaml::from_str(source).map_err(|source| ManifestError::Yaml {
            path: origin.to_path_buf(),
            source,
        })?;

    let raw_items = match document {
        serde_yaml::Value::Sequence(items) => items,
        serde_yaml::Value::Null => Vec::new(),
        single => vec![single],
    };

    if raw_items.is_empty() {
        return Err(ManifestError::Empty);
    }

    raw_items
        .into_iter()
        .enumerate()
        .map(|(index, value)| {
            let location = format!("items[{index}]");
            let raw: RawUnit = serde_yaml::from_value(value)
                .map_err(|e| ManifestError::invalid(&location, e.to_string()))?;
            build_unit(index, raw, root, &location)
        })
        .collect()
}

fn build_unit(
    index: usize,
    raw: RawUnit,
    root: &Path,
    location: &str,
) -> Result<ConfigUnit, ManifestError> {
    let dependencies = build_paths(raw.dependencies, root, &format!("{location}.dependencies"))?;
    let templates = build_paths(raw.templates, root, &format!("{location}.templates"))?;
    let custom = build_paths(raw.custom, root, &format!("{location}.custom"))?;

    let mut seen_urls = HashSet::new();
    let mut file_data_sources = Vec::new();
    let mut other_data_sources = Vec::new();
    for (i, ds) in raw.datasources.into_iter().enumerate() {
        let at = format!("{location}.datasources[{i}]");
        let ds = build_data_source(ds, root, &at)?;
        if !seen_urls.insert(ds.url.clone()) {
            return Err(ManifestError::invalid(at, format!("duplicate url {:?}", ds.url)));
        }
        if ds.local.is_some() {
            file_data_sources.push(Arc::new(ds));
        } else {
            other_data_sources.push(Arc::new(ds));
        }
    }

    let mut seen_inputs = HashSet::new();
    let mut seen_outputs = HashSet::new();
    let mut files = Vec::new();
    for (i, file) in raw.files.into_iter().enumerate() {
        let at = format!("{location}.files[{i}]");
        let spec = build_file(file, root, &at)?;
        if !seen_inputs.insert(spec.input.as_str().to_string()) {
            return Err(ManifestError::invalid(
                at,
                format!("duplicate input_path {:?}", spec.input.as_str()),
            ));
        }
        if let Some(output) = &spec.output
            && !seen_outputs.insert(output.as_str().to_string())
        {
            return Err(ManifestError::invalid(
                at,
                format!("duplicate output_path {:?}", output.as_str()),
            ));
        }
        files.push(Arc::new(spec));
    }

    Ok(ConfigUnit {
        index,
        watch: raw.watch,
        dependencies,
        templates,
        custom,
        file_data_sources,
        other_data_sources,
        files,
        on_change: build_hook(raw.on_change, &format!("{location}.on_change"))?,
        args: build_args(raw.args, &format!("{location}.args"))?,
    })
}

fn build_paths(
    raw: Vec<RawFilePath>,
    root: &Path,
    location: &str,
) -> Result<Vec<Arc<FilePathRef>>, ManifestError> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(raw.len());

    for (i, item) in raw.into_iter().enumerate() {
        let at = format!("{location}[{i}]");
        let (path, on_change, args) = item.into_parts();
        let resolved = resolve(root, &path);
        let pattern = PathPattern::new(resolved.to_string_lossy())
            .map_err(|reason| ManifestError::invalid(&at, reason))?;

        if !seen.insert(pattern.as_str().to_string()) {
            return Err(ManifestError::invalid(at, format!("duplicate path {path:?}")));
        }

        out.push(Arc::new(FilePathRef {
            path: pattern,
            on_change: build_hook(on_change, &format!("{at}.on_change"))?,
            args: build_args(args, &format!("{at}.args"))?,
        }));
    }

    Ok(out)
}

fn build_data_source(
    raw: RawDataSource,
    root: &Path,
    location: &str,
) -> Result<DataSourceRef, ManifestError> {
    let raw = raw.into_object();

    if let Some(alias) = &raw.alias {
        validate_alias(alias).map_err(|reason| ManifestError::invalid(location, reason))?;
    }

    let local = match SourceLocation::parse(&raw.url, root)
        .map_err(|reason| ManifestError::invalid(location, reason))?
    {
        SourceLocation::Local(path) => {
            let path = PathPattern::new(path.to_string_lossy())
                .map_err(|reason| ManifestError::invalid(location, reason))?;
            let alias = PathTemplate::compile(raw.alias.as_deref().unwrap_or(DEFAULT_ALIAS))
                .map_err(|reason| ManifestError::invalid(format!("{location}.alias"), reason))?;
            Some(LocalSource { path, alias })
        }
        SourceLocation::Remote(_) => None,
    };

    Ok(DataSourceRef {
        url: raw.url,
        alias: raw.alias,
        on_change: build_hook(raw.on_change, &format!("{location}.on_change"))?,
        args: build_args(raw.args, &format!("{location}.args"))?,
        local,
    })
}

fn build_file(raw: RawFile, root: &Path, location: &str) -> Result<FileSpec, ManifestError> {
    let input = PathPattern::new(resolve(root, &raw.input_path).to_string_lossy())
        .map_err(|reason| ManifestError::invalid(format!("{location}.input_path"), reason))?;

    let output = raw
        .output_path
        .map(|output| {
            let resolved = if output.starts_with('[') {
                output
            } else {
                resolve(root, &output).to_string_lossy().into_owned()
            };
            PathTemplate::compile(&resolved)
        })
        .transpose()
        .map_err(|reason| ManifestError::invalid(format!("{location}.output_path"), reason))?;

    for (name, delimiter) in [
        ("left_delimiter", &raw.left_delimiter),
        ("right_delimiter", &raw.right_delimiter),
    ] {
        if delimiter.as_deref().is_some_and(str::is_empty) {
            return Err(ManifestError::invalid(
                format!("{location}.{name}"),
                "must not be empty",
            ));
        }
    }

    Ok(FileSpec {
        input,
        output,
        left_delimiter: raw.left_delimiter,
        right_delimiter: raw.right_delimiter,
        on_change: build_hook(raw.on_change, &format!("{location}.on_change"))?,
        args: build_args(raw.args, &format!("{location}.args"))?,
        root: root.to_path_buf(),
    })
}

fn build_hook(raw: Option<RawHook>, location: &str) -> Result<Option<HookSpec>, ManifestError> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let raw = raw.into_object();

    if raw.command.is_empty() || raw.command[0].is_empty() {
        return Err(ManifestError::invalid(location, "command must not be empty"));
    }

    Ok(Some(HookSpec {
        command: raw.command,
        capture_stdout: raw.stdout,
        capture_stderr: raw.stderr,
    }))
}

fn build_args(raw: Option<Vec<String>>, location: &str) -> Result<Vec<String>, ManifestError> {
    match raw {
        Some(args) if args.is_empty() => Err(ManifestError::invalid(
            location,
            "must contain at least one argument",
        )),
        Some(args) => Ok(args),
        None => Ok(Vec::new()),
    }
}

fn validate_alias(alias: &str) -> Result<(), String> {
    let valid = !alias.is_empty()
        && alias
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-' | '[' | ']'));

    if valid {
        Ok(())
    } else {
        Err(format!("invalid alias {alias:?}"))
    }
}
