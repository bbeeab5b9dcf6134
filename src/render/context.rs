//! Render context assembly from data-source files.
//!
//! Data-source files are read fresh on every render; nothing is cached
//! between renders. Each file's value lands at its dotted alias path and
//! objects are deep-merged, so `app.db` and `app.cache` share one `app`.

use std::path::Path;
use std::sync::Arc;

use serde_json::{Map, Value};

use super::RenderError;
use crate::cache::DataSourceEntry;

/// Parse data-source text by file extension.
///
/// `.json` and `.toml` use their own parsers; everything else is YAML.
/// An empty document is `null`.
pub fn parse_data(path: &Path, text: &str) -> Result<Value, RenderError> {
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }

    let parse_error = |reason: String| RenderError::DataSourceParse {
        path: path.to_path_buf(),
        reason,
    };

    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(text).map_err(|e| parse_error(e.to_string())),
        Some("toml") => toml::from_str(text).map_err(|e| parse_error(e.to_string())),
        _ => serde_yaml::from_str(text).map_err(|e| parse_error(e.to_string())),
    }
}

/// Read and parse one data-source file.
pub async fn load_data(path: &Path) -> Result<Value, RenderError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| RenderError::DataSourceRead {
            path: path.to_path_buf(),
            source,
        })?;
    parse_data(path, &text)
}

/// Merge `source` into `target`: objects merge key by key, anything else replaces.
pub fn deep_merge(target: &mut Value, source: Value) {
    match (target, source) {
        (Value::Object(target), Value::Object(source)) => {
            for (key, value) in source {
                match target.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (target, source) => *target = source,
    }
}

/// Place `value` at a dotted alias path inside `root`.
pub fn insert_at_alias(root: &mut Map<String, Value>, alias: &str, value: Value) {
    let mut nested = value;
    let mut segments: Vec<&str> = alias.split('.').filter(|s| !s.is_empty()).collect();
    let Some(head) = segments.first().copied() else {
        return;
    };

    while segments.len() > 1 {
        let Some(last) = segments.pop() else { break };
        let mut wrapper = Map::new();
        wrapper.insert(last.to_string(), nested);
        nested = Value::Object(wrapper);
    }

    match root.get_mut(head) {
        Some(existing) => deep_merge(existing, nested),
        None => {
            root.insert(head.to_string(), nested);
        }
    }
}

/// Build the data-source namespace for one render.
pub async fn build_context(
    entries: &[Arc<DataSourceEntry>],
) -> Result<Map<String, Value>, RenderError> {
    let mut context = Map::new();
    for entry in entries {
        let value = load_data(&entry.filepath).await?;
        insert_at_alias(&mut context, &entry.output_alias, value);
    }
    Ok(context)
}
