//! Helper namespaces and filters available to every Jinja template.
//!
//! Each namespace is registered under a lower-case and a capitalized name
//! (`data`/`Data`, `fs`/`FS`/`io`/`IO`, ...). The data and merge helpers are
//! also exposed as filters:
//!
//! ```text
//! {{ data.toYAML(cfg) }}   {{ cfg | to_yaml }}
//! {{ utils.mergeWithArrays(base, extra) }}
//! {{ path.join(dir, "app.conf") }}
//! {% for p in fs.findPaths("conf.d/*.conf") %}...{% endfor %}
//! {{ template.inline("{{ a }}-{{ b }}", {"a": 1, "b": 2}) }}
//! ```

use std::path::{Component, MAIN_SEPARATOR_STR, Path, PathBuf};
use std::sync::Arc;

use minijinja::value::{Object, ObjectRepr, Rest, from_args};
use minijinja::{Environment, Error, ErrorKind, State, Value};
use serde_json::Value as JsonValue;
use serde_json::ser::PrettyFormatter;

/// Register all helper namespaces and filters on `env`.
///
/// Relative paths given to the `fs` helpers resolve against `root`.
pub fn register(env: &mut Environment<'_>, root: &Path) {
    let namespaces = [
        (&["data", "Data"][..], Namespace::Data),
        (&["utils", "Utils"][..], Namespace::Utils),
        (&["path", "Path"][..], Namespace::Path),
        (&["template", "Template"][..], Namespace::Template),
        (&["fs", "FS", "io", "IO"][..], Namespace::Fs(root.to_path_buf())),
    ];
    for (names, namespace) in namespaces {
        let value = Value::from_object(namespace);
        for name in names {
            env.add_global(*name, value.clone());
        }
    }

    env.add_filter("to_json", to_json);
    env.add_filter("from_json", from_json);
    env.add_filter("to_yaml", to_yaml);
    env.add_filter("from_yaml", from_yaml);
    env.add_filter("to_toml", to_toml);
    env.add_filter("from_toml", from_toml);
    env.add_filter("merge_with_arrays", |base: Value, rest: Rest<Value>| {
        merge_values(base, rest, false)
    });
    env.add_filter("merge_with_arrays_unique", |base: Value, rest: Rest<Value>| {
        merge_values(base, rest, true)
    });
}

#[derive(Debug)]
enum Namespace {
    Data,
    Utils,
    Path,
    Template,
    Fs(PathBuf),
}

impl Namespace {
    fn name(&self) -> &'static str {
        match self {
            Namespace::Data => "data",
            Namespace::Utils => "utils",
            Namespace::Path => "path",
            Namespace::Template => "template",
            Namespace::Fs(_) => "fs",
        }
    }
}

impl Object for Namespace {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Plain
    }

    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        match (self.as_ref(), key.as_str()?) {
            (Namespace::Path, "sep") => Some(Value::from(MAIN_SEPARATOR_STR)),
            (Namespace::Path, "delimiter") => Some(Value::from(if cfg!(windows) {
                ";"
            } else {
                ":"
            })),
            _ => None,
        }
    }

    fn call_method(
        self: &Arc<Self>,
        state: &State<'_, '_>,
        method: &str,
        args: &[Value],
    ) -> Result<Value, Error> {
        match (self.as_ref(), method) {
            (Namespace::Data, "toJSON") => {
                let (value, indent) = from_args(args)?;
                to_json(value, indent).map(Value::from)
            }
            (Namespace::Data, "fromJSON") => from_json(single(args)?),
            (Namespace::Data, "toYAML") => to_yaml(single(args)?).map(Value::from),
            (Namespace::Data, "fromYAML") => from_yaml(single(args)?),
            (Namespace::Data, "toTOML") => to_toml(single(args)?).map(Value::from),
            (Namespace::Data, "fromTOML") => from_toml(single(args)?),

            (Namespace::Utils, "mergeWithArrays") => {
                let (base, rest) = from_args(args)?;
                merge_values(base, rest, false)
            }
            (Namespace::Utils, "mergeWithArraysUnique") => {
                let (base, rest) = from_args(args)?;
                merge_values(base, rest, true)
            }

            (Namespace::Path, method) => path_method(method, args),

            (Namespace::Template, "inline") => {
                let (source, context): (&str, Option<Value>) = from_args(args)?;
                let context = context.unwrap_or_else(|| minijinja::context! {});
                state.env().render_str(source, context).map(Value::from)
            }

            (Namespace::Fs(root), "findPaths" | "findPathsSync") => {
                let (Rest(patterns),): (Rest<Value>,) = from_args(args)?;
                find_paths(root, &patterns)
            }
            (Namespace::Fs(root), "exists") => {
                let (path,): (&str,) = from_args(args)?;
                Ok(Value::from(root.join(path).exists()))
            }
            (Namespace::Fs(root), "readFile" | "readFileSync") => {
                let (path,): (&str,) = from_args(args)?;
                std::fs::read_to_string(root.join(path))
                    .map(Value::from)
                    .map_err(|e| {
                        Error::new(ErrorKind::InvalidOperation, format!("cannot read {path}"))
                            .with_source(e)
                    })
            }

            (namespace, method) => Err(Error::new(
                ErrorKind::UnknownMethod,
                format!("{}.{method} is not a helper", namespace.name()),
            )),
        }
    }
}

/// Unpack a single positional argument.
fn single<'a, T>(args: &'a [Value]) -> Result<T, Error>
where
    (T,): minijinja::value::FunctionArgs<'a, Output = (T,)>,
{
    let (value,) = from_args(args)?;
    Ok(value)
}

fn invalid(reason: impl std::fmt::Display) -> Error {
    Error::new(ErrorKind::InvalidOperation, reason.to_string())
}

fn to_serde(value: &Value) -> Result<JsonValue, Error> {
    serde_json::to_value(value).map_err(invalid)
}

fn to_json(value: Value, indent: Option<usize>) -> Result<String, Error> {
    let value = to_serde(&value)?;
    match indent {
        None | Some(0) => serde_json::to_string(&value).map_err(invalid),
        Some(width) => {
            let indent = " ".repeat(width);
            let mut out = Vec::new();
            let formatter = PrettyFormatter::with_indent(indent.as_bytes());
            let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
            serde::Serialize::serialize(&value, &mut serializer).map_err(invalid)?;
            String::from_utf8(out).map_err(invalid)
        }
    }
}

fn from_json(source: &str) -> Result<Value, Error> {
    let parsed: JsonValue = serde_json::from_str(source).map_err(invalid)?;
    Ok(Value::from_serialize(parsed))
}

fn to_yaml(value: Value) -> Result<String, Error> {
    serde_yaml::to_string(&to_serde(&value)?).map_err(invalid)
}

fn from_yaml(source: &str) -> Result<Value, Error> {
    let parsed: JsonValue = serde_yaml::from_str(source).map_err(invalid)?;
    Ok(Value::from_serialize(parsed))
}

fn to_toml(value: Value) -> Result<String, Error> {
    toml::to_string(&to_serde(&value)?).map_err(invalid)
}

fn from_toml(source: &str) -> Result<Value, Error> {
    let parsed: JsonValue = toml::from_str(source).map_err(invalid)?;
    Ok(Value::from_serialize(parsed))
}

/// Deep-merge `rest` into a copy of `base`, concatenating arrays.
fn merge_values(base: Value, rest: Rest<Value>, unique: bool) -> Result<Value, Error> {
    let mut merged = to_serde(&base)?;
    for value in rest.0 {
        merge_with_arrays(&mut merged, to_serde(&value)?, unique);
    }
    Ok(Value::from_serialize(merged))
}

fn merge_with_arrays(target: &mut JsonValue, source: JsonValue, unique: bool) {
    match (target, source) {
        (JsonValue::Object(target), JsonValue::Object(source)) => {
            for (key, value) in source {
                match target.get_mut(&key) {
                    Some(existing) => merge_with_arrays(existing, value, unique),
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (JsonValue::Array(target), source) => {
            match source {
                JsonValue::Array(items) => target.extend(items),
                other => target.push(other),
            }
            if unique {
                let mut seen = Vec::with_capacity(target.len());
                target.retain(|item| {
                    if seen.contains(item) {
                        false
                    } else {
                        seen.push(item.clone());
                        true
                    }
                });
            }
        }
        (target, source) => *target = source,
    }
}

fn path_method(method: &str, args: &[Value]) -> Result<Value, Error> {
    let text = |path: PathBuf| Value::from(path.to_string_lossy().into_owned());

    match method {
        "join" => {
            let (Rest(parts),): (Rest<String>,) = from_args(args)?;
            let joined: PathBuf = parts.iter().filter(|p| !p.is_empty()).collect();
            Ok(text(normalize(&joined)))
        }
        "resolve" => {
            let (Rest(parts),): (Rest<String>,) = from_args(args)?;
            let mut resolved = std::env::current_dir().map_err(invalid)?;
            for part in parts.iter().filter(|p| !p.is_empty()) {
                resolved.push(part);
            }
            Ok(text(normalize(&resolved)))
        }
        "normalize" => {
            let (path,): (&str,) = from_args(args)?;
            Ok(text(normalize(Path::new(path))))
        }
        "dirname" => {
            let (path,): (&str,) = from_args(args)?;
            let parent = match Path::new(path).parent() {
                Some(parent) if parent.as_os_str().is_empty() => PathBuf::from("."),
                Some(parent) => parent.to_path_buf(),
                None => PathBuf::from(path),
            };
            Ok(text(parent))
        }
        "basename" => {
            let (path, ext): (&str, Option<&str>) = from_args(args)?;
            let name = Path::new(path)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let name = match ext {
                Some(ext) if name != ext => name.strip_suffix(ext).unwrap_or(&name).to_string(),
                _ => name,
            };
            Ok(Value::from(name))
        }
        "extname" => {
            let (path,): (&str,) = from_args(args)?;
            let name = Path::new(path)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let ext = match name.rfind('.') {
                Some(0) | None => String::new(),
                Some(at) => name[at..].to_string(),
            };
            Ok(Value::from(ext))
        }
        "isAbsolute" => {
            let (path,): (&str,) = from_args(args)?;
            Ok(Value::from(Path::new(path).is_absolute()))
        }
        "relative" => {
            let (from, to): (&str, &str) = from_args(args)?;
            Ok(text(relative(&normalize(Path::new(from)), &normalize(Path::new(to)))))
        }
        other => Err(Error::new(
            ErrorKind::UnknownMethod,
            format!("path.{other} is not a helper"),
        )),
    }
}

/// Lexically collapse `.` and `..` components.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let can_pop = matches!(
                    out.components().next_back(),
                    Some(Component::Normal(_))
                );
                if can_pop {
                    out.pop();
                } else if !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

fn relative(from: &Path, to: &Path) -> PathBuf {
    let from: Vec<_> = from.components().collect();
    let to: Vec<_> = to.components().collect();
    let common = from.iter().zip(&to).take_while(|(a, b)| a == b).count();

    let mut out = PathBuf::new();
    for _ in common..from.len() {
        out.push("..");
    }
    for component in &to[common..] {
        out.push(component);
    }
    out
}

/// Expand glob patterns into a sorted, de-duplicated list of paths.
///
/// Relative patterns resolve against `root` and yield root-relative paths.
fn find_paths(root: &Path, patterns: &[Value]) -> Result<Value, Error> {
    let mut flat = Vec::new();
    for pattern in patterns {
        match pattern.as_str() {
            Some(pattern) => flat.push(pattern.to_string()),
            None => {
                for item in pattern.try_iter()? {
                    let item = item
                        .as_str()
                        .ok_or_else(|| invalid("findPaths patterns must be strings"))?;
                    flat.push(item.to_string());
                }
            }
        }
    }

    let mut found = Vec::new();
    for pattern in flat {
        let relative = !Path::new(&pattern).is_absolute();
        let full = if relative {
            root.join(&pattern)
        } else {
            PathBuf::from(&pattern)
        };
        let entries = glob::glob(&full.to_string_lossy())
            .map_err(|e| invalid(format!("bad pattern {pattern:?}: {e}")))?;
        for path in entries.flatten() {
            let path = match relative {
                true => path.strip_prefix(root).map(Path::to_path_buf).unwrap_or(path),
                false => path,
            };
            found.push(path.to_string_lossy().into_owned());
        }
    }
    found.sort();
    found.dedup();
    Ok(Value::from(found))
}
