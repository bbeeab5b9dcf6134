//! Raw manifest shapes as they appear in YAML.
//!
//! Shorthand forms (a bare string for a path or data source, a bare array
//! for a hook) are accepted through untagged enums and normalised later.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawUnit {
    #[serde(default)]
    pub watch: bool,
    #[serde(default)]
    pub dependencies: Vec<RawFilePath>,
    #[serde(default)]
    pub templates: Vec<RawFilePath>,
    #[serde(default)]
    pub custom: Vec<RawFilePath>,
    #[serde(default)]
    pub datasources: Vec<RawDataSource>,
    #[serde(default)]
    pub files: Vec<RawFile>,
    pub on_change: Option<RawHook>,
    pub args: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RawFilePath {
    Path(String),
    Full(RawFilePathObject),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawFilePathObject {
    pub path: String,
    pub on_change: Option<RawHook>,
    pub args: Option<Vec<String>>,
}

impl RawFilePath {
    pub fn into_parts(self) -> (String, Option<RawHook>, Option<Vec<String>>) {
        match self {
            RawFilePath::Path(path) => (path, None, None),
            RawFilePath::Full(obj) => (obj.path, obj.on_change, obj.args),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RawDataSource {
    Url(String),
    Full(RawDataSourceObject),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawDataSourceObject {
    pub url: String,
    pub alias: Option<String>,
    pub on_change: Option<RawHook>,
    pub args: Option<Vec<String>>,
}

impl RawDataSource {
    pub fn into_object(self) -> RawDataSourceObject {
        match self {
            RawDataSource::Url(url) => RawDataSourceObject {
                url,
                alias: None,
                on_change: None,
                args: None,
            },
            RawDataSource::Full(obj) => obj,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawFile {
    pub input_path: String,
    pub output_path: Option<String>,
    pub left_delimiter: Option<String>,
    pub right_delimiter: Option<String>,
    pub on_change: Option<RawHook>,
    pub args: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RawHook {
    Command(Vec<String>),
    Full(RawHookObject),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawHookObject {
    pub command: Vec<String>,
    #[serde(default)]
    pub stdout: bool,
    #[serde(default = "default_capture_stderr")]
    pub stderr: bool,
}

fn default_capture_stderr() -> bool {
    true
}

impl RawHook {
    pub fn into_object(self) -> RawHookObject {
        match self {
            RawHook::Command(command) => RawHookObject {
                command,
                stdout: false,
                stderr: true,
            },
            RawHook::Full(obj) => obj,
        }
    }
}
