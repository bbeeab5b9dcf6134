//! Template renderers.
//!
//! The engine hands a [`RenderRequest`] to a [`Renderer`] and writes any
//! text that comes back. Two renderers ship with the crate:
//!
//! - [`JinjaRenderer`]: in-process `minijinja` with configurable variable delimiters
//! - [`ProcessRenderer`]: an external gomplate-compatible program

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use minijinja::syntax::SyntaxConfig;
use minijinja::{AutoEscape, Environment, ErrorKind};
use serde_json::{Map, Value};
use tokio::process::Command;

use super::RenderError;
use super::environment::RenderEnvironment;
use crate::config::{EngineKind, RenderConfig};

const DEFAULT_LEFT_DELIMITER: &str = "{{";
const DEFAULT_RIGHT_DELIMITER: &str = "}}";

/// Everything a renderer needs for one file.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub input: PathBuf,
    pub output: Option<PathBuf>,
    pub left_delimiter: Option<String>,
    pub right_delimiter: Option<String>,
    /// Unit args followed by file args.
    pub args: Vec<String>,
    /// Data-source namespace, keyed by alias.
    pub data: Map<String, Value>,
    /// `(alias, path)` of every cached file data source.
    pub data_files: Vec<(String, PathBuf)>,
    /// `(alias, url)` of sources the renderer resolves itself.
    pub pass_through: Vec<(String, String)>,
    /// Cached template files; includes may name them by bare file name.
    pub templates: Vec<PathBuf>,
    pub environment: Arc<RenderEnvironment>,
    /// Workspace root for include lookup and the `fs` helpers.
    pub root: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutput {
    /// Rendered text for the engine to write.
    Text(String),
    /// The renderer wrote the output itself.
    Written,
}

#[async_trait]
pub trait Renderer: Send + Sync {
    fn name(&self) -> &str;

    async fn render(&self, request: RenderRequest) -> Result<RenderOutput, RenderError>;
}

/// Build the renderer selected by the settings.
pub fn from_config(config: &RenderConfig) -> Arc<dyn Renderer> {
    match config.engine {
        EngineKind::Jinja => Arc::new(JinjaRenderer::new()),
        EngineKind::Process => Arc::new(ProcessRenderer::new(
            config.process.program.clone(),
            config.process.args.clone(),
        )),
    }
}

/// In-process renderer backed by `minijinja`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JinjaRenderer;

impl JinjaRenderer {
    pub fn new() -> Self {
        Self
    }

    fn context(request: &RenderRequest) -> Value {
        let mut context = request.environment.globals.clone();

        let env: Map<String, Value> = std::env::vars()
            .map(|(k, v)| (k, Value::String(v)))
            .collect();
        context.insert("env".to_string(), Value::Object(env.clone()));
        context.insert("Env".to_string(), Value::Object(env));
        context.insert(
            "args".to_string(),
            Value::Array(request.args.iter().cloned().map(Value::String).collect()),
        );
        context.insert(
            "sources".to_string(),
            Value::Object(
                request
                    .pass_through
                    .iter()
                    .map(|(alias, url)| (alias.clone(), Value::String(url.clone())))
                    .collect(),
            ),
        );

        let mut context = Value::Object(context);
        super::context::deep_merge(&mut context, Value::Object(request.data.clone()));
        context
    }

    fn environment(request: &RenderRequest) -> Result<Environment<'static>, RenderError> {
        let left = request
            .left_delimiter
            .clone()
            .unwrap_or_else(|| DEFAULT_LEFT_DELIMITER.to_string());
        let right = request
            .right_delimiter
            .clone()
            .unwrap_or_else(|| DEFAULT_RIGHT_DELIMITER.to_string());
        let syntax = SyntaxConfig::builder()
            .variable_delimiters(left, right)
            .build()
            .map_err(|e| template_error(&request.input, e))?;

        let mut env = Environment::new();
        env.set_syntax(syntax);
        env.set_auto_escape_callback(|_| AutoEscape::None);
        env.set_keep_trailing_newline(true);

        let includes = IncludeResolver::new(request);
        env.set_loader(move |name: &str| includes.load(name));
        super::helpers::register(&mut env, &request.root);

        Ok(env)
    }

    fn render_blocking(request: &RenderRequest, source: &str) -> Result<String, RenderError> {
        let env = Self::environment(request)?;
        let name = request.input.to_string_lossy();
        env.render_named_str(&name, source, Self::context(request))
            .map_err(|e| template_error(&request.input, e))
    }
}

/// Maps `{% include %}` / `{% import %}` names to template files.
///
/// A name is tried as an absolute path, then relative to the including
/// file's directory, then relative to the workspace root. A bare file name
/// that matches none of those may still name one cached template, as long
/// as no other cached template shares it.
#[derive(Debug, Clone)]
struct IncludeResolver {
    base: PathBuf,
    root: PathBuf,
    cached: Vec<PathBuf>,
}

impl IncludeResolver {
    fn new(request: &RenderRequest) -> Self {
        Self {
            base: request
                .input
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default(),
            root: request.root.clone(),
            cached: request.templates.clone(),
        }
    }

    fn resolve(&self, name: &str) -> Result<Option<PathBuf>, minijinja::Error> {
        let path = Path::new(name);
        if path.is_absolute() {
            return Ok(path.is_file().then(|| path.to_path_buf()));
        }

        for base in [&self.base, &self.root] {
            let candidate = base.join(path);
            if candidate.is_file() {
                return Ok(Some(candidate));
            }
        }

        if path.components().count() != 1 {
            return Ok(None);
        }
        let matches: Vec<&PathBuf> = self
            .cached
            .iter()
            .filter(|cached| cached.file_name() == Some(path.as_os_str()))
            .collect();
        match matches.as_slice() {
            [] => Ok(None),
            [only] => Ok(Some((*only).clone())),
            many => Err(minijinja::Error::new(
                ErrorKind::InvalidOperation,
                format!(
                    "include {name:?} is ambiguous, it matches {}",
                    many.iter()
                        .map(|p| p.display().to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            )),
        }
    }

    fn load(&self, name: &str) -> Result<Option<String>, minijinja::Error> {
        let Some(path) = self.resolve(name)? else {
            return Ok(None);
        };
        match std::fs::read_to_string(&path) {
            Ok(source) => Ok(Some(source)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(minijinja::Error::new(
                ErrorKind::InvalidOperation,
                format!("failed to read {}", path.display()),
            )
            .with_source(e)),
        }
    }
}

fn template_error(path: &Path, e: minijinja::Error) -> RenderError {
    RenderError::Template {
        path: path.to_path_buf(),
        reason: format!("{e:#}"),
    }
}

async fn read_template(path: &Path) -> Result<String, RenderError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| RenderError::TemplateRead {
            path: path.to_path_buf(),
            source,
        })
}

#[async_trait]
impl Renderer for JinjaRenderer {
    fn name(&self) -> &str {
        "jinja"
    }

    async fn render(&self, request: RenderRequest) -> Result<RenderOutput, RenderError> {
        let source = read_template(&request.input).await?;

        // Includes are read synchronously by the loader
        let input = request.input.clone();
        let rendering =
            tokio::task::spawn_blocking(move || JinjaRenderer::render_blocking(&request, &source));
        let text = rendering.await.map_err(|e| RenderError::Renderer {
            path: input,
            reason: format!("render task failed: {e}"),
        })??;

        Ok(RenderOutput::Text(text))
    }
}

/// Renders by running an external gomplate-compatible program.
#[derive(Debug, Clone)]
pub struct ProcessRenderer {
    program: String,
    args: Vec<String>,
}

impl ProcessRenderer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Command-line arguments for one request, after the configured base args.
    pub fn arguments(&self, request: &RenderRequest) -> Vec<String> {
        let mut args = self.args.clone();

        for (alias, path) in &request.data_files {
            args.push("-d".to_string());
            args.push(format!("{alias}={}", path.display()));
        }
        for (alias, url) in &request.pass_through {
            args.push("-d".to_string());
            args.push(format!("{alias}={url}"));
        }
        for path in &request.templates {
            args.push("-t".to_string());
            args.push(path.display().to_string());
        }

        args.push("-f".to_string());
        args.push(request.input.display().to_string());

        if let Some(output) = &request.output {
            args.push("-o".to_string());
            args.push(output.display().to_string());
        }
        if let Some(left) = &request.left_delimiter {
            args.push("--left-delim".to_string());
            args.push(left.clone());
        }
        if let Some(right) = &request.right_delimiter {
            args.push("--right-delim".to_string());
            args.push(right.clone());
        }

        args.extend(request.args.iter().cloned());
        args
    }
}

#[async_trait]
impl Renderer for ProcessRenderer {
    fn name(&self) -> &str {
        &self.program
    }

    async fn render(&self, request: RenderRequest) -> Result<RenderOutput, RenderError> {
        if let Some(dir) = request.output.as_deref().and_then(Path::parent) {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|source| RenderError::Write {
                    path: dir.to_path_buf(),
                    source,
                })?;
        }

        let output = Command::new(&self.program)
            .args(self.arguments(&request))
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| RenderError::Renderer {
                path: request.input.clone(),
                reason: format!("failed to run {}: {e}", self.program),
            })?;

        if !output.status.success() {
            return Err(RenderError::Renderer {
                path: request.input.clone(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        match request.output {
            Some(_) => Ok(RenderOutput::Written),
            None => Ok(RenderOutput::Text(
                String::from_utf8_lossy(&output.stdout).into_owned(),
            )),
        }
    }
}
