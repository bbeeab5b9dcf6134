//! Render environment and custom environment loaders.
//!
//! The environment holds globals visible to every render of a unit. Files
//! listed under `custom` are handed to an [`EnvironmentLoader`], which
//! produces the replacement environment.

use std::path::Path;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::RenderError;
use super::context::load_data;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderEnvironment {
    pub globals: Map<String, Value>,
}

/// Turns a custom file into a new render environment.
#[async_trait]
pub trait EnvironmentLoader: Send + Sync {
    /// Load `path` on top of `current`. `None` keeps the current environment.
    async fn load(
        &self,
        path: &Path,
        current: &RenderEnvironment,
    ) -> Result<Option<RenderEnvironment>, RenderError>;
}

/// Loads a data file and shallow-merges its top-level keys into the globals.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValuesLoader;

#[async_trait]
impl EnvironmentLoader for ValuesLoader {
    async fn load(
        &self,
        path: &Path,
        current: &RenderEnvironment,
    ) -> Result<Option<RenderEnvironment>, RenderError> {
        match load_data(path).await? {
            Value::Null => Ok(None),
            Value::Object(values) => {
                let mut next = current.clone();
                next.globals.extend(values);
                Ok(Some(next))
            }
            _ => Err(RenderError::DataSourceParse {
                path: path.to_path_buf(),
                reason: "custom environment must be a mapping".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_values_loader_merges_globals() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("env.yaml");
        std::fs::write(&path, "region: eu\nreplicas: 3\n").unwrap();

        let mut current = RenderEnvironment::default();
        current.globals.insert("region".to_string(), json!("us"));
        current.globals.insert("tier".to_string(), json!("gold"));

        let next = ValuesLoader.load(&path, &current).await.unwrap().unwrap();
        assert_eq!(next.globals["region"], json!("eu"));
        assert_eq!(next.globals["replicas"], json!(3));
        assert_eq!(next.globals["tier"], json!("gold"));
    }

    #[tokio::test]
    async fn test_values_loader_rejects_scalars() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("env.yaml");
        std::fs::write(&path, "just a string").unwrap();

        let result = ValuesLoader.load(&path, &RenderEnvironment::default()).await;
        assert!(matches!(result, Err(RenderError::DataSourceParse { .. })));
    }
}
