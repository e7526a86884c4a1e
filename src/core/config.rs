//! Pipeline configuration from JSON or YAML, plus engine settings

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};

/// One declarative step: which operation to run and with what parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepConfig {
    /// `"module:operation"` reference into the capability registry
    #[serde(rename = "executionPath", alias = "execution_path")]
    pub execution_path: String,

    /// Caller-supplied parameters
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl StepConfig {
    pub fn new(execution_path: impl Into<String>, params: Value) -> Self {
        let params = match params {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            execution_path: execution_path.into(),
            params,
        }
    }

    /// Example of the single-step format for caller tooling
    pub fn template() -> Self {
        Self::new("dataset_loader:load_by_url", json!({ "key": "value" }))
    }
}

/// Ordered sequence of steps; order defines execution order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineConfig {
    pub steps: Vec<StepConfig>,
}

impl PipelineConfig {
    pub fn new(steps: Vec<StepConfig>) -> Self {
        Self { steps }
    }

    /// Example of the pipeline format for caller tooling
    pub fn template() -> Self {
        Self::new(vec![StepConfig::template()])
    }

    /// Load pipeline configuration from a JSON or YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let value = load_document(path)?;
        serde_json::from_value(value).context("Pipeline is not a list of steps")
    }

    /// Parse pipeline configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Parse pipeline configuration from JSON string
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Raw JSON form, as a transport would submit it
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Load a JSON or YAML document without imposing the step shape on it.
///
/// Validation needs to see malformed documents as they are, so callers that
/// hand a pipeline to the executor should use this rather than
/// [`PipelineConfig::from_file`].
pub fn load_document<P: AsRef<Path>>(path: P) -> Result<Value> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );

    if is_yaml {
        serde_yaml::from_str(&content).context("Invalid YAML document")
    } else {
        serde_json::from_str(&content).context("Invalid JSON document")
    }
}

/// Engine-wide settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Where datasets are downloaded to
    pub data_dir: PathBuf,

    /// SQLite database holding result rows
    pub database_path: PathBuf,

    /// Abort before running when any step has a parameter error
    pub strict_validation: bool,
}

impl EngineSettings {
    /// Settings rooted at a specific directory
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            data_dir: root.join("data").join("dataset"),
            database_path: root.join("sateval.db"),
            strict_validation: false,
        }
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict_validation = strict;
        self
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        let root = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sateval");
        Self::with_root(root)
    }
}
