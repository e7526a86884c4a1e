//! CLI command definitions

use clap::Args;
use serde_json::Value;
use std::path::PathBuf;

/// Run a pipeline
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to a pipeline document (JSON, or YAML by extension)
    pub file: PathBuf,

    /// Run id to use instead of a generated one
    #[arg(long)]
    pub run_id: Option<String>,
}

/// Validate a pipeline document
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to a pipeline document
    pub file: PathBuf,
}

/// Validate a single step, given inline or from a file
#[derive(Debug, Args, Clone)]
pub struct ValidateStepCommand {
    /// Step as inline JSON
    #[arg(long, value_parser = parse_json, conflicts_with = "file", required_unless_present = "file")]
    pub step: Option<Value>,

    /// Path to a document holding one step
    #[arg(short, long)]
    pub file: Option<PathBuf>,
}

/// Print a template
#[derive(Debug, Args, Clone)]
pub struct TemplateCommand {
    /// Print a single step instead of a whole pipeline
    #[arg(long)]
    pub step: bool,

    /// Print YAML instead of JSON
    #[arg(long)]
    pub yaml: bool,
}

/// Describe a module
#[derive(Debug, Args, Clone)]
pub struct MethodsCommand {
    /// Module name
    pub module: String,
}

/// List evaluations of a run
#[derive(Debug, Args, Clone)]
pub struct EvaluationsCommand {
    pub run_id: String,
}

/// Show results of a run
#[derive(Debug, Args, Clone)]
pub struct ResultsCommand {
    pub run_id: String,

    /// Only show results of this evaluation
    #[arg(long)]
    pub evaluation_id: Option<String>,
}

/// Parse an inline JSON argument
pub fn parse_json(s: &str) -> Result<Value, String> {
    serde_json::from_str(s).map_err(|e| format!("Invalid JSON: {}", e))
}
