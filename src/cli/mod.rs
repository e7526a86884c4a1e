//! Command-line interface

pub mod commands;
pub mod output;

use crate::core::config::EngineSettings;
use clap::{Parser, Subcommand};
use commands::{
    EvaluationsCommand, MethodsCommand, ResultsCommand, RunCommand, TemplateCommand,
    ValidateCommand, ValidateStepCommand,
};
use std::ffi::OsString;
use std::path::PathBuf;

/// Configuration-driven pipelines for image evaluation jobs
#[derive(Debug, Parser, Clone)]
#[command(name = "sateval")]
#[command(version = "0.1.0")]
#[command(about = "Run, validate and inspect image evaluation pipelines", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Directory datasets are downloaded to
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// SQLite database holding result rows
    #[arg(long, global = true)]
    pub database: Option<PathBuf>,

    /// Refuse to run a pipeline when any step has parameter errors
    #[arg(long, global = true)]
    pub strict: bool,

    /// Print machine-readable JSON instead of styled text
    #[arg(long, global = true)]
    pub json: bool,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run a pipeline, streaming its progress
    Run(RunCommand),

    /// Validate a pipeline document
    Validate(ValidateCommand),

    /// Validate a single step
    ValidateStep(ValidateStepCommand),

    /// Print a pipeline or step template
    Template(TemplateCommand),

    /// List registered modules
    Modules,

    /// Describe the operations of a module
    Methods(MethodsCommand),

    /// List downloaded dataset directories
    Datasets,

    /// List run ids with recorded images
    Runs,

    /// List evaluation ids recorded for a run
    Evaluations(EvaluationsCommand),

    /// Show the recorded images and results of a run
    Results(ResultsCommand),

    /// List the row fields accepted as evaluator input and output types
    Fields,
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }

    /// Engine settings with the global flags applied
    pub fn settings(&self) -> EngineSettings {
        let mut settings = EngineSettings::default().strict(self.strict);
        if let Some(dir) = &self.data_dir {
            settings.data_dir = dir.clone();
        }
        if let Some(db) = &self.database {
            settings.database_path = db.clone();
        }
        settings
    }
}
