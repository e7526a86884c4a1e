//! Core domain models
//!
//! This module defines the data structures shared by the registry, the
//! executor and the operation providers: step and pipeline configuration,
//! the run context, progress events and the error taxonomy.

pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod state;

pub use config::{EngineSettings, PipelineConfig, StepConfig};
pub use context::RunContext;
pub use error::{OperationError, ParameterShapeError, RegistryError};
pub use event::{Counters, ProgressEvent, ProgressStream};
pub use state::{ExecutionStatus, RunSummary};
