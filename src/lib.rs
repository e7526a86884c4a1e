//! sateval - configuration-driven pipelines for image evaluation jobs

pub mod cli;
pub mod core;
pub mod execution;
pub mod persistence;
pub mod providers;
pub mod registry;

// Re-export commonly used types
pub use crate::core::{Counters, EngineSettings, ExecutionStatus, PipelineConfig, ProgressEvent, ProgressStream, RunContext, RunSummary, StepConfig};
pub use crate::core::{OperationError, ParameterShapeError, RegistryError};
pub use execution::{validate_pipeline, validate_step, DiagnosticKind, ExecutionEvent, PipelineExecutor};
pub use persistence::{InMemoryResultStore, ResultStore};
pub use providers::default_registry;
pub use registry::{CapabilityRegistry, Operation, OperationDescriptor, OperationProvider, ParamType, Params};
