//! Pipeline execution engine

pub mod engine;
pub mod resolver;
pub mod validator;

pub use engine::{DiagnosticKind, ExecutionEvent, PipelineExecutor};
pub use resolver::{resolve, split_execution_path, ResolvedOperation};
pub use validator::{validate_pipeline, validate_step};
