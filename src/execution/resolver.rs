//! Resolves a step's execution path to a callable operation

use crate::core::{context::RunContext, error::RegistryError};
use crate::registry::{CapabilityRegistry, Operation, OperationDescriptor, Params};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Split `"module:operation"` on the first `:`
pub fn split_execution_path(execution_path: &str) -> Option<(&str, &str)> {
    execution_path.split_once(':')
}

/// An operation ready to be invoked for one step
#[derive(Clone)]
pub struct ResolvedOperation {
    pub execution_path: String,
    pub descriptor: OperationDescriptor,
    pub handler: Arc<dyn Operation>,
}

impl ResolvedOperation {
    /// Whether the executor must inject the run identifier
    pub fn needs_run_id(&self) -> bool {
        self.descriptor.run_identifier().is_some()
    }

    /// Build the final parameter set for an invocation.
    ///
    /// Only declared caller parameters are kept. When the operation declares
    /// a run identifier, the run id is injected under that name and wins over
    /// anything the caller supplied for it.
    pub fn bind(&self, params: &Map<String, Value>, run: &RunContext) -> Params {
        let mut bound = Params::new();
        for (name, value) in params {
            if self.descriptor.caller_parameter(name).is_some() {
                bound.insert(name.clone(), value.clone());
            }
        }

        if let Some(spec) = self.descriptor.run_identifier() {
            bound.insert(spec.name.clone(), Value::String(run.run_id.clone()));
        }

        bound
    }
}

impl std::fmt::Debug for ResolvedOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedOperation")
            .field("execution_path", &self.execution_path)
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Look up the operation an execution path refers to.
///
/// Uses the same lookup as validation, so a path that validates always
/// resolves.
pub fn resolve(execution_path: &str, registry: &CapabilityRegistry) -> Result<ResolvedOperation, RegistryError> {
    let (module, operation) = split_execution_path(execution_path)
        .ok_or_else(|| RegistryError::MalformedPath(execution_path.to_string()))?;

    let registered = registry.lookup(module, operation)?;

    Ok(ResolvedOperation {
        execution_path: execution_path.to_string(),
        descriptor: registered.descriptor.clone(),
        handler: registered.handler.clone(),
    })
}
