//! Config validation against the capability registry
//!
//! Structural problems and unresolved references return `Ok(false)`;
//! parameter problems on a resolved operation return `Err`. Callers rely on
//! that split to decide between a silent stop and a reported error.

use crate::core::error::ParameterShapeError;
use crate::execution::resolver::split_execution_path;
use crate::registry::{json_type_name, CapabilityRegistry};
use serde_json::{Map, Value};
use tracing::debug;

/// Read a step field under its camelCase or snake_case spelling
fn step_field<'a>(step: &'a Map<String, Value>, camel: &str, snake: &str) -> Option<&'a Value> {
    step.get(camel).or_else(|| step.get(snake))
}

/// Extract `(execution_path, params)` from a well-formed step
pub(crate) fn step_parts(step: &Value) -> Option<(&str, &Map<String, Value>)> {
    let step = step.as_object()?;
    let execution_path = step_field(step, "executionPath", "execution_path")?.as_str()?;
    let params = step.get("params")?.as_object()?;
    Some((execution_path, params))
}

/// Validate a single step
pub fn validate_step(step: &Value, registry: &CapabilityRegistry) -> Result<bool, ParameterShapeError> {
    let Some((execution_path, params)) = step_parts(step) else {
        debug!("Step is not an object with executionPath and params");
        return Ok(false);
    };

    let Some((module, operation)) = split_execution_path(execution_path) else {
        debug!("Execution path '{}' has no ':' separator", execution_path);
        return Ok(false);
    };

    let descriptor = match registry.describe(module, operation) {
        Ok(descriptor) => descriptor,
        Err(err) => {
            debug!("Execution path '{}' does not resolve: {}", execution_path, err);
            return Ok(false);
        }
    };

    for (name, value) in params {
        let Some(spec) = descriptor.caller_parameter(name) else {
            return Err(ParameterShapeError::UnknownParameter {
                execution_path: execution_path.to_string(),
                parameter: name.clone(),
                accepted: descriptor.caller_parameters().map(|p| p.name.clone()).collect(),
            });
        };

        if !spec.declared_type.accepts(value) {
            return Err(ParameterShapeError::TypeMismatch {
                execution_path: execution_path.to_string(),
                parameter: name.clone(),
                expected: spec.declared_type,
                found: json_type_name(value),
            });
        }
    }

    Ok(true)
}

/// Validate a whole pipeline.
///
/// Stops at the first step that is structurally invalid (`Ok(false)`) or that
/// raises a parameter error (`Err`).
pub fn validate_pipeline(steps: &Value, registry: &CapabilityRegistry) -> Result<bool, ParameterShapeError> {
    let Some(steps) = steps.as_array() else {
        return Ok(false);
    };

    for step in steps {
        if !validate_step(step, registry)? {
            return Ok(false);
        }
    }

    Ok(true)
}
