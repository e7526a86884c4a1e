//! Declared shape of registered operations

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Declared type of an operation parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Float,
    Boolean,
    Object,
    Array,
    Any,
}

impl ParamType {
    /// Whether a runtime JSON value is acceptable for this declared type
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Float => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Object => value.is_object(),
            ParamType::Array => value.is_array(),
            ParamType::Any => true,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Float => "float",
            ParamType::Boolean => "boolean",
            ParamType::Object => "object",
            ParamType::Array => "array",
            ParamType::Any => "any",
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Name of the JSON type of a runtime value, for error messages
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// One declared parameter of an operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    pub declared_type: ParamType,
    /// Supplied by the executor from the run context, never by the caller
    pub is_run_identifier: bool,
}

impl ParameterSpec {
    /// Declare a parameter; names containing `run_id` are the run identifier
    pub fn new(name: impl Into<String>, declared_type: ParamType) -> Self {
        let name = name.into();
        let is_run_identifier = name.contains("run_id");
        Self {
            name,
            declared_type,
            is_run_identifier,
        }
    }

    /// Declare the run identifier parameter explicitly
    pub fn run_identifier(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            declared_type: ParamType::String,
            is_run_identifier: true,
        }
    }
}

/// Name and declared parameters of an operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationDescriptor {
    pub name: String,
    pub parameters: Vec<ParameterSpec>,
}

impl OperationDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: Vec::new(),
        }
    }

    /// Builder-style parameter declaration
    pub fn param(mut self, name: impl Into<String>, declared_type: ParamType) -> Self {
        self.parameters.push(ParameterSpec::new(name, declared_type));
        self
    }

    /// Builder-style run identifier declaration
    pub fn run_id(mut self, name: impl Into<String>) -> Self {
        self.parameters.push(ParameterSpec::run_identifier(name));
        self
    }

    /// The reserved run identifier parameter, if declared
    pub fn run_identifier(&self) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.is_run_identifier)
    }

    /// Parameters a caller may supply
    pub fn caller_parameters(&self) -> impl Iterator<Item = &ParameterSpec> {
        self.parameters.iter().filter(|p| !p.is_run_identifier)
    }

    /// Look up a caller-settable parameter by name
    pub fn caller_parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.caller_parameters().find(|p| p.name == name)
    }
}
