//! Bound parameters handed to an operation invocation

use crate::core::error::OperationError;
use serde_json::{Map, Value};

/// Final parameter set for one invocation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params(Map<String, Value>);

impl Params {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.0.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }

    fn require(&self, name: &str) -> Result<&Value, OperationError> {
        self.0
            .get(name)
            .ok_or_else(|| OperationError::MissingParameter(name.to_string()))
    }

    fn invalid(name: &str, reason: &str) -> OperationError {
        OperationError::InvalidParameter {
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn require_str(&self, name: &str) -> Result<String, OperationError> {
        self.require(name)?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Self::invalid(name, "expected a string"))
    }

    pub fn require_i64(&self, name: &str) -> Result<i64, OperationError> {
        self.require(name)?
            .as_i64()
            .ok_or_else(|| Self::invalid(name, "expected an integer"))
    }

    pub fn require_f64(&self, name: &str) -> Result<f64, OperationError> {
        self.require(name)?
            .as_f64()
            .ok_or_else(|| Self::invalid(name, "expected a number"))
    }
}

impl From<Map<String, Value>> for Params {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}
