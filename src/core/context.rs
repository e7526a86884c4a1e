//! Run context threaded through every step of one pipeline invocation

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifies one pipeline invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunContext {
    pub run_id: String,
}

impl RunContext {
    /// Use a caller-assigned run identifier
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
        }
    }

    /// Generate a fresh run identifier
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.run_id)
    }
}
