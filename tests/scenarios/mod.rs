//! Scenario-based tests for sateval

mod error_isolation;
mod registry_introspection;
mod run_identifier;
mod success_chain;
mod validation_gate;
