//! Test: Run Identifier - the executor's run id reaches operations that
//! declare one, and only those

use crate::helpers::*;
use sateval::core::event::{self, ProgressStream};
use sateval::execution::{resolve, PipelineExecutor};
use sateval::registry::{CapabilityRegistry, OperationDescriptor, ParamType, Params};
use sateval::{OperationError, RegistryError, RunContext};
use futures::StreamExt;
use serde_json::json;
use std::sync::{Arc, Mutex};

/// Caller-supplied run ids are reported and then overridden
#[tokio::test]
async fn test_caller_run_id_is_overridden() {
    let (registry, fetch) = test_registry();
    let executor = PipelineExecutor::new(registry);

    let events = run_events(
        &executor,
        "real-run",
        json!([{ "executionPath": "loader:fetch", "params": { "url": "http://a", "run_id": "spoofed" } }]),
    )
    .await;

    assert_eq!(diagnostics(&events).len(), 1);
    let calls = fetch.calls();
    assert_eq!(calls[0].get("run_id"), Some(&json!("real-run")));
    assert_started_and_completed(&events, "real-run");
}

/// Operations without a run identifier never see one
#[tokio::test]
async fn test_run_id_not_injected_when_undeclared() {
    let seen: Arc<Mutex<Vec<Params>>> = Arc::new(Mutex::new(Vec::new()));
    let recorder = {
        let seen = seen.clone();
        Arc::new(move |params: Params| -> Result<ProgressStream, OperationError> {
            seen.lock().unwrap().push(params);
            Ok(event::empty())
        })
    };

    let registry = CapabilityRegistry::builder()
        .register(
            "plain",
            OperationDescriptor::new("op").param("name", ParamType::String),
            recorder,
        )
        .unwrap()
        .build();
    let registry = Arc::new(registry);

    assert!(!resolve("plain:op", &registry).unwrap().needs_run_id());

    let executor = PipelineExecutor::new(registry);
    let events: Vec<_> = executor
        .run(
            RunContext::new("r"),
            json!([{ "executionPath": "plain:op", "params": { "name": "x" } }]),
        )
        .collect()
        .await;
    assert_eq!(events.len(), 2);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert!(!seen[0].contains("run_id"));
    assert_eq!(seen[0].get("name"), Some(&json!("x")));
}

/// Generated run ids are unique per run
#[test]
fn test_generated_run_ids_differ() {
    assert_ne!(RunContext::generate().run_id, RunContext::generate().run_id);
}

/// Parameters named after the run id are flagged automatically, and two of
/// them on one operation is a registration error
#[test]
fn test_run_identifier_detection() {
    let descriptor = OperationDescriptor::new("op")
        .param("source_run_id", ParamType::String)
        .param("url", ParamType::String);
    assert_eq!(
        descriptor.run_identifier().map(|p| p.name.as_str()),
        Some("source_run_id")
    );

    let result = CapabilityRegistry::builder().register(
        "m",
        descriptor.run_id("run_id"),
        Arc::new(|_p: Params| -> Result<ProgressStream, OperationError> { Ok(event::empty()) }),
    );
    assert!(matches!(result, Err(RegistryError::MultipleRunIdentifiers { .. })));
}
