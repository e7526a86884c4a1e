//! Test: Validation Gate - structural failures stop silently, parameter
//! errors are reported and the run goes ahead

use crate::helpers::*;
use sateval::execution::{validate_pipeline, validate_step, DiagnosticKind, PipelineExecutor};
use sateval::ParameterShapeError;
use serde_json::json;

/// A step without params stops the run before anything is emitted
#[tokio::test]
async fn test_missing_params_emits_nothing() {
    let (registry, fetch) = test_registry();
    let executor = PipelineExecutor::new(registry);

    let events = run_events(
        &executor,
        "run-1",
        json!([
            { "executionPath": "loader:fetch", "params": { "url": "http://a" } },
            { "executionPath": "loader:fetch" },
        ]),
    )
    .await;

    assert!(events.is_empty());
    assert!(fetch.calls().is_empty());
}

/// Unknown modules and operations fail validation without raising
#[tokio::test]
async fn test_unknown_operation_is_silent() {
    let (registry, _) = test_registry();

    for path in ["nowhere:fetch", "loader:teleport", "loader", ""] {
        let step = json!({ "executionPath": path, "params": {} });
        assert_eq!(validate_step(&step, &registry), Ok(false), "{}", path);
    }

    let executor = PipelineExecutor::new(registry);
    let events = run_events(
        &executor,
        "run-2",
        json!([{ "executionPath": "loader:teleport", "params": {} }]),
    )
    .await;
    assert!(events.is_empty());
}

/// Non-list documents and malformed steps never run
#[tokio::test]
async fn test_malformed_documents() {
    let (registry, _) = test_registry();

    assert_eq!(validate_pipeline(&json!({ "steps": [] }), &registry), Ok(false));
    assert_eq!(validate_step(&json!("loader:fetch"), &registry), Ok(false));
    assert_eq!(
        validate_step(&json!({ "executionPath": "loader:fetch", "params": [1] }), &registry),
        Ok(false)
    );
    assert_eq!(
        validate_step(&json!({ "executionPath": 3, "params": {} }), &registry),
        Ok(false)
    );

    let executor = PipelineExecutor::new(registry);
    assert!(run_events(&executor, "run-3", json!("not a pipeline")).await.is_empty());
}

/// An undeclared parameter is reported, then the step still runs with only
/// its declared parameters
#[tokio::test]
async fn test_undeclared_parameter_reports_then_runs() {
    let (registry, fetch) = test_registry();

    let step = json!({ "executionPath": "loader:fetch", "params": { "bogus": 1 } });
    assert!(matches!(
        validate_step(&step, &registry),
        Err(ParameterShapeError::UnknownParameter { parameter, .. }) if parameter == "bogus"
    ));

    let executor = PipelineExecutor::new(registry);
    let events = run_events(&executor, "run-4", json!([step])).await;

    assert!(events[0].is_diagnostic());
    assert_started_and_completed(&events, "run-4");

    let found = diagnostics(&events);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].0, Some(0));
    assert_eq!(found[0].1, DiagnosticKind::Validation);
    assert!(found[0].2.contains("bogus"));

    assert!(!progress_of(&events, 0).is_empty());
    let calls = fetch.calls();
    assert_eq!(calls.len(), 1);
    assert!(!calls[0].contains("bogus"));
    assert!(calls[0].contains("run_id"));
}

/// Mistyped parameters raise too, and every step is still validated
#[tokio::test]
async fn test_type_mismatch_is_reported_per_step() {
    let (registry, _) = test_registry();
    let executor = PipelineExecutor::new(registry.clone());

    let pipeline = json!([
        { "executionPath": "batch:items", "params": { "count": "three", "fail_every": 0 } },
        { "executionPath": "loader:fetch", "params": { "url": 42 } },
    ]);

    assert!(matches!(
        validate_pipeline(&pipeline, &registry),
        Err(ParameterShapeError::TypeMismatch { found: "string", .. })
    ));

    let events = run_events(&executor, "run-5", pipeline).await;
    let found = diagnostics(&events);
    let validation: Vec<_> = found
        .iter()
        .filter(|(_, kind, _)| *kind == DiagnosticKind::Validation)
        .map(|(step, _, _)| *step)
        .collect();
    assert_eq!(validation, vec![Some(0), Some(1)]);

    // The batch step then fails at runtime on its bad count
    assert!(found
        .iter()
        .any(|(step, kind, _)| *step == Some(0) && *kind == DiagnosticKind::Step));
    assert_started_and_completed(&events, "run-5");
}

/// A parameter error followed by a structural failure: the diagnostic is
/// emitted, then the run stops before starting
#[tokio::test]
async fn test_structural_failure_after_parameter_error() {
    let (registry, fetch) = test_registry();
    let executor = PipelineExecutor::new(registry);

    let events = run_events(
        &executor,
        "run-6",
        json!([
            { "executionPath": "loader:fetch", "params": { "bogus": 1 } },
            { "executionPath": "loader:missing", "params": {} },
        ]),
    )
    .await;

    assert_eq!(events.len(), 1);
    assert!(events[0].is_diagnostic());
    assert!(fetch.calls().is_empty());
}

/// Strict validation turns parameter errors into a rejection
#[tokio::test]
async fn test_strict_validation_rejects() {
    let (registry, fetch) = test_registry();
    let executor = PipelineExecutor::new(registry).with_strict_validation(true);

    let events = run_events(
        &executor,
        "run-7",
        json!([
            { "executionPath": "loader:fetch", "params": { "url": "http://a" } },
            { "executionPath": "loader:fetch", "params": { "bogus": 1 } },
        ]),
    )
    .await;

    assert_eq!(diagnostics(&events).len(), 1);
    assert_eq!(events.len(), 1);
    assert!(fetch.calls().is_empty());
}
