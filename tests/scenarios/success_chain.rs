//! Test: Success Chain - well-formed pipelines stream every step in order

use crate::helpers::*;
use sateval::core::config::PipelineConfig;
use sateval::core::event::{Counters, ProgressEvent};
use sateval::execution::{ExecutionEvent, PipelineExecutor};
use sateval::{ExecutionStatus, RunContext};
use serde_json::json;

/// Single fetch step: started, the operation's own stream, completed
#[tokio::test]
async fn test_single_step_pipeline() {
    let (registry, _fetch) = test_registry();
    let executor = PipelineExecutor::new(registry);

    let events = run_events(
        &executor,
        "run-1",
        json!([{ "executionPath": "loader:fetch", "params": { "url": "http://x/y.zip" } }]),
    )
    .await;

    assert_eq!(
        events,
        vec![
            ExecutionEvent::PipelineStarted { run_id: "run-1".into() },
            progress(0, "loader:fetch", ProgressEvent::message("run run-1")),
            progress(0, "loader:fetch", Counters::new(2).into()),
            progress(0, "loader:fetch", Counters { succeeded: 2, failed: 0, total: 2 }.into()),
            progress(0, "loader:fetch", ProgressEvent::message("fetched")),
            ExecutionEvent::PipelineCompleted { run_id: "run-1".into() },
        ]
    );
}

fn progress(step: usize, path: &str, progress: ProgressEvent) -> ExecutionEvent {
    ExecutionEvent::Progress {
        step,
        execution_path: path.to_string(),
        progress,
    }
}

/// Steps run strictly in declaration order, each to completion
#[tokio::test]
async fn test_multi_step_order_is_preserved() {
    let (registry, fetch) = test_registry();
    let executor = PipelineExecutor::new(registry);

    let events = run_events(
        &executor,
        "run-2",
        json!([
            { "executionPath": "batch:items", "params": { "count": 3, "fail_every": 0 } },
            { "executionPath": "loader:fetch", "params": { "url": "http://a" } },
            { "execution_path": "batch:items", "params": { "count": 1, "fail_every": 0 } },
        ]),
    )
    .await;

    assert_started_and_completed(&events, "run-2");
    assert!(diagnostics(&events).is_empty());
    assert_eq!(step_order(&events), vec![0, 1, 2]);
    assert_eq!(progress_of(&events, 0).len(), 4);
    assert_eq!(progress_of(&events, 2).len(), 2);
    assert_eq!(fetch.calls().len(), 1);
}

/// An empty pipeline still brackets the run
#[tokio::test]
async fn test_empty_pipeline() {
    let (registry, _) = test_registry();
    let executor = PipelineExecutor::new(registry);

    let events = run_events(&executor, "run-3", json!([])).await;
    assert_eq!(
        events,
        vec![
            ExecutionEvent::PipelineStarted { run_id: "run-3".into() },
            ExecutionEvent::PipelineCompleted { run_id: "run-3".into() },
        ]
    );
}

/// Typed YAML configs run the same way as raw documents
#[tokio::test]
async fn test_yaml_pipeline_and_summary() {
    let yaml = r#"
- executionPath: "batch:items"
  params:
    count: 4
    fail_every: 2
- executionPath: "loader:fetch"
  params:
    url: "http://x/y.zip"
"#;

    let config = PipelineConfig::from_yaml(yaml).unwrap();
    let (registry, _) = test_registry();
    let executor = PipelineExecutor::new(registry);

    let mut seen = 0;
    let summary = executor
        .execute(RunContext::new("run-4"), config.to_value(), |_| seen += 1)
        .await;

    assert_eq!(summary.status, ExecutionStatus::Completed);
    assert_eq!(summary.steps_reporting, 2);
    assert_eq!(
        summary.final_counters,
        vec![
            (0, Counters { succeeded: 2, failed: 2, total: 4 }),
            (1, Counters { succeeded: 2, failed: 0, total: 2 }),
        ]
    );
    assert_eq!(summary.diagnostics.len(), 0);
    assert_eq!(seen, summary.progress_events + 2);
}
