//! Test: Error Isolation - failures stay inside the item or step they hit

use crate::helpers::*;
use sateval::core::event::{Counters, ProgressEvent};
use sateval::execution::{DiagnosticKind, PipelineExecutor};
use serde_json::json;

/// N items with K failures: counters never go backwards and end at N
#[tokio::test]
async fn test_item_failures_are_counted() {
    let (registry, _) = test_registry();
    let executor = PipelineExecutor::new(registry);

    for (count, fail_every, failures) in [(10, 3, 3), (5, 1, 5), (6, 0, 0), (0, 1, 0)] {
        let events = run_events(
            &executor,
            "run-items",
            json!([{ "executionPath": "batch:items", "params": { "count": count, "fail_every": fail_every } }]),
        )
        .await;

        let progress = progress_of(&events, 0);
        let snapshots: Vec<Counters> = progress.iter().filter_map(|p| p.counters().copied()).collect();
        for pair in snapshots.windows(2) {
            assert!(pair[0].processed() <= pair[1].processed());
        }

        let last = snapshots.last().unwrap();
        assert_eq!(last.total, count);
        assert_eq!(last.processed(), count);
        assert_eq!(last.failed, failures);

        let messages = progress
            .iter()
            .filter(|p| matches!(p, ProgressEvent::Message(_)))
            .count() as u64;
        assert_eq!(messages, failures);
        assert!(diagnostics(&events).is_empty());
        assert_started_and_completed(&events, "run-items");
    }
}

/// A step that raises at invocation is reported and the next step runs
#[tokio::test]
async fn test_invoke_error_moves_to_next_step() {
    let (registry, fetch) = test_registry();
    let executor = PipelineExecutor::new(registry);

    let events = run_events(
        &executor,
        "run-raise",
        json!([
            { "executionPath": "faulty:raise", "params": {} },
            { "executionPath": "loader:fetch", "params": { "url": "http://a" } },
        ]),
    )
    .await;

    let found = diagnostics(&events);
    assert_eq!(found.len(), 1);
    assert_eq!((found[0].0, found[0].1), (Some(0), DiagnosticKind::Step));
    assert!(found[0].2.contains("refused to start"));

    assert!(progress_of(&events, 0).is_empty());
    assert!(!progress_of(&events, 1).is_empty());
    assert_eq!(fetch.calls().len(), 1);
    assert_started_and_completed(&events, "run-raise");
}

/// A stream that raises midway keeps what it emitted, then the next step runs
#[tokio::test]
async fn test_stream_error_moves_to_next_step() {
    let (registry, _) = test_registry();
    let executor = PipelineExecutor::new(registry);

    let events = run_events(
        &executor,
        "run-break",
        json!([
            { "executionPath": "faulty:break", "params": {} },
            { "executionPath": "batch:items", "params": { "count": 1, "fail_every": 0 } },
        ]),
    )
    .await;

    assert_eq!(progress_of(&events, 0), vec![ProgressEvent::message("working")]);

    let found = diagnostics(&events);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].1, DiagnosticKind::Step);
    assert!(found[0].2.contains("lost connection"));

    assert_eq!(progress_of(&events, 1).len(), 2);
    assert_eq!(step_order(&events), vec![0, 1]);
    assert_started_and_completed(&events, "run-break");
}

/// A panic inside a step's stream is reported for that step and the
/// following steps still run
#[tokio::test]
async fn test_stream_panic_is_contained_to_its_step() {
    let (registry, fetch) = test_registry();
    let executor = PipelineExecutor::new(registry);

    let events = run_events(
        &executor,
        "run-panic",
        json!([
            { "executionPath": "loader:fetch", "params": { "url": "http://a" } },
            { "executionPath": "faulty:panic", "params": {} },
            { "executionPath": "loader:fetch", "params": { "url": "http://b" } },
        ]),
    )
    .await;

    let found = diagnostics(&events);
    assert_eq!(found.len(), 1);
    assert_eq!((found[0].0, found[0].1), (Some(1), DiagnosticKind::Step));
    assert!(found[0].2.contains("sensor exploded"));

    assert_eq!(fetch.calls().len(), 2);
    assert!(progress_of(&events, 1).is_empty());
    assert!(!progress_of(&events, 2).is_empty());
    assert_eq!(step_order(&events), vec![0, 2]);
    assert_started_and_completed(&events, "run-panic");
}

/// A panic while starting a step is reported the same way
#[tokio::test]
async fn test_invoke_panic_moves_to_next_step() {
    let (registry, fetch) = test_registry();
    let executor = PipelineExecutor::new(registry);

    let events = run_events(
        &executor,
        "run-panic-early",
        json!([
            { "executionPath": "faulty:panic_early", "params": {} },
            { "executionPath": "loader:fetch", "params": { "url": "http://a" } },
        ]),
    )
    .await;

    let found = diagnostics(&events);
    assert_eq!(found.len(), 1);
    assert_eq!((found[0].0, found[0].1), (Some(0), DiagnosticKind::Step));
    assert!(found[0].2.contains("lens cap still on"));

    assert_eq!(fetch.calls().len(), 1);
    assert!(!progress_of(&events, 1).is_empty());
    assert_started_and_completed(&events, "run-panic-early");
}
