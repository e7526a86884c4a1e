//! Test utility functions for sateval
#![allow(dead_code)]

use futures::stream::{self, StreamExt};
use sateval::core::event::{self, isolate_items, Counters, ProgressEvent, ProgressStream};
use sateval::execution::{DiagnosticKind, ExecutionEvent, PipelineExecutor};
use sateval::registry::{CapabilityRegistry, Operation, OperationDescriptor, ParamType, Params};
use sateval::{OperationError, RunContext};
use serde_json::Value;
use std::sync::{Arc, Mutex};

/// Operation that records every parameter set it was invoked with and
/// replays a fixed list of events
#[derive(Clone, Default)]
pub struct RecordingOperation {
    calls: Arc<Mutex<Vec<Params>>>,
    events: Vec<ProgressEvent>,
}

impl RecordingOperation {
    pub fn new(events: Vec<ProgressEvent>) -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            events,
        }
    }

    pub fn calls(&self) -> Vec<Params> {
        self.calls.lock().unwrap().clone()
    }
}

impl Operation for RecordingOperation {
    fn invoke(&self, params: Params) -> Result<ProgressStream, OperationError> {
        let mut events = self.events.clone();
        if let Some(Value::String(run_id)) = params.get("run_id") {
            events.insert(0, ProgressEvent::message(format!("run {}", run_id)));
        }
        self.calls.lock().unwrap().push(params);
        Ok(event::from_events(events))
    }
}

/// Processes `count` items, failing every item whose index is a multiple of
/// `fail_every` (never, when `fail_every` is 0)
pub fn item_operation() -> Arc<dyn Operation> {
    Arc::new(|params: Params| -> Result<ProgressStream, OperationError> {
        let count = params.require_i64("count")?;
        let fail_every = params.require_i64("fail_every")?;
        let items: Vec<i64> = (1..=count).collect();
        Ok(isolate_items(items, move |n: i64| async move {
            if fail_every > 0 && n % fail_every == 0 {
                Err(OperationError::Failed(format!("item {} is corrupt", n)))
            } else {
                Ok(())
            }
        }))
    })
}

/// Raises before producing any progress
pub fn raising_operation() -> Arc<dyn Operation> {
    Arc::new(|_params: Params| -> Result<ProgressStream, OperationError> {
        Err(OperationError::Failed("refused to start".to_string()))
    })
}

/// Emits one message, then raises mid-stream
pub fn breaking_operation() -> Arc<dyn Operation> {
    Arc::new(|_params: Params| -> Result<ProgressStream, OperationError> {
        Ok(stream::iter(vec![
            Ok(ProgressEvent::message("working")),
            Err(OperationError::Failed("lost connection".to_string())),
            Ok(ProgressEvent::message("never seen")),
        ])
        .boxed())
    })
}

/// Panics while its stream is being polled
pub fn panicking_operation() -> Arc<dyn Operation> {
    Arc::new(|_params: Params| -> Result<ProgressStream, OperationError> {
        Ok(stream::iter(0..1)
            .map(|_| -> Result<ProgressEvent, OperationError> { panic!("sensor exploded") })
            .boxed())
    })
}

/// Panics before returning a stream
pub fn panicking_invoke_operation() -> Arc<dyn Operation> {
    Arc::new(|_params: Params| -> Result<ProgressStream, OperationError> {
        panic!("lens cap still on")
    })
}

/// Registry used across scenarios, plus a handle on the recording `loader:fetch`
pub fn test_registry() -> (Arc<CapabilityRegistry>, RecordingOperation) {
    let fetch = RecordingOperation::new(vec![
        ProgressEvent::Counters(Counters::new(2)),
        ProgressEvent::Counters(Counters { succeeded: 2, failed: 0, total: 2 }),
        ProgressEvent::message("fetched"),
    ]);

    let registry = CapabilityRegistry::builder()
        .register(
            "loader",
            OperationDescriptor::new("fetch")
                .param("url", ParamType::String)
                .run_id("run_id"),
            Arc::new(fetch.clone()),
        )
        .unwrap()
        .register(
            "batch",
            OperationDescriptor::new("items")
                .param("count", ParamType::Integer)
                .param("fail_every", ParamType::Integer),
            item_operation(),
        )
        .unwrap()
        .register("faulty", OperationDescriptor::new("raise"), raising_operation())
        .unwrap()
        .register("faulty", OperationDescriptor::new("break"), breaking_operation())
        .unwrap()
        .register("faulty", OperationDescriptor::new("panic"), panicking_operation())
        .unwrap()
        .register("faulty", OperationDescriptor::new("panic_early"), panicking_invoke_operation())
        .unwrap()
        .build();

    (Arc::new(registry), fetch)
}

/// Run a pipeline to the end and collect every event
pub async fn run_events(executor: &PipelineExecutor, run_id: &str, pipeline: Value) -> Vec<ExecutionEvent> {
    executor.run(RunContext::new(run_id), pipeline).collect().await
}

/// Progress payloads emitted for one step, in order
pub fn progress_of(events: &[ExecutionEvent], step: usize) -> Vec<ProgressEvent> {
    events
        .iter()
        .filter_map(|e| match e {
            ExecutionEvent::Progress { step: s, progress, .. } if *s == step => Some(progress.clone()),
            _ => None,
        })
        .collect()
}

/// Diagnostics as `(step, kind, message)`
pub fn diagnostics(events: &[ExecutionEvent]) -> Vec<(Option<usize>, DiagnosticKind, String)> {
    events
        .iter()
        .filter_map(|e| match e {
            ExecutionEvent::Diagnostic { step, kind, message } => Some((*step, *kind, message.clone())),
            _ => None,
        })
        .collect()
}

/// Assert the run was bracketed by started/completed for `run_id`
pub fn assert_started_and_completed(events: &[ExecutionEvent], run_id: &str) {
    let started = events
        .iter()
        .position(|e| *e == ExecutionEvent::PipelineStarted { run_id: run_id.to_string() })
        .expect("pipeline_started was not emitted");
    assert_eq!(
        events.last(),
        Some(&ExecutionEvent::PipelineCompleted { run_id: run_id.to_string() }),
        "pipeline_completed must be the final event"
    );
    assert!(
        events[..started].iter().all(ExecutionEvent::is_diagnostic),
        "only validation diagnostics may precede pipeline_started"
    );
}

/// Steps in the order their progress was first seen
pub fn step_order(events: &[ExecutionEvent]) -> Vec<usize> {
    let mut order = Vec::new();
    for event in events {
        if let ExecutionEvent::Progress { step, .. } = event {
            if order.last() != Some(step) {
                order.push(*step);
            }
        }
    }
    order
}
