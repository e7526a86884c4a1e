//! Pipeline executor - validates a submitted pipeline, then runs its steps in
//! order while forwarding every operation's progress stream.
//!
//! The output is a pull-based stream: nothing advances unless the consumer
//! asks for the next event, and dropping the stream stops the run.

use crate::{
    core::{
        config::{EngineSettings, PipelineConfig},
        context::RunContext,
        error::OperationError,
        event::{ProgressEvent, ProgressStream},
        state::RunSummary,
    },
    execution::{
        resolver::resolve,
        validator::{step_parts, validate_step},
    },
    registry::CapabilityRegistry,
};
use futures::{
    future::FutureExt,
    stream::{self, BoxStream, StreamExt},
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};
use tracing::{error, info, warn};

/// What part of the run a diagnostic came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticKind {
    /// A step's parameters did not fit its operation
    Validation,
    /// A step raised while starting or streaming
    Step,
    /// Something in the engine itself escaped step-level handling
    Pipeline,
}

/// Events emitted by a pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExecutionEvent {
    PipelineStarted {
        run_id: String,
    },
    Progress {
        step: usize,
        execution_path: String,
        progress: ProgressEvent,
    },
    Diagnostic {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step: Option<usize>,
        kind: DiagnosticKind,
        message: String,
    },
    PipelineCompleted {
        run_id: String,
    },
}

impl ExecutionEvent {
    fn diagnostic(step: Option<usize>, kind: DiagnosticKind, message: impl Into<String>) -> Self {
        ExecutionEvent::Diagnostic {
            step,
            kind,
            message: message.into(),
        }
    }

    pub fn is_diagnostic(&self) -> bool {
        matches!(self, ExecutionEvent::Diagnostic { .. })
    }

    /// One JSON object, as streamed to a transport
    pub fn to_json_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| encoding_failure_line(&e))
    }
}

fn encoding_failure_line(err: &dyn std::fmt::Display) -> String {
    json!({
        "event": "diagnostic",
        "kind": DiagnosticKind::Pipeline,
        "message": format!("Event could not be encoded: {}", err),
    })
    .to_string()
}

/// Runs pipelines against a capability registry
#[derive(Debug, Clone)]
pub struct PipelineExecutor {
    registry: Arc<CapabilityRegistry>,
    strict_validation: bool,
}

impl PipelineExecutor {
    pub fn new(registry: Arc<CapabilityRegistry>) -> Self {
        Self {
            registry,
            strict_validation: false,
        }
    }

    pub fn from_settings(registry: Arc<CapabilityRegistry>, settings: &EngineSettings) -> Self {
        Self::new(registry).with_strict_validation(settings.strict_validation)
    }

    /// Abort before running when a step's parameters fail validation
    pub fn with_strict_validation(mut self, strict: bool) -> Self {
        self.strict_validation = strict;
        self
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// Run a submitted pipeline document.
    ///
    /// A document that is not a list, or any step that is structurally
    /// malformed or unresolvable, ends the stream silently before anything
    /// runs. Parameter errors are reported and the run goes ahead anyway
    /// unless strict validation is on.
    pub fn run(&self, run: RunContext, pipeline: Value) -> BoxStream<'static, ExecutionEvent> {
        let state = PipelineRun::new(self.registry.clone(), self.strict_validation, run, pipeline);
        stream::unfold(state, |mut state| async move {
            let event = state.next_event().await?;
            Some((event, state))
        })
        .boxed()
    }

    /// Run a typed pipeline configuration
    pub fn run_config(&self, run: RunContext, config: &PipelineConfig) -> BoxStream<'static, ExecutionEvent> {
        self.run(run, config.to_value())
    }

    /// Drive a run to the end, handing each event to `handler` as it arrives
    pub async fn execute<F>(&self, run: RunContext, pipeline: Value, mut handler: F) -> RunSummary
    where
        F: FnMut(&ExecutionEvent),
    {
        let mut summary = RunSummary::new(run.run_id.clone());
        let mut events = self.run(run, pipeline);
        while let Some(event) = events.next().await {
            summary.observe(&event);
            handler(&event);
        }
        summary.finish();
        summary
    }
}

enum Phase {
    Validating { next: usize },
    Starting,
    Running,
    Completing,
    Done,
}

struct ActiveStep {
    index: usize,
    execution_path: String,
    stream: ProgressStream,
}

/// State of one pipeline invocation
struct PipelineRun {
    registry: Arc<CapabilityRegistry>,
    strict_validation: bool,
    run: RunContext,
    steps: Vec<Value>,
    phase: Phase,
    parameter_errors: usize,
    next_step: usize,
    active: Option<ActiveStep>,
}

impl PipelineRun {
    fn new(registry: Arc<CapabilityRegistry>, strict_validation: bool, run: RunContext, pipeline: Value) -> Self {
        let (steps, phase) = match pipeline {
            Value::Array(steps) => (steps, Phase::Validating { next: 0 }),
            other => {
                warn!("Run {}: pipeline is not a list ({}), nothing to do", run, crate::registry::json_type_name(&other));
                (Vec::new(), Phase::Done)
            }
        };

        Self {
            registry,
            strict_validation,
            run,
            steps,
            phase,
            parameter_errors: 0,
            next_step: 0,
            active: None,
        }
    }

    async fn next_event(&mut self) -> Option<ExecutionEvent> {
        loop {
            match self.phase {
                Phase::Validating { next } => {
                    if let Some(event) = self.validate_next(next) {
                        return Some(event);
                    }
                }
                Phase::Starting => {
                    info!("Starting pipeline run {} ({} steps)", self.run, self.steps.len());
                    self.phase = Phase::Running;
                    return Some(ExecutionEvent::PipelineStarted {
                        run_id: self.run.run_id.clone(),
                    });
                }
                Phase::Running => {
                    let outcome = AssertUnwindSafe(self.next_running_event()).catch_unwind().await;
                    match outcome {
                        Ok(Some(event)) => return Some(event),
                        Ok(None) => self.phase = Phase::Completing,
                        Err(panic) => {
                            let message = panic_message(&panic);
                            error!("Run {} aborted: {}", self.run, message);
                            self.active = None;
                            self.phase = Phase::Completing;
                            return Some(ExecutionEvent::diagnostic(
                                None,
                                DiagnosticKind::Pipeline,
                                format!("Pipeline aborted: {}", message),
                            ));
                        }
                    }
                }
                Phase::Completing => {
                    info!("Pipeline run {} completed", self.run);
                    self.phase = Phase::Done;
                    return Some(ExecutionEvent::PipelineCompleted {
                        run_id: self.run.run_id.clone(),
                    });
                }
                Phase::Done => return None,
            }
        }
    }

    /// Validate step `index`, advancing the phase. Returns a diagnostic when
    /// the step raised a parameter error.
    fn validate_next(&mut self, index: usize) -> Option<ExecutionEvent> {
        let Some(step) = self.steps.get(index) else {
            self.phase = if self.strict_validation && self.parameter_errors > 0 {
                warn!(
                    "Run {} rejected: {} step(s) with parameter errors",
                    self.run, self.parameter_errors
                );
                Phase::Done
            } else {
                Phase::Starting
            };
            return None;
        };

        match validate_step(step, &self.registry) {
            Ok(true) => {
                self.phase = Phase::Validating { next: index + 1 };
                None
            }
            Ok(false) => {
                warn!("Run {}: step {} is malformed or unresolvable, not running", self.run, index);
                self.phase = Phase::Done;
                None
            }
            Err(err) => {
                warn!("Run {}: step {} has invalid parameters: {}", self.run, index, err);
                self.parameter_errors += 1;
                self.phase = Phase::Validating { next: index + 1 };
                Some(ExecutionEvent::diagnostic(
                    Some(index),
                    DiagnosticKind::Validation,
                    err.to_string(),
                ))
            }
        }
    }

    /// Next event of the running phase, or `None` once every step is done.
    ///
    /// A panic inside an operation, whether at invocation or while its
    /// stream is polled, is contained to that step.
    async fn next_running_event(&mut self) -> Option<ExecutionEvent> {
        loop {
            if let Some(active) = self.active.as_mut() {
                let polled = AssertUnwindSafe(active.stream.next()).catch_unwind().await;
                match polled {
                    Ok(Some(Ok(progress))) => {
                        return Some(ExecutionEvent::Progress {
                            step: active.index,
                            execution_path: active.execution_path.clone(),
                            progress,
                        });
                    }
                    Ok(Some(Err(err))) => {
                        let index = active.index;
                        let execution_path = active.execution_path.clone();
                        self.active = None;
                        return Some(step_failure(index, &execution_path, &err));
                    }
                    Ok(None) => {
                        info!("Step {} ({}) finished", active.index, active.execution_path);
                        self.active = None;
                        continue;
                    }
                    Err(panic) => {
                        let index = active.index;
                        let execution_path = active.execution_path.clone();
                        self.active = None;
                        return Some(step_panic(index, &execution_path, &panic));
                    }
                }
            }

            let index = self.next_step;
            let step = self.steps.get(index)?.clone();
            self.next_step += 1;

            match self.start_step(index, &step) {
                Ok(active) => self.active = Some(active),
                Err(event) => return Some(event),
            }
        }
    }

    fn start_step(&self, index: usize, step: &Value) -> Result<ActiveStep, ExecutionEvent> {
        let (execution_path, params) = step_parts(step).ok_or_else(|| {
            ExecutionEvent::diagnostic(Some(index), DiagnosticKind::Step, "Step is malformed")
        })?;

        let resolved = resolve(execution_path, &self.registry)
            .map_err(|err| step_failure(index, execution_path, &OperationError::from(err)))?;

        let params = resolved.bind(params, &self.run);
        info!("Running step {} ({}) for run {}", index, execution_path, self.run);

        let stream = panic::catch_unwind(AssertUnwindSafe(|| resolved.handler.invoke(params)))
            .map_err(|panic| step_panic(index, execution_path, &panic))?
            .map_err(|err| step_failure(index, execution_path, &err))?;

        Ok(ActiveStep {
            index,
            execution_path: execution_path.to_string(),
            stream,
        })
    }
}

fn step_failure(index: usize, execution_path: &str, err: &OperationError) -> ExecutionEvent {
    error!("Step {} ({}) failed: {}", index, execution_path, err);
    ExecutionEvent::diagnostic(
        Some(index),
        DiagnosticKind::Step,
        format!("Step {} ({}) failed: {}", index, execution_path, err),
    )
}

fn step_panic(index: usize, execution_path: &str, panic: &Box<dyn Any + Send>) -> ExecutionEvent {
    let message = panic_message(panic);
    error!("Step {} ({}) panicked: {}", index, execution_path, message);
    ExecutionEvent::diagnostic(
        Some(index),
        DiagnosticKind::Step,
        format!("Step {} ({}) panicked: {}", index, execution_path, message),
    )
}

fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
