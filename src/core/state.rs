//! Execution state models

use crate::core::event::{Counters, ProgressEvent};
use crate::execution::ExecutionEvent;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Where a pipeline invocation ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Steps are being checked against the registry
    Validating,
    /// Steps are executing in order
    Running,
    /// The completed event was emitted
    Completed,
    /// Validation stopped the run before any step executed
    Rejected,
}

/// Tally of what a run emitted, built by observing its event stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub status: ExecutionStatus,
    /// Steps that produced at least one progress event
    pub steps_reporting: usize,
    pub progress_events: usize,
    pub diagnostics: Vec<String>,
    /// Last counter snapshot seen for each reporting step, in step order
    pub final_counters: Vec<(usize, Counters)>,
    #[serde(skip)]
    reporting: BTreeSet<usize>,
}

impl RunSummary {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            status: ExecutionStatus::Validating,
            steps_reporting: 0,
            progress_events: 0,
            diagnostics: Vec::new(),
            final_counters: Vec::new(),
            reporting: BTreeSet::new(),
        }
    }

    /// Fold one event into the summary
    pub fn observe(&mut self, event: &ExecutionEvent) {
        match event {
            ExecutionEvent::PipelineStarted { .. } => self.status = ExecutionStatus::Running,
            ExecutionEvent::Progress { step, progress, .. } => {
                self.progress_events += 1;
                if self.reporting.insert(*step) {
                    self.steps_reporting += 1;
                }
                if let ProgressEvent::Counters(counters) = progress {
                    match self.final_counters.iter_mut().find(|(s, _)| s == step) {
                        Some((_, last)) => *last = *counters,
                        None => self.final_counters.push((*step, *counters)),
                    }
                }
            }
            ExecutionEvent::Diagnostic { message, .. } => self.diagnostics.push(message.clone()),
            ExecutionEvent::PipelineCompleted { .. } => self.status = ExecutionStatus::Completed,
        }
    }

    /// Close the summary once the stream has ended
    pub fn finish(&mut self) {
        if self.status != ExecutionStatus::Completed {
            self.status = ExecutionStatus::Rejected;
        }
    }
}
