//! Progress stream protocol
//!
//! Every operation invoked by the executor produces a lazy, ordered, finite
//! sequence of [`ProgressEvent`]s instead of returning a single value. A
//! stream item of `Err` means the operation raised while producing it; the
//! executor stops pulling from that stream and moves on to the next step.

use crate::core::error::OperationError;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt::Display;
use std::future::Future;
use tracing::warn;

/// Cumulative success/failure counters for a unit of work
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub succeeded: u64,
    pub failed: u64,
    pub total: u64,
}

impl Counters {
    pub fn new(total: u64) -> Self {
        Self {
            succeeded: 0,
            failed: 0,
            total,
        }
    }

    pub fn record_success(&mut self) {
        self.succeeded += 1;
    }

    pub fn record_failure(&mut self) {
        self.failed += 1;
    }

    /// Items handled so far, whichever way they went
    pub fn processed(&self) -> u64 {
        self.succeeded + self.failed
    }
}

/// One unit of streamed output from an operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProgressEvent {
    /// Structured counter snapshot
    Counters(Counters),
    /// Free-form status or diagnostic message
    Message(String),
}

impl ProgressEvent {
    pub fn message(text: impl Into<String>) -> Self {
        ProgressEvent::Message(text.into())
    }

    pub fn counters(&self) -> Option<&Counters> {
        match self {
            ProgressEvent::Counters(c) => Some(c),
            ProgressEvent::Message(_) => None,
        }
    }
}

impl From<Counters> for ProgressEvent {
    fn from(counters: Counters) -> Self {
        ProgressEvent::Counters(counters)
    }
}

/// Stream produced by an operation invocation
pub type ProgressStream = BoxStream<'static, Result<ProgressEvent, OperationError>>;

/// A stream that yields the given events and ends
pub fn from_events(events: Vec<ProgressEvent>) -> ProgressStream {
    stream::iter(events.into_iter().map(Ok)).boxed()
}

/// An empty progress stream
pub fn empty() -> ProgressStream {
    stream::empty().boxed()
}

struct ItemRun<T, F> {
    items: std::vec::IntoIter<T>,
    work: F,
    counters: Counters,
    pending: VecDeque<ProgressEvent>,
}

/// Run `work` over every item in order, isolating failures per item.
///
/// Emits an initial snapshot `{0, 0, N}`, then after each item an updated
/// snapshot. A failed item additionally emits a message naming the item and
/// its error before the snapshot; it never ends the stream early.
pub fn isolate_items<T, F, Fut>(items: Vec<T>, work: F) -> ProgressStream
where
    T: Display + Send + 'static,
    F: FnMut(T) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), OperationError>> + Send + 'static,
{
    let counters = Counters::new(items.len() as u64);
    let run = ItemRun {
        items: items.into_iter(),
        work,
        counters,
        pending: VecDeque::from([ProgressEvent::Counters(counters)]),
    };

    stream::unfold(run, |mut run| async move {
        loop {
            if let Some(event) = run.pending.pop_front() {
                return Some((Ok(event), run));
            }

            let item = run.items.next()?;
            let label = item.to_string();
            match (run.work)(item).await {
                Ok(()) => run.counters.record_success(),
                Err(err) => {
                    warn!("Item {} failed: {}", label, err);
                    run.counters.record_failure();
                    run.pending
                        .push_back(ProgressEvent::message(format!("{}: {}", label, err)));
                }
            }
            run.pending.push_back(ProgressEvent::Counters(run.counters));
        }
    })
    .boxed()
}
