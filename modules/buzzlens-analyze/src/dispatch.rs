//! Bounded concurrent execution of structured inference tasks.
//!
//! Each task carries an opaque location; completions come back with that
//! location and nothing else, in whatever order they finish. The dispatcher
//! never looks inside a location. Handlers run on the driving task one at a
//! time, so results can be written straight into caller-owned structures.

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde::de::DeserializeOwned;
use tokio::sync::Semaphore;

use crate::infer::{InferenceOutcome, OutcomeKind, StructuredInference};

/// One unit of work: what to ask and where the answer belongs.
#[derive(Debug, Clone)]
pub struct TaskDescriptor<L> {
    pub directive: String,
    pub payload: String,
    pub location: L,
}

impl<L> TaskDescriptor<L> {
    pub fn new(directive: impl Into<String>, payload: impl Into<String>, location: L) -> Self {
        Self {
            directive: directive.into(),
            payload: payload.into(),
            location,
        }
    }
}

#[derive(Debug)]
pub struct Completion<L, T> {
    pub location: L,
    pub outcome: InferenceOutcome<T>,
}

/// Per-outcome tallies for one dispatch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub completed: u64,
    pub structured: u64,
    pub no_structured_output: u64,
    pub transport_failures: u64,
}

impl DispatchReport {
    pub fn record(&mut self, kind: OutcomeKind) {
        self.completed += 1;
        match kind {
            OutcomeKind::Structured => self.structured += 1,
            OutcomeKind::NoStructuredOutput => self.no_structured_output += 1,
            OutcomeKind::TransportFailure => self.transport_failures += 1,
        }
    }

    pub fn failed(&self) -> u64 {
        self.no_structured_output + self.transport_failures
    }
}

/// In-flight completions from one or more dispatchers.
pub struct CompletionQueue<L, T> {
    in_flight: FuturesUnordered<BoxFuture<'static, Completion<L, T>>>,
}

impl<L, T> CompletionQueue<L, T> {
    pub fn new() -> Self {
        Self {
            in_flight: FuturesUnordered::new(),
        }
    }

    pub fn push(&mut self, task: BoxFuture<'static, Completion<L, T>>) {
        self.in_flight.push(task);
    }

    /// Next finished task, or `None` once nothing is pending.
    pub async fn next(&mut self) -> Option<Completion<L, T>> {
        self.in_flight.next().await
    }

    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }
}

impl<L, T> Default for CompletionQueue<L, T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs tasks through [`StructuredInference`] with at most `ceiling` of them
/// talking to the generator at once.
#[derive(Clone)]
pub struct Dispatcher {
    name: &'static str,
    inference: Arc<StructuredInference>,
    permits: Arc<Semaphore>,
    ceiling: usize,
}

impl Dispatcher {
    pub fn new(name: &'static str, inference: Arc<StructuredInference>, ceiling: usize) -> Self {
        let ceiling = ceiling.max(1);
        Self {
            name,
            inference,
            permits: Arc::new(Semaphore::new(ceiling)),
            ceiling,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Future for a single task. It waits for a permit before calling the
    /// generator, so pushing many of these into a queue is cheap.
    pub fn submit<L, T>(&self, task: TaskDescriptor<L>) -> BoxFuture<'static, Completion<L, T>>
    where
        L: Send + 'static,
        T: DeserializeOwned + Send + 'static,
    {
        let inference = self.inference.clone();
        let permits = self.permits.clone();
        let name = self.name;
        async move {
            let TaskDescriptor {
                directive,
                payload,
                location,
            } = task;
            let outcome = match permits.acquire_owned().await {
                Ok(_permit) => inference.infer::<T>(&directive, &payload).await,
                Err(_) => InferenceOutcome::TransportFailure(format!("{name} dispatcher closed")),
            };
            Completion { location, outcome }
        }
        .boxed()
    }

    /// Run `tasks` to completion. `handler` is called exactly once per task
    /// with its location and outcome; any tasks it returns are submitted on
    /// the spot and handled the same way.
    pub async fn run<L, T, F>(
        &self,
        tasks: impl IntoIterator<Item = TaskDescriptor<L>>,
        mut handler: F,
    ) -> DispatchReport
    where
        L: Send + 'static,
        T: DeserializeOwned + Send + 'static,
        F: FnMut(L, InferenceOutcome<T>) -> Vec<TaskDescriptor<L>>,
    {
        let mut queue = CompletionQueue::new();
        for task in tasks {
            queue.push(self.submit(task));
        }

        let mut report = DispatchReport::default();
        while let Some(Completion { location, outcome }) = queue.next().await {
            report.record(outcome.kind());
            for follow_up in handler(location, outcome) {
                queue.push(self.submit(follow_up));
            }
        }

        tracing::debug!(
            dispatcher = self.name,
            completed = report.completed,
            failed = report.failed(),
            "Dispatch run finished"
        );
        report
    }
}
