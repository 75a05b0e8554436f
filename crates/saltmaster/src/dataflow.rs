//! Deferred values and the dependency scheduler a run is built from.
//!
//! A [`Deferred`] is a value some step will produce. Steps are wired with
//! [`Pipeline::node`]: a node waits for all of its inputs, then runs once.
//! Ordering between steps comes only from these data dependencies, so
//! independent branches run concurrently and joins happen where a step
//! reads more than one input.
//!
//! The first failing node cancels the pipeline. Nodes that have not started
//! yet are skipped; nodes already talking to a provider finish and their
//! results are discarded by whoever was waiting on them.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Step, StepCause, StepFailure};

/// A value that becomes available once the step producing it resolves.
///
/// Cloning is cheap and every clone observes the same result.
#[derive(Clone)]
pub struct Deferred<T: Clone> {
    inner: Shared<BoxFuture<'static, Result<T, StepFailure>>>,
}

impl<T> Deferred<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// A value that is already known.
    #[must_use]
    pub fn resolved(value: T) -> Self {
        Self::lazy(async move { Ok(value) })
    }

    /// A value that will never arrive.
    #[must_use]
    pub fn failed(failure: StepFailure) -> Self {
        Self::lazy(async move { Err(failure) })
    }

    /// Wrap a future that only runs when first awaited.
    pub fn lazy<F>(fut: F) -> Self
    where
        F: Future<Output = Result<T, StepFailure>> + Send + 'static,
    {
        Self {
            inner: fut.boxed().shared(),
        }
    }

    /// Start `fut` on the runtime right away.
    pub fn spawn<F>(step: Step, fut: F) -> Self
    where
        F: Future<Output = Result<T, StepFailure>> + Send + 'static,
    {
        let handle = tokio::spawn(fut);
        Self::lazy(async move {
            match handle.await {
                Ok(result) => result,
                Err(err) => Err(StepFailure::new(step, StepCause::Aborted(err.to_string()))),
            }
        })
    }

    /// Transform the value once it resolves.
    #[must_use]
    pub fn map<U, F>(self, f: F) -> Deferred<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        Deferred::lazy(async move { self.inner.await.map(f) })
    }

    /// Wait for both values. Fails as soon as either side fails.
    #[must_use]
    pub fn zip<U>(self, other: Deferred<U>) -> Deferred<(T, U)>
    where
        U: Clone + Send + Sync + 'static,
    {
        Deferred::lazy(async move { futures::future::try_join(self.inner, other.inner).await })
    }

    /// Wait for the value.
    ///
    /// # Errors
    /// Returns the [`StepFailure`] of the step that produced no value.
    pub async fn resolve(self) -> Result<T, StepFailure> {
        self.inner.await
    }
}

/// How a node arrived at its value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    /// The step did its work.
    Completed(T),
    /// A value recorded by an earlier run was still valid.
    Reused(T),
}

/// Journal phase of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Started,
    Completed,
    Reused,
    Failed,
    Skipped,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Started => write!(f, "started"),
            Self::Completed => write!(f, "completed"),
            Self::Reused => write!(f, "reused"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// One step transition.
#[derive(Debug, Clone, Serialize)]
pub struct JournalEntry {
    /// Position in the journal.
    pub seq: usize,
    pub step: Step,
    pub phase: Phase,
    pub at: DateTime<Utc>,
}

/// Step transitions of a run, in the order they happened.
#[derive(Debug, Clone, Default)]
pub struct RunJournal {
    entries: Arc<Mutex<Vec<JournalEntry>>>,
}

impl RunJournal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a transition.
    pub fn record(&self, step: Step, phase: Phase) {
        debug!(step = %step, phase = %phase, "Step transition");
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let seq = entries.len();
        entries.push(JournalEntry {
            seq,
            step,
            phase,
            at: Utc::now(),
        });
    }

    /// Snapshot of every transition so far.
    #[must_use]
    pub fn entries(&self) -> Vec<JournalEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Position of the first `phase` transition of `step`.
    #[must_use]
    pub fn position(&self, step: Step, phase: Phase) -> Option<usize> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|e| e.step == step && e.phase == phase)
            .map(|e| e.seq)
    }

    /// Position where `step` finished with a value, either completed or reused.
    #[must_use]
    pub fn finished_at(&self, step: Step) -> Option<usize> {
        self.position(step, Phase::Completed)
            .or_else(|| self.position(step, Phase::Reused))
    }

    /// Last phase recorded for `step`.
    #[must_use]
    pub fn last_phase(&self, step: Step) -> Option<Phase> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .find(|e| e.step == step)
            .map(|e| e.phase)
    }
}

/// Scheduling context shared by all nodes of one run.
#[derive(Clone, Default)]
pub struct Pipeline {
    cancel: CancellationToken,
    first_failure: Arc<Mutex<Option<StepFailure>>>,
    journal: RunJournal,
    nodes: Arc<Mutex<Vec<Deferred<()>>>>,
}

impl Pipeline {
    #[must_use]
    pub fn new(journal: RunJournal) -> Self {
        Self {
            journal,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn journal(&self) -> &RunJournal {
        &self.journal
    }

    /// Add a step that runs `work` once every input has resolved.
    ///
    /// If an input fails, or the pipeline was cancelled before the inputs
    /// arrived, `work` never runs and the node resolves to that failure.
    /// A panic in `work` fails the node like any other error.
    pub fn node<I, T, F, Fut>(&self, step: Step, inputs: Deferred<I>, work: F) -> Deferred<T>
    where
        I: Clone + Send + Sync + 'static,
        T: Clone + Send + Sync + 'static,
        F: FnOnce(I) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Outcome<T>, StepCause>> + Send + 'static,
    {
        let pipeline = self.clone();
        let deferred = Deferred::spawn(step, async move {
            let inputs = tokio::select! {
                biased;
                () = pipeline.cancel.cancelled() => {
                    pipeline.journal.record(step, Phase::Skipped);
                    return Err(StepFailure::new(step, StepCause::Cancelled));
                }
                resolved = inputs.resolve() => match resolved {
                    Ok(inputs) => inputs,
                    Err(upstream) => {
                        pipeline.journal.record(step, Phase::Skipped);
                        return Err(upstream);
                    }
                },
            };

            if pipeline.cancel.is_cancelled() {
                pipeline.journal.record(step, Phase::Skipped);
                return Err(StepFailure::new(step, StepCause::Cancelled));
            }

            pipeline.journal.record(step, Phase::Started);
            let result = AssertUnwindSafe(async move { work(inputs).await })
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(StepCause::Aborted(panic_message(&*panic))));

            match result {
                Ok(Outcome::Completed(value)) => {
                    pipeline.journal.record(step, Phase::Completed);
                    Ok(value)
                }
                Ok(Outcome::Reused(value)) => {
                    pipeline.journal.record(step, Phase::Reused);
                    Ok(value)
                }
                Err(cause) => {
                    let failure = StepFailure::new(step, cause);
                    pipeline.journal.record(step, Phase::Failed);
                    pipeline.fail(&failure);
                    Err(failure)
                }
            }
        });

        self.nodes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(deferred.clone().map(|_| ()));
        deferred
    }

    /// Record a failure and stop scheduling further steps.
    pub fn fail(&self, failure: &StepFailure) {
        if failure.is_cancelled() {
            return;
        }
        let mut first = self
            .first_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if first.is_none() {
            *first = Some(failure.clone());
        }
        drop(first);
        self.cancel.cancel();
    }

    /// The first real failure of the run, if any.
    #[must_use]
    pub fn first_failure(&self) -> Option<StepFailure> {
        self.first_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait until every node has either resolved or been skipped.
    pub async fn drain(&self) {
        let nodes = std::mem::take(
            &mut *self.nodes.lock().unwrap_or_else(PoisonError::into_inner),
        );
        futures::future::join_all(nodes.into_iter().map(Deferred::resolve)).await;
    }

    /// Wait for `target`, drain the pipeline, and report the first failure.
    ///
    /// # Errors
    /// Returns the first failure recorded by any node, or the failure of
    /// `target` itself when nothing else failed first.
    pub async fn finish<T>(&self, target: Deferred<T>) -> Result<T, StepFailure>
    where
        T: Clone + Send + Sync + 'static,
    {
        let result = target.resolve().await;
        self.drain().await;
        match result {
            Ok(value) => Ok(value),
            Err(failure) => Err(self.first_failure().unwrap_or(failure)),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "step panicked".to_string())
}
