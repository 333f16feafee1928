use std::future::Future;

use futures::FutureExt;
use futures::future::LocalBoxFuture;
use serde::{Deserialize, Serialize};

/// Boxed future returned by a job body.
pub type JobFuture<'a, T> = LocalBoxFuture<'a, anyhow::Result<T>>;

pub(crate) enum Action<'a, T> {
    Run(Box<dyn FnOnce() -> JobFuture<'a, T> + 'a>),
    Skip(String),
}

/// One unit of batchable work.
///
/// A job owns a single zero-argument async body. It is built right before a
/// batch run and consumed by it; the batcher turns it into exactly one
/// [`JobOutcome`].
pub struct Job<'a, T> {
    pub id: String,
    pub label: String,
    action: Action<'a, T>,
}

impl<'a, T> Job<'a, T> {
    pub fn new<F, Fut>(id: impl Into<String>, label: impl Into<String>, execute: F) -> Self
    where
        F: FnOnce() -> Fut + 'a,
        Fut: Future<Output = anyhow::Result<T>> + 'a,
    {
        Self {
            id: id.into(),
            label: label.into(),
            action: Action::Run(Box::new(move || execute().boxed_local())),
        }
    }

    /// A job that is reported as skipped without running anything (dry runs).
    pub fn skipped(id: impl Into<String>, label: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            action: Action::Skip(reason.into()),
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.action, Action::Skip(_))
    }

    pub(crate) fn into_parts(self) -> (String, String, Action<'a, T>) {
        (self.id, self.label, self.action)
    }
}

impl<T> std::fmt::Debug for Job<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("skipped", &self.is_skipped())
            .finish()
    }
}

/// What happened when a job ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome<T> {
    Success { value: T, elapsed_ms: u64 },
    Failure { error: String, elapsed_ms: u64 },
    Skipped { reason: String },
}

/// The outcome of one job, tagged with the job's identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOutcome<T> {
    pub id: String,
    pub label: String,
    #[serde(flatten)]
    pub outcome: Outcome<T>,
}

impl<T> JobOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, Outcome::Failure { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.outcome, Outcome::Skipped { .. })
    }

    /// Time spent in the job body. `None` for skipped jobs.
    pub fn elapsed_ms(&self) -> Option<u64> {
        match self.outcome {
            Outcome::Success { elapsed_ms, .. } | Outcome::Failure { elapsed_ms, .. } => {
                Some(elapsed_ms)
            }
            Outcome::Skipped { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Failure { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Aggregate over a finished batch. Outcomes are in job submission order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport<T> {
    succeeded: usize,
    failed: usize,
    skipped: usize,
    windows: usize,
    elapsed_ms: u64,
    outcomes: Vec<JobOutcome<T>>,
}

impl<T> BatchReport<T> {
    pub fn new(outcomes: Vec<JobOutcome<T>>, windows: usize, elapsed_ms: u64) -> Self {
        let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
        let failed = outcomes.iter().filter(|o| o.is_failure()).count();
        let skipped = outcomes.iter().filter(|o| o.is_skipped()).count();
        Self {
            succeeded,
            failed,
            skipped,
            windows,
            elapsed_ms,
            outcomes,
        }
    }

    pub fn succeeded(&self) -> usize {
        self.succeeded
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    /// Number of windows the batcher executed.
    pub fn windows(&self) -> usize {
        self.windows
    }

    /// Wall-clock time of the whole batch.
    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms
    }

    pub fn outcomes(&self) -> &[JobOutcome<T>] {
        &self.outcomes
    }

    pub fn into_outcomes(self) -> Vec<JobOutcome<T>> {
        self.outcomes
    }

    pub fn failures(&self) -> impl Iterator<Item = &JobOutcome<T>> {
        self.outcomes.iter().filter(|o| o.is_failure())
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}
