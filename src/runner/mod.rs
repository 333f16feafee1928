mod batcher;
mod job;
mod retry;

pub use batcher::JobBatcher;
pub use job::{BatchReport, Job, JobFuture, JobOutcome, Outcome};
pub use retry::{RetryError, RetryPolicy};
