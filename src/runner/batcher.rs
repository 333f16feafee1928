use std::collections::HashSet;
use std::time::Duration;

use anyhow::anyhow;
use futures::future::join_all;
use tokio::time::{Instant, timeout};
use tracing::{debug, info, warn};

use super::job::{Action, BatchReport, Job, JobOutcome, Outcome};
use crate::error::{Result, VideogenError};

/// Runs jobs in fixed-size windows.
///
/// Every job of a window is started together and the batcher waits for the
/// whole window before starting the next one. A fast job does not let a job
/// from the next window start early. Job failures are recorded as outcomes
/// and never abort the batch.
#[derive(Debug, Clone)]
pub struct JobBatcher {
    concurrency: usize,
    job_timeout: Option<Duration>,
}

impl Default for JobBatcher {
    fn default() -> Self {
        Self {
            concurrency: 2,
            job_timeout: None,
        }
    }
}

impl JobBatcher {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency,
            job_timeout: None,
        }
    }

    /// Fail any job whose body runs longer than `limit`.
    pub fn with_job_timeout(mut self, limit: Duration) -> Self {
        self.job_timeout = Some(limit);
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run every job and return outcomes in input order.
    ///
    /// Errors only on a malformed batch: zero concurrency or duplicate ids.
    pub async fn run<'a, T>(&self, jobs: Vec<Job<'a, T>>) -> Result<BatchReport<T>> {
        if self.concurrency == 0 {
            return Err(VideogenError::InvalidBatch(
                "concurrency must be at least 1".into(),
            ));
        }
        let mut seen = HashSet::with_capacity(jobs.len());
        for job in &jobs {
            if !seen.insert(job.id.as_str()) {
                return Err(VideogenError::InvalidBatch(format!(
                    "duplicate job id '{}'",
                    job.id
                )));
            }
        }

        let started = Instant::now();
        let total = jobs.len();
        let mut outcomes = Vec::with_capacity(total);
        let mut windows = 0;
        let mut pending = jobs.into_iter().peekable();

        while pending.peek().is_some() {
            let window: Vec<_> = pending.by_ref().take(self.concurrency).collect();
            windows += 1;
            info!(
                window = windows,
                size = window.len(),
                done = outcomes.len(),
                total,
                "starting window"
            );
            let results = join_all(window.into_iter().map(|job| self.run_one(job))).await;
            outcomes.extend(results);
        }

        let report = BatchReport::new(outcomes, windows, started.elapsed().as_millis() as u64);
        info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            skipped = report.skipped(),
            windows,
            elapsed_ms = report.elapsed_ms(),
            "batch finished"
        );
        Ok(report)
    }

    async fn run_one<'a, T>(&self, job: Job<'a, T>) -> JobOutcome<T> {
        let (id, label, action) = job.into_parts();
        let execute = match action {
            Action::Skip(reason) => {
                info!(job = %id, %reason, "skipped");
                return JobOutcome {
                    id,
                    label,
                    outcome: Outcome::Skipped { reason },
                };
            }
            Action::Run(execute) => execute,
        };

        debug!(job = %id, %label, "job started");
        let start = Instant::now();
        let result = match self.job_timeout {
            Some(limit) => match timeout(limit, execute()).await {
                Ok(result) => result,
                Err(_) => Err(anyhow!("timed out after {}ms", limit.as_millis())),
            },
            None => execute().await,
        };
        let elapsed_ms = start.elapsed().as_millis() as u64;

        let outcome = match result {
            Ok(value) => {
                info!(job = %id, elapsed_ms, "job succeeded");
                Outcome::Success { value, elapsed_ms }
            }
            Err(err) => {
                let error = format!("{err:#}");
                warn!(job = %id, elapsed_ms, %error, "job failed");
                Outcome::Failure { error, elapsed_ms }
            }
        };
        JobOutcome { id, label, outcome }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use tokio::time::sleep;

    #[derive(Debug, Clone, Copy)]
    struct Span {
        start: Duration,
        end: Duration,
    }

    /// Jobs that sleep for `delays[i]` ms and record when they ran.
    fn timed_jobs<'a>(
        origin: Instant,
        delays: &[u64],
        log: &Rc<RefCell<Vec<(usize, Span)>>>,
    ) -> Vec<Job<'a, usize>> {
        delays
            .iter()
            .enumerate()
            .map(|(i, &ms)| {
                let log = Rc::clone(log);
                Job::new(format!("job-{i}"), format!("sleep {ms}ms"), move || async move {
                    let start = origin.elapsed();
                    sleep(Duration::from_millis(ms)).await;
                    let end = origin.elapsed();
                    log.borrow_mut().push((i, Span { start, end }));
                    Ok(i)
                })
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn window_barrier_holds() {
        let delays = [50, 10, 30, 70, 20, 5, 40];
        let concurrency = 3;
        let origin = Instant::now();
        let log = Rc::new(RefCell::new(Vec::new()));

        let report = JobBatcher::new(concurrency)
            .run(timed_jobs(origin, &delays, &log))
            .await
            .unwrap();

        assert_eq!(report.windows(), delays.len().div_ceil(concurrency));

        let mut spans = log.borrow().clone();
        spans.sort_by_key(|(i, _)| *i);
        let windows: Vec<Vec<Span>> = spans
            .chunks(concurrency)
            .map(|chunk| chunk.iter().map(|(_, s)| *s).collect())
            .collect();

        for pair in windows.windows(2) {
            let prev_end = pair[0].iter().map(|s| s.end).max().unwrap();
            let next_start = pair[1].iter().map(|s| s.start).min().unwrap();
            assert!(
                next_start >= prev_end,
                "window started at {next_start:?} before previous finished at {prev_end:?}"
            );
        }
        // Jobs inside a window start together.
        for window in &windows {
            assert!(window.iter().all(|s| s.start == window[0].start));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn outcomes_follow_input_order_not_completion_order() {
        let delays = [90, 10, 60, 20, 80, 1, 45, 33];
        let log = Rc::new(RefCell::new(Vec::new()));

        let report = JobBatcher::new(4)
            .run(timed_jobs(Instant::now(), &delays, &log))
            .await
            .unwrap();

        assert_eq!(report.total(), delays.len());
        let ids: Vec<_> = report.outcomes().iter().map(|o| o.id.clone()).collect();
        let expected: Vec<_> = (0..delays.len()).map(|i| format!("job-{i}")).collect();
        assert_eq!(ids, expected);

        // Completion order differed from input order.
        let completed: Vec<usize> = log.borrow().iter().map(|(i, _)| *i).collect();
        assert_ne!(completed, (0..delays.len()).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_one_is_sequential() {
        let delays = [30, 10, 20];
        let log = Rc::new(RefCell::new(Vec::new()));

        let report = JobBatcher::new(1)
            .run(timed_jobs(Instant::now(), &delays, &log))
            .await
            .unwrap();

        assert_eq!(report.windows(), 3);
        let spans = log.borrow();
        let order: Vec<usize> = spans.iter().map(|(i, _)| *i).collect();
        assert_eq!(order, vec![0, 1, 2]);
        for pair in spans.windows(2) {
            assert!(pair[1].1.start >= pair[0].1.end);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_above_job_count_is_one_window() {
        let delays = [30, 10, 20];
        let log = Rc::new(RefCell::new(Vec::new()));

        let report = JobBatcher::new(10)
            .run(timed_jobs(Instant::now(), &delays, &log))
            .await
            .unwrap();

        assert_eq!(report.windows(), 1);
        assert!(log.borrow().iter().all(|(_, s)| s.start == Duration::ZERO));
        assert_eq!(report.elapsed_ms(), 30);
    }

    #[tokio::test]
    async fn empty_batch_yields_empty_report() {
        let report = JobBatcher::default()
            .run(Vec::<Job<'_, ()>>::new())
            .await
            .unwrap();
        assert_eq!(report.total(), 0);
        assert_eq!(report.windows(), 0);
        assert_eq!(report.succeeded() + report.failed() + report.skipped(), 0);
    }

    #[tokio::test]
    async fn failures_do_not_stop_the_batch() {
        let jobs: Vec<Job<'_, u32>> = (1..=5)
            .map(|n| {
                Job::new(n.to_string(), format!("topic {n}"), move || async move {
                    if n == 1 || n == 3 {
                        Err(anyhow!("pipeline exited with status 1"))
                    } else {
                        Ok(n)
                    }
                })
            })
            .collect();

        let report = JobBatcher::new(2).run(jobs).await.unwrap();

        assert_eq!(report.failed(), 2);
        assert_eq!(report.succeeded(), 3);
        assert_eq!(report.windows(), 3);
        let summary: Vec<(String, bool)> = report
            .outcomes()
            .iter()
            .map(|o| (o.id.clone(), o.is_success()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("1".to_string(), false),
                ("2".to_string(), true),
                ("3".to_string(), false),
                ("4".to_string(), true),
                ("5".to_string(), true),
            ]
        );
        assert_eq!(
            report.outcomes()[0].error(),
            Some("pipeline exited with status 1")
        );
    }

    #[tokio::test]
    async fn skipped_jobs_are_reported_in_place() {
        let jobs: Vec<Job<'_, ()>> = vec![
            Job::new("a", "runs", || async { Ok(()) }),
            Job::skipped("b", "dry", "dry run"),
            Job::new("c", "runs", || async { Ok(()) }),
        ];
        let report = JobBatcher::new(2).run(jobs).await.unwrap();
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.skipped(), 1);
        assert!(report.outcomes()[1].is_skipped());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_job_times_out_as_failure() {
        let jobs: Vec<Job<'_, ()>> = vec![
            Job::new("slow", "slow", || async {
                sleep(Duration::from_secs(60)).await;
                Ok(())
            }),
            Job::new("fast", "fast", || async { Ok(()) }),
        ];
        let report = JobBatcher::new(2)
            .with_job_timeout(Duration::from_secs(5))
            .run(jobs)
            .await
            .unwrap();

        assert_eq!(report.failed(), 1);
        assert_eq!(report.outcomes()[0].error(), Some("timed out after 5000ms"));
        assert!(report.outcomes()[1].is_success());
    }

    #[tokio::test]
    async fn zero_concurrency_is_rejected() {
        let jobs: Vec<Job<'_, ()>> = vec![Job::new("a", "a", || async { Ok(()) })];
        let err = JobBatcher::new(0).run(jobs).await.unwrap_err();
        assert!(matches!(err, VideogenError::InvalidBatch(_)));
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected() {
        let jobs: Vec<Job<'_, ()>> = vec![
            Job::new("same", "first", || async { Ok(()) }),
            Job::new("same", "second", || async { Ok(()) }),
        ];
        let err = JobBatcher::new(2).run(jobs).await.unwrap_err();
        assert!(err.to_string().contains("duplicate job id 'same'"));
    }
}
