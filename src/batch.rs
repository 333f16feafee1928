//! Batch mode: one pipeline subprocess per topic, run in windows.
//!
//! Every topic is a `videogen pipeline` child with its own absolute work
//! directory, `<paths.work_dir>/<topic id>`. Topic ids therefore double as
//! directory names and are checked before any job is built. Child output is
//! captured rather than shared with the progress bar; a failed topic keeps
//! the tail of its stderr in the report.

use std::cell::Cell;
use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::command::{CommandRunner, CommandSpec};
use crate::config::{Backend, VideogenConfig};
use crate::error::VideogenError;
use crate::runner::{BatchReport, Job, JobBatcher, RetryPolicy};
use crate::ui::BatchProgress;

/// An article to turn into a video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    pub id: String,
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Target length, e.g. `"4-5 min"`.
    #[serde(default)]
    pub duration: Option<String>,
}

impl Topic {
    fn new(id: &str, title: &str, url: &str, tags: &[&str], duration: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            url: url.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            duration: Some(duration.to_string()),
        }
    }
}

/// Topics used when no topics file is given.
pub fn default_topics() -> Vec<Topic> {
    vec![
        Topic::new(
            "claude-vs-chatgpt",
            "Claude vs ChatGPT: Which AI Should You Use?",
            "https://zapier.com/blog/claude-vs-chatgpt/",
            &["AI", "Claude", "ChatGPT", "Comparison"],
            "4-5 min",
        ),
        Topic::new(
            "claude-vs-gemini",
            "Claude vs Google Gemini: The AI Showdown",
            "https://www.analyticsvidhya.com/blog/2024/claude-vs-gemini/",
            &["AI", "Claude", "Gemini", "Google"],
            "4-5 min",
        ),
        Topic::new(
            "claude-coding-guide",
            "Claude for Coding: The Developer's AI Sidekick",
            "https://www.descope.com/blog/post/claude-vs-chatgpt",
            &["AI", "Claude", "Coding", "Developers"],
            "5-6 min",
        ),
        Topic::new(
            "free-ai-tools",
            "Free AI Tools That Beat Paid Plans in 2024",
            "https://www.appypieautomate.ai/blog/free-ai-tools-that-work-better-than-paid",
            &["AI", "Free", "Tools", "Budget"],
            "5-6 min",
        ),
        Topic::new(
            "chatgpt-beginners",
            "ChatGPT for Beginners: A Complete Guide",
            "https://zapier.com/blog/how-to-use-chatgpt/",
            &["ChatGPT", "Tutorial", "Beginners", "Guide"],
            "6-7 min",
        ),
    ]
}

/// Read topics from a JSON array, or fall back to [`default_topics`].
pub fn load_topics(path: Option<&Path>) -> Result<Vec<Topic>, VideogenError> {
    let Some(path) = path else {
        info!("using default topics");
        return Ok(default_topics());
    };
    if !path.exists() {
        return Err(VideogenError::MissingInput(path.to_path_buf()));
    }
    let contents = fs::read_to_string(path)?;
    let topics: Vec<Topic> = serde_json::from_str(&contents)?;
    validate_topics(&topics)?;
    info!(path = %path.display(), count = topics.len(), "loaded topics");
    Ok(topics)
}

/// Ids become directory names under the work dir, so each one must be a
/// single plain path component.
pub fn validate_topics(topics: &[Topic]) -> Result<(), VideogenError> {
    for topic in topics {
        let mut components = Path::new(&topic.id).components();
        let plain = matches!(components.next(), Some(Component::Normal(_)))
            && components.next().is_none()
            && !topic.id.contains(['/', '\\']);
        if !plain {
            return Err(VideogenError::InvalidBatch(format!(
                "topic id '{}' must be a plain name without path separators or '..'",
                topic.id
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Executable re-invoked as `<program> pipeline <url>` for each topic.
    pub program: PathBuf,
    /// Forwarded to each pipeline as `--config`.
    pub config_path: Option<PathBuf>,
    pub backend: Backend,
    pub concurrency: usize,
    pub dry_run: bool,
}

/// Success value of one topic's job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicRun {
    pub url: String,
    pub work_dir: PathBuf,
    pub attempts: u32,
}

/// Each topic gets its own work directory so concurrent pipelines never
/// write the same artifacts. Always absolute.
pub fn topic_work_dir(config: &VideogenConfig, topic: &Topic) -> PathBuf {
    config.paths.resolved_work_dir().join(&topic.id)
}

pub fn pipeline_command(config: &VideogenConfig, options: &BatchOptions, topic: &Topic) -> CommandSpec {
    let mut command = CommandSpec::new(options.program.to_string_lossy());
    if let Some(path) = &options.config_path {
        command = command.arg("--config").arg(path.to_string_lossy());
    }
    command
        .arg("pipeline")
        .arg(&topic.url)
        .arg("--backend")
        .arg(options.backend.to_string())
        .arg("--work-dir")
        .arg(topic_work_dir(config, topic).to_string_lossy())
}

/// Run one pipeline per topic. Failed topics are reported, not raised; the
/// only error is a malformed batch (an unusable or duplicate topic id).
pub async fn run_batch<R: CommandRunner>(
    config: &VideogenConfig,
    runner: &R,
    topics: &[Topic],
    options: &BatchOptions,
    progress: Option<&BatchProgress>,
) -> Result<BatchReport<TopicRun>> {
    validate_topics(topics)?;
    let policy = RetryPolicy::new(config.batch.max_attempts, config.runner.base_delay_ms);
    info!(
        topics = topics.len(),
        concurrency = options.concurrency,
        backend = %options.backend,
        dry_run = options.dry_run,
        "batch starting"
    );

    let jobs: Vec<Job<'_, TopicRun>> = topics
        .iter()
        .map(|topic| {
            let command = pipeline_command(config, options, topic);
            if options.dry_run {
                return Job::skipped(
                    &topic.id,
                    &topic.title,
                    format!("dry run: would execute {command}"),
                );
            }
            Job::new(&topic.id, &topic.title, move || async move {
                let attempts = Cell::new(0u32);
                let result = policy
                    .run(&topic.id, || {
                        attempts.set(attempts.get() + 1);
                        let command = &command;
                        async move {
                            runner
                                .run(command)
                                .await
                                .and_then(|output| output.check(command))
                        }
                    })
                    .await;
                if let Some(progress) = progress {
                    progress.finished(&topic.title, result.is_ok());
                }
                let output = result?;
                if !output.stderr.is_empty() {
                    debug!(topic = %topic.id, log = %output.stderr.trim_end(), "pipeline log");
                }
                Ok(TopicRun {
                    url: topic.url.clone(),
                    work_dir: topic_work_dir(config, topic),
                    attempts: attempts.get(),
                })
            })
        })
        .collect();

    let mut batcher = JobBatcher::new(options.concurrency);
    if let Some(limit) = config.runner.job_timeout() {
        batcher = batcher.with_job_timeout(limit);
    }
    Ok(batcher.run(jobs).await?)
}

#[derive(Serialize)]
struct ResultsFile<'r> {
    generated_at: DateTime<Utc>,
    backend: Backend,
    concurrency: usize,
    dry_run: bool,
    #[serde(flatten)]
    report: &'r BatchReport<TopicRun>,
}

/// `<logs_dir>/batch-results-<date>.json`
pub fn results_path(logs_dir: &Path, date: NaiveDate) -> PathBuf {
    logs_dir.join(format!("batch-results-{}.json", date.format("%Y-%m-%d")))
}

/// Write the report to today's results file. A rerun on the same day
/// replaces it.
pub fn save_report(
    report: &BatchReport<TopicRun>,
    options: &BatchOptions,
    logs_dir: &Path,
) -> Result<PathBuf> {
    let now = Utc::now();
    fs::create_dir_all(logs_dir)
        .with_context(|| format!("creating logs dir {}", logs_dir.display()))?;
    let path = results_path(logs_dir, now.date_naive());
    let file = ResultsFile {
        generated_at: now,
        backend: options.backend,
        concurrency: options.concurrency,
        dry_run: options.dry_run,
        report,
    };
    fs::write(&path, serde_json::to_vec_pretty(&file)?)
        .with_context(|| format!("writing {}", path.display()))?;
    info!(path = %path.display(), "batch results saved");
    Ok(path)
}
