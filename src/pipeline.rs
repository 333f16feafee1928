//! Single-article pipeline: scrape one URL, then run the configured stages in
//! order. Each step is retried on its own, checkpointed on success and on
//! final failure, and the first step that gives up aborts the run.
//!
//! Two directories matter to a run. Stages execute in `paths.stage_dir`,
//! where their scripts live, and learn where to read and write through
//! `{work_dir}`. Both are made absolute before anything is substituted, so a
//! relative `--work-dir` means the same thing to the driver, to the artifact
//! checks and to every child process.

use std::cell::Cell;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::json;
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use crate::checkpoint::CheckpointStore;
use crate::command::{CommandRunner, CommandSpec};
use crate::config::{Backend, StageSpec, VideogenConfig};
use crate::cost::{CostSummary, CostTracker};
use crate::error::VideogenError;
use crate::firecrawl::{DatasetRecord, Scraper};
use crate::runner::{RetryError, RetryPolicy};

/// Article used when `videogen pipeline` is run without a URL.
pub const DEFAULT_URL: &str =
    "https://www.nathanonn.com/claude-code-vs-codex-why-i-use-both-and-you-should-too/";

/// Scrape output, relative to the work directory.
pub const DATASET_FILE: &str = "dataset.jsonl";

const SCRAPE_STAGE: &str = "scrape";

/// State owned by one pipeline run.
#[derive(Debug)]
pub struct RunContext {
    pub run_id: String,
    pub checkpoints: CheckpointStore,
    pub costs: CostTracker,
}

impl RunContext {
    pub fn new(config: &VideogenConfig) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            checkpoints: CheckpointStore::new(&config.paths.checkpoint_dir),
            costs: CostTracker::new(config.budget.ceiling_usd),
        }
    }
}

/// What one completed step did.
#[derive(Debug, Clone, Serialize)]
pub struct StageRecord {
    pub name: String,
    pub attempts: u32,
    pub elapsed_ms: u64,
    pub artifacts: Vec<PathBuf>,
    pub checkpoint: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineSummary {
    pub run_id: String,
    pub url: String,
    pub backend: Backend,
    pub dry_run: bool,
    /// Steps selected for this run, in execution order.
    pub planned: Vec<String>,
    /// Steps that completed. Empty for a dry run.
    pub stages: Vec<StageRecord>,
    pub elapsed_ms: u64,
    pub costs: CostSummary,
}

/// Runs one article through the scrape and every stage selected for a
/// backend. Collaborators are borrowed so tests can inspect them afterwards.
pub struct PipelineDriver<'c, S, R> {
    config: &'c VideogenConfig,
    scraper: Option<&'c S>,
    runner: &'c R,
    policy: RetryPolicy,
    work_dir: PathBuf,
    stage_dir: PathBuf,
}

impl<'c, S: Scraper, R: CommandRunner> PipelineDriver<'c, S, R> {
    /// A driver without a scraper skips the built-in scrape step.
    pub fn new(config: &'c VideogenConfig, scraper: Option<&'c S>, runner: &'c R) -> Self {
        Self {
            config,
            scraper,
            runner,
            policy: config.runner.retry_policy(),
            work_dir: config.paths.resolved_work_dir(),
            stage_dir: config.paths.resolved_stage_dir(),
        }
    }

    /// Run every step for `url`. Credentials are checked before anything
    /// is scraped, executed or written.
    pub async fn run(
        &self,
        ctx: &mut RunContext,
        url: &str,
        backend: Backend,
        dry_run: bool,
    ) -> Result<PipelineSummary> {
        let started = Instant::now();
        let plan = self.plan(url, backend, &ctx.run_id)?;

        let mut planned: Vec<String> = Vec::new();
        if self.scraper.is_some() {
            planned.push(SCRAPE_STAGE.to_string());
        }
        planned.extend(plan.iter().map(|(stage, _)| stage.name.clone()));

        info!(
            run_id = %ctx.run_id,
            url,
            %backend,
            steps = planned.len(),
            dry_run,
            "pipeline starting"
        );

        let mut records = Vec::new();
        if dry_run {
            if self.scraper.is_some() {
                info!(url, "[dry run] would scrape article");
            }
            for (stage, command) in &plan {
                info!(stage = %stage.name, %command, "[dry run] would run");
            }
        } else {
            let work_dir = &self.work_dir;
            fs::create_dir_all(work_dir)
                .with_context(|| format!("creating work dir {}", work_dir.display()))?;

            if let Some(scraper) = self.scraper {
                records.push(self.scrape(ctx, scraper, url).await?);
            }
            for (stage, command) in &plan {
                records.push(self.run_stage(ctx, stage, command, url).await?);
            }
        }

        let summary = PipelineSummary {
            run_id: ctx.run_id.clone(),
            url: url.to_string(),
            backend,
            dry_run,
            planned,
            stages: records,
            elapsed_ms: started.elapsed().as_millis() as u64,
            costs: ctx.costs.summary(),
        };
        if !dry_run {
            ctx.checkpoints.save("summary", &summary);
        }
        info!(
            run_id = %summary.run_id,
            elapsed_ms = summary.elapsed_ms,
            total_usd = %format!("{:.2}", summary.costs.total_usd),
            "pipeline complete"
        );
        Ok(summary)
    }

    /// Stages selected for `backend` with their commands. Fails if any of
    /// them needs an environment variable that is not set.
    fn plan(
        &self,
        url: &str,
        backend: Backend,
        run_id: &str,
    ) -> Result<Vec<(&'c StageSpec, CommandSpec)>, VideogenError> {
        let stages: Vec<&'c StageSpec> = self
            .config
            .stages
            .iter()
            .filter(|stage| stage.runs_for(backend))
            .collect();

        let mut missing: Vec<&str> = Vec::new();
        for stage in &stages {
            for var in &stage.requires_env {
                let unset = std::env::var_os(var).is_none_or(|v| v.is_empty());
                if unset && !missing.contains(&var.as_str()) {
                    missing.push(var);
                }
            }
        }
        if !missing.is_empty() {
            return Err(VideogenError::MissingCredential(missing.join(", ")));
        }

        Ok(stages
            .into_iter()
            .map(|stage| (stage, self.command_for(stage, url, backend, run_id)))
            .collect())
    }

    fn command_for(&self, stage: &StageSpec, url: &str, backend: Backend, run_id: &str) -> CommandSpec {
        let work_dir = self.work_dir.to_string_lossy();
        let backend = backend.to_string();
        let args = stage.args.iter().map(|arg| {
            arg.replace("{url}", url)
                .replace("{work_dir}", &work_dir)
                .replace("{backend}", &backend)
                .replace("{run_id}", run_id)
        });

        let mut command = CommandSpec::new(&stage.program)
            .args(args)
            .current_dir(&self.stage_dir);
        if let Some(secs) = stage.timeout_secs {
            command = command.timeout(Duration::from_secs(secs));
        }
        command
    }

    async fn scrape(&self, ctx: &mut RunContext, scraper: &S, url: &str) -> Result<StageRecord> {
        let started = Instant::now();
        let attempts = Cell::new(0u32);
        let result = self
            .policy
            .run(SCRAPE_STAGE, || {
                attempts.set(attempts.get() + 1);
                scraper.scrape(url)
            })
            .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let article = match result {
            Ok(article) => article,
            Err(err) => {
                save_failure(ctx, SCRAPE_STAGE, url, &err);
                return Err(err.into());
            }
        };

        let dataset = self.work_dir.join(DATASET_FILE);
        let mut line = serde_json::to_string(&DatasetRecord::from_article(&article))?;
        line.push('\n');
        fs::write(&dataset, line).with_context(|| format!("writing {}", dataset.display()))?;
        info!(
            url,
            title = %article.title,
            chars = article.markdown.len(),
            "article scraped"
        );

        let price = self.config.scraper.cost_per_page_usd;
        if price != 0.0 {
            ctx.costs
                .add_call("firecrawl", "scrape", price, json!({ "url": url }))?;
        }

        let checkpoint = ctx.checkpoints.save(
            SCRAPE_STAGE,
            &json!({
                "run_id": ctx.run_id,
                "url": url,
                "title": article.title,
                "chars": article.markdown.len(),
                "attempts": attempts.get(),
                "elapsed_ms": elapsed_ms,
                "artifacts": [&dataset],
            }),
        );

        Ok(StageRecord {
            name: SCRAPE_STAGE.to_string(),
            attempts: attempts.get(),
            elapsed_ms,
            artifacts: vec![dataset],
            checkpoint,
        })
    }

    async fn run_stage(
        &self,
        ctx: &mut RunContext,
        stage: &StageSpec,
        command: &CommandSpec,
        url: &str,
    ) -> Result<StageRecord> {
        info!(stage = %stage.name, %command, "stage starting");
        let started = Instant::now();
        let attempts = Cell::new(0u32);
        let runner = self.runner;
        let result = self
            .policy
            .run(&stage.name, || {
                attempts.set(attempts.get() + 1);
                async move {
                    runner
                        .run(command)
                        .await
                        .and_then(|output| output.check(command))
                }
            })
            .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let output = match result {
            Ok(output) => output,
            Err(err) => {
                save_failure(ctx, &stage.name, url, &err);
                return Err(err.into());
            }
        };
        if !output.stdout.is_empty() {
            debug!(stage = %stage.name, stdout = %output.stdout.trim_end(), "stage output");
        }

        let artifacts: Vec<PathBuf> = stage
            .produces
            .iter()
            .map(|path| self.work_dir.join(path))
            .collect();
        if let Some(missing) = artifacts.iter().find(|path| !path.exists()) {
            let err = VideogenError::MissingArtifact {
                stage: stage.name.clone(),
                path: missing.clone(),
            };
            ctx.checkpoints.save(
                &format!("{}-failed", stage.name),
                &json!({
                    "run_id": ctx.run_id,
                    "url": url,
                    "attempts": attempts.get(),
                    "error": err.to_string(),
                }),
            );
            return Err(err.into());
        }

        if let Some(cost) = &stage.cost {
            ctx.costs.add_call(
                &cost.service,
                &cost.operation,
                cost.amount_usd,
                cost.metadata.clone(),
            )?;
        }

        let checkpoint = ctx.checkpoints.save(
            &stage.name,
            &json!({
                "run_id": ctx.run_id,
                "url": url,
                "program": command.program,
                "args": command.args,
                "exit_code": output.exit_code,
                "attempts": attempts.get(),
                "elapsed_ms": elapsed_ms,
                "artifacts": artifacts,
            }),
        );
        info!(stage = %stage.name, attempts = attempts.get(), elapsed_ms, "stage complete");

        Ok(StageRecord {
            name: stage.name.clone(),
            attempts: attempts.get(),
            elapsed_ms,
            artifacts,
            checkpoint,
        })
    }
}

fn save_failure(ctx: &RunContext, stage: &str, url: &str, err: &RetryError) {
    ctx.checkpoints.save(
        &format!("{stage}-failed"),
        &json!({
            "run_id": ctx.run_id,
            "url": url,
            "attempts": err.attempts,
            "error": format!("{:#}", err.last_error),
        }),
    );
}
