use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use videogen::batch::{self, BatchOptions};
use videogen::checkpoint::CheckpointStore;
use videogen::cli::{Cli, Command};
use videogen::command::ProcessRunner;
use videogen::config::VideogenConfig;
use videogen::firecrawl::FirecrawlClient;
use videogen::pipeline::{DEFAULT_URL, PipelineDriver, RunContext};
use videogen::ui;

const EXAMPLE_CONFIG: &str = include_str!("../videogen.example.toml");

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    // A missing .env is normal.
    let _ = dotenvy::dotenv();
    init_logging(cli.verbose);

    let mut config = VideogenConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Pipeline {
            url,
            backend,
            work_dir,
            dry_run,
        } => {
            if let Some(dir) = work_dir {
                config.paths.work_dir = dir;
            }
            let url = url.unwrap_or_else(|| DEFAULT_URL.to_string());

            let scraper = if config.scraper.enabled {
                let key = config.scraper_api_key()?.to_string();
                Some(FirecrawlClient::with_base_url(
                    key,
                    config.scraper.base_url.clone(),
                    config.scraper.timeout(),
                )?)
            } else {
                None
            };
            let runner = ProcessRunner::new(config.runner.command_timeout());
            let driver = PipelineDriver::new(&config, scraper.as_ref(), &runner);
            let mut ctx = RunContext::new(&config);

            let summary = driver.run(&mut ctx, &url, backend, dry_run).await?;
            ui::print_pipeline_summary(&summary);
        }

        Command::Batch {
            topics,
            parallel,
            sequential,
            dry_run,
            backend,
            strict,
        } => {
            let topics = batch::load_topics(topics.as_deref())?;
            let options = BatchOptions {
                program: std::env::current_exe().context("locating the videogen executable")?,
                config_path: cli.config.clone(),
                backend,
                concurrency: Command::batch_concurrency(sequential, parallel, config.runner.concurrency),
                dry_run,
            };
            let runner = ProcessRunner::new(config.runner.command_timeout());

            let progress = ui::BatchProgress::new(topics.len());
            let report = batch::run_batch(&config, &runner, &topics, &options, Some(&progress)).await;
            progress.finish();
            let report = report?;

            ui::print_batch_report(&report);
            let path = batch::save_report(&report, &options, &config.paths.logs_dir)?;
            info!(path = %path.display(), "results written");

            if strict && report.has_failures() {
                bail!("{} of {} topics failed", report.failed(), report.total());
            }
        }

        Command::Checkpoints { stage } => {
            let store = CheckpointStore::new(&config.paths.checkpoint_dir);
            let checkpoints = match stage {
                Some(stage) => store.history(&stage)?,
                None => store.list()?,
            };
            ui::print_checkpoints(&checkpoints);
        }

        Command::Example => print!("{EXAMPLE_CONFIG}"),
    }

    Ok(())
}
