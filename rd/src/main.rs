//! researchdaemon CLI entry point

use std::sync::Arc;

use clap::Parser;
use eyre::{Context, Result};
use tracing::{info, warn};

use researchdaemon::cli::{Cli, Command, Mode};
use researchdaemon::config::Config;
use researchdaemon::engine::Manager;
use researchdaemon::events::{read_run_events, replay};
use researchdaemon::integrations::IntegrationRegistry;
use researchdaemon::llm::AnthropicClient;

fn setup_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let mut config = Config::load(cli.config.as_ref()).context("failed to load configuration")?;

    match cli.command {
        Command::Run {
            question,
            output,
            mode,
        } => {
            if let Some(mode) = mode {
                apply_mode(&mut config, mode);
            }

            let client = Arc::new(
                AnthropicClient::from_config(&config.llm)
                    .context("failed to construct LLM client")?,
            );

            // Concrete source adapters are plug-ins; a bare binary runs the
            // orchestration loop against whatever was registered.
            let registry = IntegrationRegistry::new(config.integrations.clone());
            if registry.is_empty() {
                warn!("no source integrations registered; results will be empty");
            }

            let manager = Manager::new(&question, config, &output, client, registry)
                .context("failed to initialize run")?;
            let summary = manager.run().await.context("run failed")?;

            info!(run_id = %summary.run_id, "run finished");
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }

        Command::Replay { run_dir } => {
            let log_path = if run_dir.is_dir() {
                run_dir.join("execution_log.jsonl")
            } else {
                run_dir
            };
            let events = read_run_events(&log_path)
                .with_context(|| format!("failed to read {}", log_path.display()))?;
            let counts = replay(&events);
            println!("{}", serde_json::to_string_pretty(&counts)?);
        }

        Command::ListSources => {
            let registry = IntegrationRegistry::new(config.integrations.clone());
            if registry.is_empty() {
                println!("no sources registered");
            }
            for meta in registry.metas() {
                println!(
                    "{} ({}) category={} api_key={}",
                    meta.id,
                    meta.display_name,
                    meta.category,
                    if meta.requires_api_key { "required" } else { "no" }
                );
            }
        }
    }

    Ok(())
}

fn apply_mode(config: &mut Config, mode: Mode) {
    let preset = match mode {
        Mode::Budget => Config::budget_mode(),
        Mode::Expert => Config::expert_mode(),
    };
    config.run.max_tasks = preset.run.max_tasks;
    config.run.max_time_minutes = preset.run.max_time_minutes;
    config.manager.allow_saturation_stop = preset.manager.allow_saturation_stop;
}
