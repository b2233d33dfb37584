//! # runwatch
//!
//! CI failure watcher binary. Loads settings, starts the agent runtime,
//! runs one monitoring session and exits with a status reflecting whether
//! the required notification went out.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use runwatch_core::AgentClient;
use runwatch_engine::{
    create_default_registry, AuditLogSink, OrchestratorConfig, RunSummary, SessionOrchestrator,
    TaskPrompt,
};
use runwatch_runtime::{StdioAgentClient, StdioConfig};
use runwatch_settings::{RunwatchSettings, RuntimeSettings};
use runwatch_telemetry::{init_telemetry, TelemetryConfig};

/// Watch GitHub Actions runs and notify committers of failures.
#[derive(Parser, Debug)]
#[command(name = "runwatch", version, about)]
struct Cli {
    /// Settings file (defaults to `~/.runwatch/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one monitoring session (the default).
    Run(RunArgs),
    /// Print the task prompt that would be sent.
    Prompt,
    /// Print the tool definitions exposed to the agent.
    Tools,
}

#[derive(clap::Args, Debug, Default)]
struct RunArgs {
    /// Repository to watch, `owner/name`. Repeatable; replaces the configured list.
    #[arg(long = "repo")]
    repos: Vec<String>,

    /// Model to request from the runtime.
    #[arg(long)]
    model: Option<String>,

    /// Seconds to wait for the agent to finish.
    #[arg(long)]
    deadline_secs: Option<u64>,

    /// Print the run report as JSON instead of a one-line summary.
    #[arg(long)]
    json: bool,
}

impl RunArgs {
    fn apply(&self, settings: &mut RunwatchSettings) {
        if !self.repos.is_empty() {
            settings.monitor.repositories = self.repos.clone();
        }
        if let Some(ref model) = self.model {
            settings.agent.model = Some(model.clone());
        }
        if let Some(secs) = self.deadline_secs {
            settings.agent.deadline_secs = secs;
        }
    }
}

fn stdio_config(runtime: &RuntimeSettings) -> StdioConfig {
    StdioConfig {
        command: runtime.command.clone(),
        args: runtime.args.clone(),
        github_token: runtime.github_token.clone(),
        request_timeout: Duration::from_millis(runtime.request_timeout_ms),
        stop_grace: Duration::from_millis(runtime.stop_grace_ms),
    }
}

fn load(path: Option<&PathBuf>) -> Result<RunwatchSettings> {
    match path {
        Some(path) => runwatch_settings::load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings from {}", path.display())),
        None => runwatch_settings::load_settings().context("Failed to load settings"),
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Run(RunArgs::default()));

    let mut settings = load(cli.settings.as_ref())?;
    if let Command::Run(ref args) = command {
        args.apply(&mut settings);
    }
    runwatch_settings::validate(&settings).context("Invalid settings")?;

    let telemetry = settings.logging.module_levels.iter().try_fold(
        TelemetryConfig::from_level_str(&settings.logging.level, settings.logging.json)?,
        |config, (module, level)| config.with_module_level(module, level),
    )?;
    init_telemetry(&telemetry)?;

    let registry = Arc::new(create_default_registry(
        Arc::new(AuditLogSink),
        &settings.notification,
    ));
    let prompt = TaskPrompt::from_settings(&settings).render();

    let args = match command {
        Command::Prompt => {
            println!("{prompt}");
            return Ok(ExitCode::SUCCESS);
        }
        Command::Tools => {
            println!("{}", serde_json::to_string_pretty(&registry.definitions())?);
            return Ok(ExitCode::SUCCESS);
        }
        Command::Run(args) => args,
    };

    tracing::info!(
        repositories = ?settings.monitor.repositories,
        model = settings.agent.model.as_deref().unwrap_or("default"),
        deadline_secs = settings.agent.deadline_secs,
        "starting run"
    );

    let client: Arc<dyn AgentClient> =
        Arc::new(StdioAgentClient::new(stdio_config(&settings.runtime)));
    let orchestrator = SessionOrchestrator::new(
        client,
        registry,
        OrchestratorConfig::from_settings(&settings),
    );

    let summary = match orchestrator.run(&prompt).await {
        Ok(report) => {
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report.summary());
            }
            report.summary()
        }
        Err(e) => {
            let summary = RunSummary::from_error(&e);
            eprintln!("{summary}");
            summary
        }
    };
    Ok(ExitCode::from(summary.exit_code()))
}
