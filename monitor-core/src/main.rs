use anyhow::Context;
use clap::{Parser, Subcommand};
use monitor_core::{
    Config, logging,
    monitor::{CheckEngine, Monitor, MonitorRegistry},
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "monitor-core", version, about = "Validate and run monitor definitions")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Decode and validate a monitor definition.
    Validate { file: PathBuf },
    /// Run a monitor once and print the response as JSON.
    Check { file: PathBuf },
}

fn load(path: &Path) -> anyhow::Result<Monitor> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let monitor = MonitorRegistry::builtin()
        .decode(&bytes)
        .with_context(|| format!("decoding {}", path.display()))?;
    monitor
        .validate()
        .with_context(|| format!("validating monitor {}", monitor.id))?;
    Ok(monitor)
}

async fn run(cli: Cli) -> anyhow::Result<bool> {
    match cli.command {
        Command::Validate { file } => {
            let monitor = load(&file)?;
            println!("{}", serde_json::to_string_pretty(&monitor)?);
            Ok(true)
        }
        Command::Check { file } => {
            let monitor = load(&file)?;
            let config = Config::from_env().context("loading configuration")?;
            let engine = CheckEngine::from_config(&config.checks)?;

            info!(monitor_id = %monitor.id, kind = %monitor.kind(), "running check");
            let response = engine.run(&monitor).await;
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(response.is_success())
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init_logging();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
