use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use stonks_deploy::DeployConfig;
use stonks_deploy::commands::{Commands, Overrides, RunContext, handle_command};

#[derive(Parser)]
#[command(name = "stonks-deploy")]
#[command(about = "Deploy the stonks application onto a single-node k8s cluster on EC2")]
#[command(version)]
struct Cli {
    /// Config file (default: ./stonks-deploy.toml when present)
    #[arg(short, long, global = true, env = "STONKS_DEPLOY_CONFIG")]
    config: Option<PathBuf>,

    /// Write a Toon report of the run to this path
    #[arg(long, global = true)]
    report: Option<PathBuf>,

    /// aws executable to drive
    #[arg(long, global = true, env = "STONKS_AWS_BIN", default_value = "aws")]
    aws_bin: String,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Option<Commands>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("stonks_deploy={default_level}"))),
        )
        .with_writer(std::io::stderr)
        .init();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };
    let code = runtime.block_on(run(cli));
    // A prompt abandoned by Ctrl-C is still blocked on stdin; don't wait for it.
    runtime.shutdown_background();
    code
}

async fn run(cli: Cli) -> ExitCode {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            eprintln!("⏹️  Interrupted, stopping after the current step...");
            trigger.cancel();
        }
    });

    let mut config = match DeployConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::FAILURE;
        }
    };
    cli.overrides.apply(&mut config);

    let ctx = RunContext {
        config,
        aws_bin: cli.aws_bin,
        report: cli.report,
    };

    match handle_command(cli.command.unwrap_or(Commands::Deploy), ctx, &cancel).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
