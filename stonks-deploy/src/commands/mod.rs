//! Subcommands for stonks-deploy

pub mod deploy;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use tokio_util::sync::CancellationToken;

use crate::config::DeployConfig;
use crate::preflight::{BinarySpec, check_prerequisites};
use crate::template::render_template_body;

#[derive(Debug, Subcommand, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Store the API key, launch the stack and wait for stonks to answer (default)
    #[clap(alias = "up")]
    Deploy,

    /// Print the rendered CloudFormation template
    Template,

    /// Check prerequisites only
    Check,
}

/// Per-run overrides of the config file
#[derive(Debug, Args, Clone, Default)]
pub struct Overrides {
    /// Stack name (overrides stack.name)
    #[arg(long, global = true, env = "STONKS_STACK_NAME")]
    pub stack_name: Option<String>,

    /// AWS region (overrides stack.region)
    #[arg(long, global = true)]
    pub region: Option<String>,

    /// Health check attempts (overrides probe.max_attempts)
    #[arg(long, global = true)]
    pub max_attempts: Option<u32>,

    /// Seconds between health checks (overrides probe.interval_secs)
    #[arg(long, global = true)]
    pub probe_interval: Option<u64>,
}

impl Overrides {
    pub fn apply(&self, config: &mut DeployConfig) {
        if let Some(name) = &self.stack_name {
            config.stack.name.clone_from(name);
        }
        if let Some(region) = &self.region {
            config.stack.region.clone_from(region);
        }
        if let Some(attempts) = self.max_attempts {
            config.probe.max_attempts = attempts;
        }
        if let Some(interval) = self.probe_interval {
            config.probe.interval_secs = interval;
        }
    }
}

/// Options shared by every subcommand
#[derive(Debug, Clone)]
pub struct RunContext {
    pub config: DeployConfig,
    pub aws_bin: String,
    pub report: Option<PathBuf>,
}

/// Dispatch a subcommand. Returns the process exit status.
pub async fn handle_command(
    cmd: Commands,
    ctx: RunContext,
    cancel: &CancellationToken,
) -> Result<u8> {
    ctx.config.validate().context("Invalid configuration")?;
    match cmd {
        Commands::Deploy => deploy::run_deploy(&ctx, cancel).await,
        Commands::Template => print_template(&ctx.config),
        Commands::Check => Ok(check_only(&ctx.aws_bin)),
    }
}

fn print_template(config: &DeployConfig) -> Result<u8> {
    let params = config.template_params()?;
    let body = render_template_body(&params).context("Failed to render template")?;
    println!("{body}");
    Ok(0)
}

fn check_only(aws_bin: &str) -> u8 {
    println!("📋 Checking prerequisites...");
    let result = check_prerequisites(&[BinarySpec::aws_cli(aws_bin)]);
    result.print();

    if result.all_required_met {
        println!("✅ All required prerequisites met!");
        0
    } else {
        println!("⚠️  Some required prerequisites are missing");
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_replace_only_given_values() {
        let mut config = DeployConfig::default();
        let overrides = Overrides {
            stack_name: Some("stonks-canary".to_string()),
            max_attempts: Some(3),
            ..Overrides::default()
        };

        overrides.apply(&mut config);

        assert_eq!(config.stack.name, "stonks-canary");
        assert_eq!(config.stack.region, "us-east-1");
        assert_eq!(config.probe.max_attempts, 3);
        assert_eq!(config.probe.interval_secs, 30);
    }

    #[test]
    fn test_missing_aws_cli_fails_check() {
        assert_eq!(check_only("stonks-deploy-no-such-aws"), 1);
    }
}
