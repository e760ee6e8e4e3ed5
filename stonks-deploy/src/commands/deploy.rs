//! `stonks-deploy deploy`: wire the AWS-backed collaborators and run the rollout

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::RunContext;
use crate::aws::AwsCli;
use crate::orchestrator::{Collaborators, DeploymentRun, Orchestrator, OrchestratorSettings};
use crate::preflight::{BinarySpec, check_prerequisites};
use crate::probe::ReqwestGet;
use crate::prompt::TerminalPrompt;
use crate::provision::CloudFormation;
use crate::report::{DeploymentReport, print_report, write_report};
use crate::secrets::AwsSecretsManager;

/// Run the full deployment. Returns the process exit status.
pub async fn run_deploy(ctx: &RunContext, cancel: &CancellationToken) -> Result<u8> {
    let config = &ctx.config;
    println!("📈 stonks-deploy: single-node k8s on EC2");
    println!();

    println!("📋 Checking prerequisites...");
    let prereqs = check_prerequisites(&[BinarySpec::aws_cli(&ctx.aws_bin)]);
    if !prereqs.all_required_met {
        prereqs.print();
        anyhow::bail!("⚠️  Deployment aborted - required prerequisites missing");
    }

    let template = config
        .template_params()
        .context("Failed to prepare template parameters")?;
    let cli = AwsCli::new(config.stack.region.clone()).with_program(ctx.aws_bin.clone());
    info!(
        stack = %config.stack.name,
        region = %cli.region(),
        aws = %cli.program(),
        "starting deployment"
    );

    let collaborators = Collaborators {
        credentials: Arc::new(TerminalPrompt::default()),
        secrets: Arc::new(AwsSecretsManager::new(cli.clone())),
        templates: Arc::new(template),
        provisioning: Arc::new(CloudFormation::new(cli)),
        http: Arc::new(ReqwestGet::new()),
    };
    let settings = OrchestratorSettings::from_config(config);
    let orchestrator = Orchestrator::new(collaborators, settings.clone());

    let run = orchestrator.run(cancel).await;

    Ok(publish_report(&run, &settings, ctx.report.as_deref()))
}

/// Print the run summary and save it when asked. The run's status wins over
/// a report that could not be written.
fn publish_report(
    run: &DeploymentRun,
    settings: &OrchestratorSettings,
    path: Option<&Path>,
) -> u8 {
    let report = DeploymentReport::from_run(run, settings);
    println!();
    print_report(&report);

    if let Some(path) = path {
        match write_report(&report, path) {
            Ok(()) => {
                println!();
                println!("📄 Report written to: {}", path.display());
            }
            Err(e) => {
                warn!(path = %path.display(), error = %format!("{e:#}"), "report not written");
                eprintln!("⚠️  Failed to write deployment report: {e:#}");
            }
        }
    }

    run.outcome.exit_code()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeployConfig;
    use crate::orchestrator::{DeploymentOutcome, EXIT_CANCELLED, Step};

    fn cancelled_run() -> DeploymentRun {
        DeploymentRun {
            outcome: DeploymentOutcome::Cancelled {
                step: Step::Provision,
                deployment_id: Some("stack-1".to_string()),
            },
            stack_status: Some("CREATE_IN_PROGRESS".to_string()),
            probes: Vec::new(),
        }
    }

    #[test]
    fn test_unwritable_report_keeps_run_status() {
        let temp = tempfile::tempdir().unwrap();
        let blocker = temp.path().join("not-a-dir");
        std::fs::write(&blocker, "").unwrap();
        let settings = OrchestratorSettings::from_config(&DeployConfig::default());

        let code = publish_report(
            &cancelled_run(),
            &settings,
            Some(&blocker.join("report.toon")),
        );

        assert_eq!(code, EXIT_CANCELLED);
    }

    #[test]
    fn test_report_written_when_path_given() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("report.toon");
        let settings = OrchestratorSettings::from_config(&DeployConfig::default());

        let code = publish_report(&cancelled_run(), &settings, Some(&path));

        assert_eq!(code, EXIT_CANCELLED);
        assert!(std::fs::read_to_string(&path).unwrap().contains("stack-1"));
    }
}
