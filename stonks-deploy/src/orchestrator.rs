//! Deployment orchestrator - runs the stonks rollout end to end
//!
//! Strict order: credential, secret, template, submit + wait, outputs, probe.
//! The first failure ends the run. Nothing is rolled back: a half-built stack
//! stays in place so an operator can inspect it, and its id is reported.

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::DeployConfig;
use crate::error::{
    CredentialError, OutputError, ProbeFailure, ProvisioningError, SecretError, SubmissionError,
};
use crate::probe::{HealthProber, HttpGet, ProbeOutcome, ProbePolicy, contains_marker};
use crate::prompt::CredentialSource;
use crate::provision::{
    ProvisioningBackend, ProvisioningClient, ServiceEndpoints, StackRequest, WaitPolicy,
};
use crate::secrets::{SecretStore, SecretValue, store_secret};
use crate::template::TemplateProvider;

/// Exit status for a run interrupted by the operator.
pub const EXIT_CANCELLED: u8 = 130;

/// Immutable input of one deployment
#[derive(Debug, Clone)]
pub struct DeploymentRequest {
    pub secret_name: String,
    pub secret_description: String,
    pub secret_value: SecretValue,
    pub stack_name: String,
    pub region: String,
    pub capabilities: Vec<String>,
}

/// Static settings the orchestrator runs with
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub secret_name: String,
    pub secret_description: String,
    pub stack_name: String,
    pub region: String,
    pub capabilities: Vec<String>,
    pub wait: WaitPolicy,
    pub probe: ProbePolicy,
    pub marker: String,
}

impl OrchestratorSettings {
    pub fn from_config(config: &DeployConfig) -> Self {
        Self {
            secret_name: config.secret.name.clone(),
            secret_description: config.secret.description.clone(),
            stack_name: config.stack.name.clone(),
            region: config.stack.region.clone(),
            capabilities: config.stack.capabilities.clone(),
            wait: config.wait_policy(),
            probe: config.probe_policy(),
            marker: config.probe.marker.clone(),
        }
    }
}

/// External services the orchestrator drives
#[derive(Clone)]
pub struct Collaborators {
    pub credentials: Arc<dyn CredentialSource>,
    pub secrets: Arc<dyn SecretStore>,
    pub templates: Arc<dyn TemplateProvider>,
    pub provisioning: Arc<dyn ProvisioningBackend>,
    pub http: Arc<dyn HttpGet>,
}

/// Step of the rollout, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Credential,
    Secret,
    Template,
    Provision,
    Outputs,
    Probe,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Credential => "credential",
            Self::Secret => "secret",
            Self::Template => "template",
            Self::Provision => "provision",
            Self::Outputs => "outputs",
            Self::Probe => "probe",
        };
        f.write_str(name)
    }
}

/// Proximate cause of a failed deployment
#[derive(Debug)]
pub enum FailureReason {
    Credential(CredentialError),
    Secret(SecretError),
    /// The template could not be produced; nothing was submitted
    Template(SubmissionError),
    Submission(SubmissionError),
    Provisioning(ProvisioningError),
    Output(OutputError),
    Probe(ProbeFailure),
}

impl FailureReason {
    pub fn step(&self) -> Step {
        match self {
            Self::Credential(_) => Step::Credential,
            Self::Secret(_) => Step::Secret,
            Self::Template(_) => Step::Template,
            Self::Submission(_) => Step::Provision,
            Self::Provisioning(_) => Step::Provision,
            Self::Output(_) => Step::Outputs,
            Self::Probe(_) => Step::Probe,
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Credential(e) => write!(f, "{e}"),
            Self::Secret(e) => write!(f, "{e}"),
            Self::Template(e) => write!(f, "{e}"),
            Self::Submission(e) => write!(f, "{e}"),
            Self::Provisioning(e) => write!(f, "{e}"),
            Self::Output(e) => write!(f, "{e}"),
            Self::Probe(e) => write!(f, "{e}"),
        }
    }
}

/// Terminal result of a deployment
#[derive(Debug)]
pub enum DeploymentOutcome {
    Success {
        service_url: String,
        cluster_instance_id: String,
        deployment_id: String,
        attempt: u32,
    },
    Failure {
        reason: FailureReason,
        /// Stack to inspect, once one exists
        deployment_id: Option<String>,
    },
    Cancelled {
        step: Step,
        deployment_id: Option<String>,
    },
}

impl DeploymentOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Success { .. } => 0,
            Self::Failure { .. } => 1,
            Self::Cancelled { .. } => EXIT_CANCELLED,
        }
    }

    pub fn deployment_id(&self) -> Option<&str> {
        match self {
            Self::Success { deployment_id, .. } => Some(deployment_id),
            Self::Failure { deployment_id, .. } | Self::Cancelled { deployment_id, .. } => {
                deployment_id.as_deref()
            }
        }
    }
}

/// Everything a finished run produced
#[derive(Debug)]
pub struct DeploymentRun {
    pub outcome: DeploymentOutcome,
    pub stack_status: Option<String>,
    pub probes: Vec<ProbeOutcome>,
}

impl DeploymentRun {
    fn ended(outcome: DeploymentOutcome) -> Self {
        Self {
            outcome,
            stack_status: None,
            probes: Vec::new(),
        }
    }
}

/// Sequences the deployment steps
pub struct Orchestrator {
    collaborators: Collaborators,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(collaborators: Collaborators, settings: OrchestratorSettings) -> Self {
        Self {
            collaborators,
            settings,
        }
    }

    /// Run every step once, in order, stopping at the first failure
    pub async fn run(&self, cancel: &CancellationToken) -> DeploymentRun {
        // 1. credential
        if cancel.is_cancelled() {
            return cancelled(Step::Credential, None);
        }
        let credentials = Arc::clone(&self.collaborators.credentials);
        let prompt = tokio::task::spawn_blocking(move || credentials.obtain());
        // The prompt thread cannot be interrupted; it is abandoned on cancel.
        let obtained = tokio::select! {
            biased;
            () = cancel.cancelled() => return cancelled(Step::Credential, None),
            joined = prompt => joined.unwrap_or_else(|e| {
                Err(CredentialError::Prompt {
                    message: e.to_string(),
                })
            }),
        };
        let secret_value = match obtained {
            Ok(value) => value,
            Err(e) => return failed(FailureReason::Credential(e), None),
        };
        let request = self.request(secret_value);

        // 2. secret
        if cancel.is_cancelled() {
            return cancelled(Step::Secret, None);
        }
        println!("🔐 Creating secrets manager secret '{}'", request.secret_name);
        if let Err(e) = store_secret(
            self.collaborators.secrets.as_ref(),
            &request.secret_name,
            &request.secret_description,
            &request.secret_value,
        )
        .await
        {
            return failed(FailureReason::Secret(e), None);
        }

        // 3. template
        if cancel.is_cancelled() {
            return cancelled(Step::Template, None);
        }
        let template_body = match self.collaborators.templates.render() {
            Ok(body) => body,
            Err(e) => return failed(FailureReason::Template(e), None),
        };

        // 4. submit + wait
        if cancel.is_cancelled() {
            return cancelled(Step::Provision, None);
        }
        println!(
            "🚀 Launching stack '{}' into {}",
            request.stack_name, request.region
        );
        let provisioning = ProvisioningClient::new(Arc::clone(&self.collaborators.provisioning));
        let stack_request = StackRequest {
            stack_name: request.stack_name.clone(),
            template_body,
            capabilities: request.capabilities.clone(),
        };
        let handle = match provisioning.submit(&stack_request).await {
            Ok(handle) => handle,
            Err(e) => return failed(FailureReason::Submission(e), None),
        };
        let deployment_id = handle.deployment_id.clone();

        println!(
            "⏳ Waiting on {} stack to complete launch...",
            request.stack_name
        );
        let result = match provisioning
            .await_completion(&handle, self.settings.wait, cancel)
            .await
        {
            Ok(result) => result,
            Err(ProvisioningError::WaitCancelled { .. }) => {
                return cancelled(Step::Provision, Some(deployment_id));
            }
            Err(e) => return failed(FailureReason::Provisioning(e), Some(deployment_id)),
        };
        println!("✅ Stack create completed! ({})", result.raw_status);
        let stack_status = Some(result.raw_status.clone());

        // 5. outputs
        let endpoints = match provisioning
            .fetch_outputs(&handle)
            .await
            .and_then(|outputs| ServiceEndpoints::from_outputs(&outputs, &deployment_id))
        {
            Ok(endpoints) => endpoints,
            Err(e) => {
                let mut run = failed(FailureReason::Output(e), Some(deployment_id));
                run.stack_status = stack_status;
                return run;
            }
        };
        info!(
            service_url = %endpoints.service_url,
            cluster_instance_id = %endpoints.cluster_instance_id,
            "stack outputs extracted"
        );
        println!("🔗 stonks service url: {}", endpoints.service_url);

        // 6. probe
        let policy = self.settings.probe;
        println!(
            "🩺 Waiting on service to become available (up to {} attempts, {}s apart)",
            policy.max_attempts,
            policy.interval.as_secs()
        );
        let prober = HealthProber::new(Arc::clone(&self.collaborators.http), policy);
        let mut probes = Vec::new();
        let probed = prober
            .probe_until_healthy(
                &endpoints.service_url,
                contains_marker(self.settings.marker.as_str()),
                cancel,
                |outcome| {
                    println!("   attempt #{}: OK?: {}", outcome.attempt, outcome.matched);
                    probes.push(outcome.clone());
                },
            )
            .await;

        let outcome = match probed {
            Ok(attempt) => {
                println!("✅ Successful response seen from application!");
                DeploymentOutcome::Success {
                    service_url: endpoints.service_url,
                    cluster_instance_id: endpoints.cluster_instance_id,
                    deployment_id,
                    attempt,
                }
            }
            Err(ProbeFailure::ProbeCancelled { .. }) => DeploymentOutcome::Cancelled {
                step: Step::Probe,
                deployment_id: Some(deployment_id),
            },
            Err(e) => {
                warn!(deployment_id = %deployment_id, error = %e, "service never became healthy");
                DeploymentOutcome::Failure {
                    reason: FailureReason::Probe(e),
                    deployment_id: Some(deployment_id),
                }
            }
        };

        DeploymentRun {
            outcome,
            stack_status,
            probes,
        }
    }

    fn request(&self, secret_value: SecretValue) -> DeploymentRequest {
        DeploymentRequest {
            secret_name: self.settings.secret_name.clone(),
            secret_description: self.settings.secret_description.clone(),
            secret_value,
            stack_name: self.settings.stack_name.clone(),
            region: self.settings.region.clone(),
            capabilities: self.settings.capabilities.clone(),
        }
    }
}

fn failed(reason: FailureReason, deployment_id: Option<String>) -> DeploymentRun {
    error!(
        step = %reason.step(),
        error = %reason,
        deployment_id = ?deployment_id,
        "deployment failed"
    );
    DeploymentRun::ended(DeploymentOutcome::Failure {
        reason,
        deployment_id,
    })
}

fn cancelled(step: Step, deployment_id: Option<String>) -> DeploymentRun {
    warn!(step = %step, "deployment cancelled");
    DeploymentRun::ended(DeploymentOutcome::Cancelled {
        step,
        deployment_id,
    })
}
