//! stonks-deploy - provision the stonks service onto a single-node
//! Kubernetes cluster on EC2 and wait until it answers.

pub mod aws;
pub mod commands;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod preflight;
pub mod probe;
pub mod prompt;
pub mod provision;
pub mod report;
pub mod secrets;
pub mod template;

pub use config::DeployConfig;
pub use error::{
    AwsCliError, CredentialError, OutputError, ProbeError, ProbeFailure, ProvisioningError,
    SecretError, SubmissionError,
};
pub use orchestrator::{
    Collaborators, DeploymentOutcome, DeploymentRun, FailureReason, Orchestrator,
    OrchestratorSettings, Step,
};
