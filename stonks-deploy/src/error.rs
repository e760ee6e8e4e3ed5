//! Error types for each deployment boundary.
//!
//! Every kind except [`ProbeError`] aborts the deployment. Probe transport
//! errors are recorded per attempt and retried.

use std::time::Duration;

use regex::Regex;
use snafu::Snafu;

/// Failures running the `aws` command line client.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AwsCliError {
    #[snafu(display("failed to run `aws {command}`: {source}"))]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[snafu(display("`aws {command}` exited with status {code}: {stderr}"))]
    NonZeroExit {
        command: String,
        code: i32,
        stderr: String,
    },

    #[snafu(display("could not parse output of `aws {command}`: {source}"))]
    Parse {
        command: String,
        source: serde_json::Error,
    },
}

impl AwsCliError {
    /// AWS error code reported on stderr, e.g. `ResourceExistsException`.
    ///
    /// The CLI reports service errors as
    /// `An error occurred (<Code>) when calling the <Op> operation: <message>`.
    pub fn error_code(&self) -> Option<String> {
        let Self::NonZeroExit { stderr, .. } = self else {
            return None;
        };
        let re = Regex::new(r"An error occurred \(([A-Za-z0-9.]+)\)").ok()?;
        re.captures(stderr)
            .and_then(|cap| cap.get(1))
            .map(|m| m.as_str().to_string())
    }

    /// Human readable detail without the CLI framing.
    pub fn detail(&self) -> String {
        match self {
            Self::NonZeroExit { stderr, .. } => stderr
                .rsplit_once(" operation: ")
                .map_or_else(|| stderr.trim().to_string(), |(_, msg)| msg.trim().to_string()),
            other => other.to_string(),
        }
    }
}

/// Failures obtaining the API credential from the operator.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CredentialError {
    #[snafu(display("could not read API key: {message}"))]
    Prompt { message: String },

    #[snafu(display("API key must not be empty"))]
    EmptyCredential,
}

/// Failures storing the API credential.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SecretError {
    #[snafu(display("secret name must not be empty"))]
    EmptyName,

    #[snafu(display("secret '{name}' already exists"))]
    AlreadyExists { name: String },

    #[snafu(display("secret store unavailable while creating '{name}': {message}"))]
    StoreUnavailable { name: String, message: String },
}

/// Failures submitting the infrastructure template.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SubmissionError {
    #[snafu(display("stack '{stack}' already exists; delete it or choose another stack name"))]
    StackExists { stack: String },

    #[snafu(display("template for stack '{stack}' was rejected as invalid: {message}"))]
    InvalidTemplate { stack: String, message: String },

    #[snafu(display("submission of stack '{stack}' was refused: {message}"))]
    Rejected { stack: String, message: String },

    #[snafu(display("could not serialise template document: {source}"))]
    Encode { source: serde_json::Error },
}

/// Failures while waiting on a submitted stack.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ProvisioningError {
    #[snafu(display("stack {deployment_id} ended in {status}: {reason}"))]
    TerminalFailure {
        deployment_id: String,
        status: String,
        reason: String,
    },

    #[snafu(display("stack {deployment_id} did not finish within {}s", waited.as_secs()))]
    TimedOut {
        deployment_id: String,
        waited: Duration,
    },

    #[snafu(display("could not read status of stack {deployment_id}: {message}"))]
    Status {
        deployment_id: String,
        message: String,
    },

    #[snafu(display("wait on stack {deployment_id} was cancelled"))]
    WaitCancelled { deployment_id: String },
}

impl ProvisioningError {
    /// Identifier of the deployment the error refers to.
    pub fn deployment_id(&self) -> &str {
        match self {
            Self::TerminalFailure { deployment_id, .. }
            | Self::TimedOut { deployment_id, .. }
            | Self::Status { deployment_id, .. }
            | Self::WaitCancelled { deployment_id } => deployment_id,
        }
    }
}

/// Failures reading outputs of a completed stack.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum OutputError {
    #[snafu(display("stack {deployment_id} has no output named '{key}'"))]
    MissingOutput { key: String, deployment_id: String },

    #[snafu(display("could not read outputs of stack {deployment_id}: {message}"))]
    OutputsUnavailable {
        deployment_id: String,
        message: String,
    },
}

/// Transport failure on a single probe attempt. Never aborts the probe loop.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ProbeError {
    #[snafu(display("request to {url} timed out"))]
    Timeout { url: String },

    #[snafu(display("could not connect to {url}: {message}"))]
    Connect { url: String, message: String },

    #[snafu(display("request to {url} failed: {message}"))]
    Request { url: String, message: String },
}

/// Terminal result of a probe loop that never saw a healthy response.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ProbeFailure {
    #[snafu(display("no healthy response after {attempts} attempts"))]
    Exhausted { attempts: u32 },

    #[snafu(display("health check cancelled after {attempts} attempts"))]
    ProbeCancelled { attempts: u32 },
}
