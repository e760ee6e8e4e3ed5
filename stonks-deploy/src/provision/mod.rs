//! Provisioning client
//!
//! Submits the rendered template once, waits for the backing system to reach
//! a terminal state, and reads back the stack outputs the rest of the flow
//! depends on. Nothing here retries: a failed stack is left in place and
//! surfaced as is.

mod cloudformation;
mod memory;

pub use cloudformation::CloudFormation;
pub use memory::ScriptedBackend;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{OutputError, ProvisioningError, SubmissionError};

/// Output holding the public service URL.
pub const SERVICE_URL_OUTPUT: &str = "serviceURL";

/// Output holding the cluster instance identifier.
pub const CLUSTER_ID_OUTPUT: &str = "clusterInstanceId";

/// Floor applied to the stack status poll interval.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Template submission for one stack
#[derive(Debug, Clone)]
pub struct StackRequest {
    pub stack_name: String,
    pub template_body: String,
    pub capabilities: Vec<String>,
}

/// Opaque reference to a submitted stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentHandle {
    pub stack_name: String,
    /// Identifier assigned by the backing system (a stack ARN on AWS)
    pub deployment_id: String,
}

/// Coarse lifecycle of a stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackState {
    Pending,
    Succeeded,
    Failed,
}

impl StackState {
    /// Classify a CloudFormation stack status
    pub fn from_status(status: &str) -> Self {
        if status.ends_with("_IN_PROGRESS") {
            Self::Pending
        } else if matches!(
            status,
            "CREATE_COMPLETE" | "UPDATE_COMPLETE" | "IMPORT_COMPLETE"
        ) {
            Self::Succeeded
        } else {
            Self::Failed
        }
    }

    pub fn is_terminal(self) -> bool {
        self != Self::Pending
    }
}

/// Point-in-time view of a stack
#[derive(Debug, Clone)]
pub struct StackSnapshot {
    pub status: String,
    pub reason: Option<String>,
    pub outputs: HashMap<String, String>,
}

/// Terminal result of a successful provisioning wait
#[derive(Debug, Clone)]
pub struct ProvisioningResult {
    pub status: StackState,
    pub raw_status: String,
    pub deployment_id: String,
    pub outputs: HashMap<String, String>,
}

/// Wait budget for [`ProvisioningClient::await_completion`]
#[derive(Debug, Clone, Copy)]
pub struct WaitPolicy {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(15),
            timeout: Duration::from_secs(30 * 60),
        }
    }
}

/// Backing infrastructure service
#[async_trait]
pub trait ProvisioningBackend: Send + Sync {
    /// Submit a stack without waiting for it.
    async fn create_stack(&self, request: &StackRequest)
    -> Result<DeploymentHandle, SubmissionError>;

    /// Current status and outputs.
    async fn describe_stack(
        &self,
        handle: &DeploymentHandle,
    ) -> Result<StackSnapshot, ProvisioningError>;

    /// Reasons recorded against failed resources, oldest first.
    async fn failure_events(&self, _handle: &DeploymentHandle) -> Vec<String> {
        Vec::new()
    }
}

/// Endpoints extracted from a completed stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoints {
    pub service_url: String,
    pub cluster_instance_id: String,
}

impl ServiceEndpoints {
    /// Pull both required outputs. Values are taken verbatim.
    pub fn from_outputs(
        outputs: &HashMap<String, String>,
        deployment_id: &str,
    ) -> Result<Self, OutputError> {
        let take = |key: &str| {
            outputs
                .get(key)
                .cloned()
                .ok_or_else(|| OutputError::MissingOutput {
                    key: key.to_string(),
                    deployment_id: deployment_id.to_string(),
                })
        };

        Ok(Self {
            service_url: take(SERVICE_URL_OUTPUT)?,
            cluster_instance_id: take(CLUSTER_ID_OUTPUT)?,
        })
    }
}

/// Submit / wait / read-outputs over a [`ProvisioningBackend`]
#[derive(Clone)]
pub struct ProvisioningClient {
    backend: Arc<dyn ProvisioningBackend>,
}

impl ProvisioningClient {
    pub fn new(backend: Arc<dyn ProvisioningBackend>) -> Self {
        Self { backend }
    }

    /// Submit the stack. Returns as soon as the backend accepts it.
    pub async fn submit(
        &self,
        request: &StackRequest,
    ) -> Result<DeploymentHandle, SubmissionError> {
        let handle = self.backend.create_stack(request).await?;
        info!(
            stack = %handle.stack_name,
            deployment_id = %handle.deployment_id,
            "stack submitted"
        );
        Ok(handle)
    }

    /// Poll until the stack reaches a terminal state, the timeout elapses,
    /// or `cancel` fires.
    pub async fn await_completion(
        &self,
        handle: &DeploymentHandle,
        policy: WaitPolicy,
        cancel: &CancellationToken,
    ) -> Result<ProvisioningResult, ProvisioningError> {
        let poll_interval = policy.poll_interval.max(MIN_POLL_INTERVAL);
        let started = Instant::now();
        // An unrepresentable deadline means no deadline.
        let deadline = started.checked_add(policy.timeout);

        loop {
            let snapshot = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(cancelled(handle)),
                snapshot = self.backend.describe_stack(handle) => snapshot?,
            };

            match StackState::from_status(&snapshot.status) {
                StackState::Succeeded => {
                    info!(
                        deployment_id = %handle.deployment_id,
                        status = %snapshot.status,
                        elapsed_secs = started.elapsed().as_secs(),
                        "stack reached terminal success"
                    );
                    return Ok(ProvisioningResult {
                        status: StackState::Succeeded,
                        raw_status: snapshot.status,
                        deployment_id: handle.deployment_id.clone(),
                        outputs: snapshot.outputs,
                    });
                }
                StackState::Failed => {
                    let reason = self.failure_reason(handle, &snapshot).await;
                    warn!(
                        deployment_id = %handle.deployment_id,
                        status = %snapshot.status,
                        reason = %reason,
                        "stack reached terminal failure"
                    );
                    return Err(ProvisioningError::TerminalFailure {
                        deployment_id: handle.deployment_id.clone(),
                        status: snapshot.status,
                        reason,
                    });
                }
                StackState::Pending => {
                    debug!(
                        deployment_id = %handle.deployment_id,
                        status = %snapshot.status,
                        "stack pending"
                    );
                }
            }

            let now = Instant::now();
            let pause = match deadline {
                Some(deadline) if now >= deadline => {
                    return Err(ProvisioningError::TimedOut {
                        deployment_id: handle.deployment_id.clone(),
                        waited: policy.timeout,
                    });
                }
                Some(deadline) => poll_interval.min(deadline - now),
                None => poll_interval,
            };

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(cancelled(handle)),
                () = sleep(pause) => {}
            }
        }
    }

    /// Read the outputs of a completed stack
    pub async fn fetch_outputs(
        &self,
        handle: &DeploymentHandle,
    ) -> Result<HashMap<String, String>, OutputError> {
        let snapshot = self.backend.describe_stack(handle).await.map_err(|e| {
            OutputError::OutputsUnavailable {
                deployment_id: handle.deployment_id.clone(),
                message: e.to_string(),
            }
        })?;
        debug!(
            deployment_id = %handle.deployment_id,
            count = snapshot.outputs.len(),
            "stack outputs read"
        );
        Ok(snapshot.outputs)
    }

    async fn failure_reason(&self, handle: &DeploymentHandle, snapshot: &StackSnapshot) -> String {
        let mut reasons: Vec<String> = snapshot.reason.iter().cloned().collect();
        reasons.extend(self.backend.failure_events(handle).await);
        if reasons.is_empty() {
            "no failure reason reported".to_string()
        } else {
            reasons.join("; ")
        }
    }
}

fn cancelled(handle: &DeploymentHandle) -> ProvisioningError {
    ProvisioningError::WaitCancelled {
        deployment_id: handle.deployment_id.clone(),
    }
}
