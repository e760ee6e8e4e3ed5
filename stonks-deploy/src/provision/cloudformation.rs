//! CloudFormation backend driven through the `aws` CLI.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{DeploymentHandle, ProvisioningBackend, StackRequest, StackSnapshot};
use crate::aws::{AwsCli, STDIN_PARAMETER};
use crate::error::{AwsCliError, ProvisioningError, SubmissionError};

/// Failed-resource events kept in a failure reason.
const MAX_FAILURE_EVENTS: usize = 5;

#[derive(Debug, Clone)]
pub struct CloudFormation {
    cli: AwsCli,
}

impl CloudFormation {
    pub fn new(cli: AwsCli) -> Self {
        Self { cli }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateStackResponse {
    stack_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeStacksResponse {
    #[serde(default)]
    stacks: Vec<StackDescription>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StackDescription {
    stack_status: String,
    #[serde(default)]
    stack_status_reason: Option<String>,
    #[serde(default)]
    outputs: Vec<StackOutput>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StackOutput {
    output_key: String,
    #[serde(default)]
    output_value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeStackEventsResponse {
    #[serde(default)]
    stack_events: Vec<StackEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StackEvent {
    logical_resource_id: String,
    resource_status: String,
    #[serde(default)]
    resource_status_reason: Option<String>,
}

/// Map a create-stack failure onto the submission taxonomy
fn classify_submission_error(stack: &str, err: &AwsCliError) -> SubmissionError {
    let stack = stack.to_string();
    let message = err.detail();
    match err.error_code().as_deref() {
        Some("AlreadyExistsException") => SubmissionError::StackExists { stack },
        Some("ValidationError") => SubmissionError::InvalidTemplate { stack, message },
        _ => SubmissionError::Rejected { stack, message },
    }
}

fn snapshot_from(
    response: DescribeStacksResponse,
    deployment_id: &str,
) -> Result<StackSnapshot, ProvisioningError> {
    let stack = response
        .stacks
        .into_iter()
        .next()
        .ok_or_else(|| ProvisioningError::Status {
            deployment_id: deployment_id.to_string(),
            message: "describe-stacks returned no stacks".to_string(),
        })?;

    let outputs: HashMap<String, String> = stack
        .outputs
        .into_iter()
        .map(|o| (o.output_key, o.output_value))
        .collect();

    Ok(StackSnapshot {
        status: stack.stack_status,
        reason: stack.stack_status_reason,
        outputs,
    })
}

/// Failed resource events, oldest first. The API lists newest first.
fn failure_reasons(response: DescribeStackEventsResponse) -> Vec<String> {
    let mut reasons: Vec<String> = response
        .stack_events
        .into_iter()
        .filter(|e| e.resource_status.ends_with("_FAILED"))
        .filter_map(|e| {
            e.resource_status_reason
                .map(|reason| format!("{}: {}", e.logical_resource_id, reason))
        })
        .collect();
    reasons.reverse();
    reasons.truncate(MAX_FAILURE_EVENTS);
    reasons
}

#[async_trait]
impl ProvisioningBackend for CloudFormation {
    async fn create_stack(
        &self,
        request: &StackRequest,
    ) -> Result<DeploymentHandle, SubmissionError> {
        let mut args = vec![
            "cloudformation",
            "create-stack",
            "--stack-name",
            request.stack_name.as_str(),
            "--template-body",
            STDIN_PARAMETER,
        ];
        if !request.capabilities.is_empty() {
            args.push("--capabilities");
            args.extend(request.capabilities.iter().map(String::as_str));
        }

        let stdin = Some(request.template_body.as_bytes().to_vec());
        let response: CreateStackResponse = self
            .cli
            .json(&args, stdin)
            .await
            .map_err(|e| classify_submission_error(&request.stack_name, &e))?;

        Ok(DeploymentHandle {
            stack_name: request.stack_name.clone(),
            deployment_id: response.stack_id,
        })
    }

    async fn describe_stack(
        &self,
        handle: &DeploymentHandle,
    ) -> Result<StackSnapshot, ProvisioningError> {
        // The stack id keeps working after the name is reused or deleted.
        let args = [
            "cloudformation",
            "describe-stacks",
            "--stack-name",
            handle.deployment_id.as_str(),
        ];
        let response: DescribeStacksResponse =
            self.cli
                .json(&args, None)
                .await
                .map_err(|e| ProvisioningError::Status {
                    deployment_id: handle.deployment_id.clone(),
                    message: e.detail(),
                })?;

        let snapshot = snapshot_from(response, &handle.deployment_id)?;
        debug!(
            deployment_id = %handle.deployment_id,
            status = %snapshot.status,
            "describe-stacks"
        );
        Ok(snapshot)
    }

    async fn failure_events(&self, handle: &DeploymentHandle) -> Vec<String> {
        let args = [
            "cloudformation",
            "describe-stack-events",
            "--stack-name",
            handle.deployment_id.as_str(),
        ];
        match self.cli.json::<DescribeStackEventsResponse>(&args, None).await {
            Ok(response) => failure_reasons(response),
            Err(e) => {
                warn!(
                    deployment_id = %handle.deployment_id,
                    error = %e,
                    "could not read stack events"
                );
                Vec::new()
            }
        }
    }
}
