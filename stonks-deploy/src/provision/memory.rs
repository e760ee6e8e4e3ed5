//! Scripted provisioning backend for tests and dry runs.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use super::{
    CLUSTER_ID_OUTPUT, DeploymentHandle, ProvisioningBackend, SERVICE_URL_OUTPUT, StackRequest,
    StackSnapshot,
};
use crate::error::{ProvisioningError, SubmissionError};

/// Backend that walks a fixed sequence of stack statuses.
///
/// Each `describe_stack` call returns the next status; the last one repeats.
/// Stack names are tracked so a second submission of the same name fails the
/// way CloudFormation does.
#[derive(Debug)]
pub struct ScriptedBackend {
    statuses: Vec<String>,
    outputs: HashMap<String, String>,
    failure_events: Vec<String>,
    reject_with: Option<String>,
    stacks: Mutex<HashSet<String>>,
    create_calls: AtomicUsize,
    describe_calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new<I, S>(statuses: I, outputs: HashMap<String, String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            statuses: statuses.into_iter().map(Into::into).collect(),
            outputs,
            failure_events: Vec::new(),
            reject_with: None,
            stacks: Mutex::new(HashSet::new()),
            create_calls: AtomicUsize::new(0),
            describe_calls: AtomicUsize::new(0),
        }
    }

    /// Outputs a healthy stonks stack reports.
    pub fn complete_outputs() -> HashMap<String, String> {
        HashMap::from([
            (
                SERVICE_URL_OUTPUT.to_string(),
                "http://203.0.113.10:30007".to_string(),
            ),
            (
                CLUSTER_ID_OUTPUT.to_string(),
                "i-0123456789abcdef0".to_string(),
            ),
        ])
    }

    pub fn with_failure_events<I, S>(mut self, events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.failure_events = events.into_iter().map(Into::into).collect();
        self
    }

    /// Refuse every submission with the given message.
    pub fn rejecting(mut self, message: impl Into<String>) -> Self {
        self.reject_with = Some(message.into());
        self
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn describe_calls(&self) -> usize {
        self.describe_calls.load(Ordering::SeqCst)
    }

    fn deployment_id(stack_name: &str) -> String {
        format!("arn:aws:cloudformation:us-east-1:123456789012:stack/{stack_name}/scripted")
    }
}

#[async_trait]
impl ProvisioningBackend for ScriptedBackend {
    async fn create_stack(
        &self,
        request: &StackRequest,
    ) -> Result<DeploymentHandle, SubmissionError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(message) = &self.reject_with {
            return Err(SubmissionError::Rejected {
                stack: request.stack_name.clone(),
                message: message.clone(),
            });
        }

        let mut stacks = self.stacks.lock().map_err(|_| SubmissionError::Rejected {
            stack: request.stack_name.clone(),
            message: "lock poisoned".to_string(),
        })?;
        if !stacks.insert(request.stack_name.clone()) {
            return Err(SubmissionError::StackExists {
                stack: request.stack_name.clone(),
            });
        }

        Ok(DeploymentHandle {
            stack_name: request.stack_name.clone(),
            deployment_id: Self::deployment_id(&request.stack_name),
        })
    }

    async fn describe_stack(
        &self,
        handle: &DeploymentHandle,
    ) -> Result<StackSnapshot, ProvisioningError> {
        let call = self.describe_calls.fetch_add(1, Ordering::SeqCst);
        let status = self
            .statuses
            .get(call)
            .or_else(|| self.statuses.last())
            .cloned()
            .ok_or_else(|| ProvisioningError::Status {
                deployment_id: handle.deployment_id.clone(),
                message: "stack does not exist".to_string(),
            })?;

        Ok(StackSnapshot {
            status,
            reason: None,
            outputs: self.outputs.clone(),
        })
    }

    async fn failure_events(&self, _handle: &DeploymentHandle) -> Vec<String> {
        self.failure_events.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(name: &str) -> StackRequest {
        StackRequest {
            stack_name: name.to_string(),
            template_body: "{}".to_string(),
            capabilities: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_duplicate_stack_name_rejected() {
        let backend = ScriptedBackend::new(["CREATE_COMPLETE"], HashMap::new());
        backend.create_stack(&request("stonks")).await.unwrap();

        let err = backend.create_stack(&request("stonks")).await.unwrap_err();
        assert!(matches!(err, SubmissionError::StackExists { ref stack } if stack == "stonks"));
        assert_eq!(backend.create_calls(), 2);
    }

    #[tokio::test]
    async fn test_last_status_repeats() {
        let backend =
            ScriptedBackend::new(["CREATE_IN_PROGRESS", "CREATE_COMPLETE"], HashMap::new());
        let handle = backend.create_stack(&request("stonks")).await.unwrap();

        for expected in ["CREATE_IN_PROGRESS", "CREATE_COMPLETE", "CREATE_COMPLETE"] {
            assert_eq!(backend.describe_stack(&handle).await.unwrap().status, expected);
        }
    }
}
