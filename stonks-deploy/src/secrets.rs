//! Secret store client
//!
//! Stores the upstream API key once, before any infrastructure exists. The
//! instance reads it back at boot through its IAM role.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use crate::aws::{AwsCli, STDIN_PARAMETER};
use crate::error::SecretError;

/// Sensitive string that never shows up in logs or debug output
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue(String);

impl SecretValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Exposes the raw value. Do not log the result.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// Backend capable of creating a named secret
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Create a new secret. Fails with [`SecretError::AlreadyExists`] if the
    /// name is taken.
    async fn create_secret(
        &self,
        name: &str,
        description: &str,
        value: &SecretValue,
    ) -> Result<(), SecretError>;
}

/// Validate and store the credential
pub async fn store_secret(
    store: &dyn SecretStore,
    name: &str,
    description: &str,
    value: &SecretValue,
) -> Result<(), SecretError> {
    if name.trim().is_empty() {
        return Err(SecretError::EmptyName);
    }
    store.create_secret(name, description, value).await?;
    info!(secret = %name, "secret created");
    Ok(())
}

/// AWS Secrets Manager through the `aws` CLI
#[derive(Debug, Clone)]
pub struct AwsSecretsManager {
    cli: AwsCli,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateSecretResponse {
    #[serde(rename = "ARN")]
    arn: String,
}

impl AwsSecretsManager {
    pub fn new(cli: AwsCli) -> Self {
        Self { cli }
    }
}

#[async_trait]
impl SecretStore for AwsSecretsManager {
    async fn create_secret(
        &self,
        name: &str,
        description: &str,
        value: &SecretValue,
    ) -> Result<(), SecretError> {
        let args = [
            "secretsmanager",
            "create-secret",
            "--name",
            name,
            "--description",
            description,
            "--secret-string",
            STDIN_PARAMETER,
        ];
        let stdin = Some(value.expose().as_bytes().to_vec());

        match self.cli.json::<CreateSecretResponse>(&args, stdin).await {
            Ok(response) => {
                info!(arn = %response.arn, "secrets manager accepted secret");
                Ok(())
            }
            Err(e) if e.error_code().as_deref() == Some("ResourceExistsException") => {
                Err(SecretError::AlreadyExists {
                    name: name.to_string(),
                })
            }
            Err(e) => Err(SecretError::StoreUnavailable {
                name: name.to_string(),
                message: e.detail(),
            }),
        }
    }
}

/// In-memory secret store for tests and dry runs
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    secrets: Mutex<HashMap<String, (String, SecretValue)>>,
    unavailable: bool,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that rejects every write as unavailable
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    pub fn get(&self, name: &str) -> Option<SecretValue> {
        self.secrets
            .lock()
            .ok()
            .and_then(|secrets| secrets.get(name).map(|(_, value)| value.clone()))
    }

    pub fn len(&self) -> usize {
        self.secrets.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn create_secret(
        &self,
        name: &str,
        description: &str,
        value: &SecretValue,
    ) -> Result<(), SecretError> {
        if self.unavailable {
            return Err(SecretError::StoreUnavailable {
                name: name.to_string(),
                message: "store offline".to_string(),
            });
        }

        let mut secrets = self
            .secrets
            .lock()
            .map_err(|_| SecretError::StoreUnavailable {
                name: name.to_string(),
                message: "lock poisoned".to_string(),
            })?;

        if secrets.contains_key(name) {
            return Err(SecretError::AlreadyExists {
                name: name.to_string(),
            });
        }

        secrets.insert(name.to_string(), (description.to_string(), value.clone()));
        Ok(())
    }
}
