//! Credential input.

use dialoguer::Password;

use crate::error::CredentialError;
use crate::secrets::SecretValue;

/// Environment variable read instead of prompting, for unattended runs.
pub const API_KEY_ENV: &str = "STONKS_API_KEY";

/// Where the upstream API key comes from
pub trait CredentialSource: Send + Sync {
    fn obtain(&self) -> Result<SecretValue, CredentialError>;
}

/// Hidden-input terminal prompt, falling back to [`API_KEY_ENV`]
#[derive(Debug, Clone)]
pub struct TerminalPrompt {
    prompt: String,
}

impl TerminalPrompt {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
        }
    }
}

impl Default for TerminalPrompt {
    fn default() -> Self {
        Self::new("Please provide an API Key")
    }
}

impl CredentialSource for TerminalPrompt {
    fn obtain(&self) -> Result<SecretValue, CredentialError> {
        let value = match std::env::var(API_KEY_ENV) {
            Ok(value) => value,
            Err(_) => Password::new()
                .with_prompt(&self.prompt)
                .interact()
                .map_err(|e| CredentialError::Prompt {
                    message: e.to_string(),
                })?,
        };
        non_empty(value)
    }
}

/// Fixed credential, for tests and scripted runs
#[derive(Debug, Clone)]
pub struct FixedCredential(pub SecretValue);

impl CredentialSource for FixedCredential {
    fn obtain(&self) -> Result<SecretValue, CredentialError> {
        non_empty(self.0.expose().to_string())
    }
}

fn non_empty(value: String) -> Result<SecretValue, CredentialError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(CredentialError::EmptyCredential);
    }
    Ok(SecretValue::new(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_credential_trimmed() {
        let source = FixedCredential(SecretValue::new("  abc123\n"));
        assert_eq!(source.obtain().unwrap().expose(), "abc123");
    }

    #[test]
    fn test_blank_credential_rejected() {
        let source = FixedCredential(SecretValue::new("   "));
        assert!(matches!(
            source.obtain().unwrap_err(),
            CredentialError::EmptyCredential
        ));
    }
}
