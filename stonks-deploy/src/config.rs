//! Deployment configuration
//!
//! Read from `stonks-deploy.toml` (or `--config <path>`). Every field has a
//! default matching the supported single-region setup, so the file is
//! optional.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::probe::{DEFAULT_MARKER, ProbePolicy};
use crate::provision::WaitPolicy;
use crate::template::{DEFAULT_USER_DATA, TemplateParams};

/// Config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "stonks-deploy.toml";

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct DeployConfig {
    pub secret: SecretSection,
    pub stack: StackSection,
    pub template: TemplateSection,
    pub probe: ProbeSection,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SecretSection {
    pub name: String,
    pub description: String,
}

impl Default for SecretSection {
    fn default() -> Self {
        Self {
            name: "stonks-api-key".to_string(),
            description: "API Key to be used with upstream API for stonks application".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct StackSection {
    pub name: String,
    /// The AMI below is region specific, so only us-east-1 works unchanged
    pub region: String,
    pub capabilities: Vec<String>,
    pub poll_interval_secs: u64,
    pub timeout_secs: u64,
}

impl Default for StackSection {
    fn default() -> Self {
        Self {
            name: "stonks-application".to_string(),
            region: "us-east-1".to_string(),
            capabilities: vec![
                "CAPABILITY_IAM".to_string(),
                "CAPABILITY_NAMED_IAM".to_string(),
            ],
            poll_interval_secs: 15,
            timeout_secs: 30 * 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct TemplateSection {
    pub instance_type: String,
    pub image_id: String,
    pub node_port: u16,
    pub app_image: String,
    /// Replaces the built-in user-data script
    pub user_data_path: Option<PathBuf>,
}

impl Default for TemplateSection {
    fn default() -> Self {
        Self {
            instance_type: "t2.medium".to_string(),
            // Amazon Linux 2 AMI (HVM), SSD Volume Type, x86_64, us-east-1
            image_id: "ami-04d29b6f966df1537".to_string(),
            node_port: 30007,
            app_image: "stonks:latest".to_string(),
            user_data_path: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ProbeSection {
    pub max_attempts: u32,
    pub interval_secs: u64,
    pub timeout_secs: u64,
    pub marker: String,
}

impl Default for ProbeSection {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            interval_secs: 30,
            timeout_secs: 3,
            marker: DEFAULT_MARKER.to_string(),
        }
    }
}

impl DeployConfig {
    /// Load from an explicit path, the default file if present, or defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::from_file(default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the deployment cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.secret.name.trim().is_empty() {
            anyhow::bail!("secret.name must not be empty");
        }
        if self.stack.name.trim().is_empty() {
            anyhow::bail!("stack.name must not be empty");
        }
        if self.stack.region.trim().is_empty() {
            anyhow::bail!("stack.region must not be empty");
        }
        if self.stack.poll_interval_secs < 1 {
            anyhow::bail!("stack.poll_interval_secs must be at least 1");
        }
        if self.probe.max_attempts < 1 {
            anyhow::bail!("probe.max_attempts must be at least 1");
        }
        Ok(())
    }

    pub fn wait_policy(&self) -> WaitPolicy {
        WaitPolicy {
            poll_interval: Duration::from_secs(self.stack.poll_interval_secs),
            timeout: Duration::from_secs(self.stack.timeout_secs),
        }
    }

    pub fn probe_policy(&self) -> ProbePolicy {
        ProbePolicy {
            max_attempts: self.probe.max_attempts,
            interval: Duration::from_secs(self.probe.interval_secs),
            attempt_timeout: Duration::from_secs(self.probe.timeout_secs),
        }
    }

    /// Template inputs, reading the user-data override if one is configured
    pub fn template_params(&self) -> Result<TemplateParams> {
        let user_data = match &self.template.user_data_path {
            Some(path) => std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read user data script {}", path.display()))?,
            None => DEFAULT_USER_DATA.to_string(),
        };

        Ok(TemplateParams {
            instance_type: self.template.instance_type.clone(),
            image_id: self.template.image_id.clone(),
            user_data,
            node_port: self.template.node_port,
            secret_name: self.secret.name.clone(),
            region: self.stack.region.clone(),
            app_image: self.template.app_image.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_reference_setup() {
        let config = DeployConfig::default();
        assert_eq!(config.stack.name, "stonks-application");
        assert_eq!(config.stack.region, "us-east-1");
        assert_eq!(config.secret.name, "stonks-api-key");
        assert_eq!(config.probe_policy(), ProbePolicy::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[stack]\nname = \"stonks-staging\"\n\n[probe]\nmax_attempts = 3\ninterval_secs = 5"
        )
        .unwrap();

        let config = DeployConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.stack.name, "stonks-staging");
        assert_eq!(config.stack.region, "us-east-1");
        assert_eq!(config.probe.max_attempts, 3);
        assert_eq!(config.probe_policy().interval, Duration::from_secs(5));
        assert_eq!(config.probe.marker, "data=");
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[stack]\nnmae = \"typo\"").unwrap();

        assert!(DeployConfig::load(Some(file.path())).is_err());
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let mut config = DeployConfig::default();
        config.probe.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_user_data_override_is_read() {
        let mut script = tempfile::NamedTempFile::new().unwrap();
        write!(script, "#!/bin/bash\necho hi").unwrap();

        let mut config = DeployConfig::default();
        config.template.user_data_path = Some(script.path().to_path_buf());

        let params = config.template_params().unwrap();
        assert_eq!(params.user_data, "#!/bin/bash\necho hi");
        assert_eq!(params.node_port, 30007);
    }
}
