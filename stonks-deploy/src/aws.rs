//! Runner for the `aws` command line client
//!
//! The secret store and provisioning backends drive AWS through the CLI the
//! same way the rest of the tooling drives docker and kubectl: spawn, capture,
//! parse JSON. Sensitive payloads go through stdin, never argv.

use duct::cmd;
use serde::de::DeserializeOwned;
use snafu::ResultExt;
use tracing::debug;

use crate::error::{AwsCliError, NonZeroExitSnafu, ParseSnafu, SpawnSnafu};

/// Argument value telling the CLI to read a parameter from stdin.
pub const STDIN_PARAMETER: &str = "file:///dev/stdin";

/// `aws` invocation scoped to one region
#[derive(Debug, Clone)]
pub struct AwsCli {
    program: String,
    region: String,
}

impl AwsCli {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            program: "aws".to_string(),
            region: region.into(),
        }
    }

    /// Use a different executable, e.g. a wrapper script
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Run a command and decode its JSON output
    pub async fn json<T: DeserializeOwned>(
        &self,
        args: &[&str],
        stdin: Option<Vec<u8>>,
    ) -> Result<T, AwsCliError> {
        let command = command_label(args);
        let stdout = self.run(args, stdin).await?;
        serde_json::from_slice(&stdout).context(ParseSnafu { command })
    }

    /// Run a command and return raw stdout
    pub async fn run(
        &self,
        args: &[&str],
        stdin: Option<Vec<u8>>,
    ) -> Result<Vec<u8>, AwsCliError> {
        let command = command_label(args);
        let mut full_args: Vec<String> = args.iter().map(|a| (*a).to_string()).collect();
        full_args.extend([
            "--region".to_string(),
            self.region.clone(),
            "--output".to_string(),
            "json".to_string(),
        ]);

        debug!(
            program = %self.program,
            command = %command,
            region = %self.region,
            "running aws cli"
        );

        let program = self.program.clone();
        let output = tokio::task::spawn_blocking(move || {
            let expr = cmd(program, full_args)
                .stdout_capture()
                .stderr_capture()
                .unchecked();
            match stdin {
                Some(bytes) => expr.stdin_bytes(bytes).run(),
                None => expr.stdin_null().run(),
            }
        })
        .await
        .map_err(std::io::Error::other)
        .and_then(|res| res)
        .context(SpawnSnafu {
            command: command.clone(),
        })?;

        if !output.status.success() {
            return NonZeroExitSnafu {
                command,
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .fail();
        }

        Ok(output.stdout)
    }
}

/// "service operation" label used in logs and errors
fn command_label(args: &[&str]) -> String {
    args.iter()
        .take_while(|a| !a.starts_with("--"))
        .copied()
        .collect::<Vec<_>>()
        .join(" ")
}
