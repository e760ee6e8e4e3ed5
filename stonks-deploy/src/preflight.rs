//! Prerequisite checker for stonks-deploy
//!
//! Validates that the binaries the deployment shells out to are installed
//! with usable versions before anything is prompted for or created.

use std::path::PathBuf;

use duct::cmd;
use semver::{Version, VersionReq};

/// A binary the deployment cannot run without
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinarySpec {
    pub name: String,
    pub version: String, // Format: ">=2.0.0"
    pub install_hint: Option<String>,
}

impl BinarySpec {
    /// AWS CLI v2: `file://` stdin parameters and `--output json` everywhere
    pub fn aws_cli(program: &str) -> Self {
        Self {
            name: program.to_string(),
            version: ">=2.0.0".to_string(),
            install_hint: Some(
                "https://docs.aws.amazon.com/cli/latest/userguide/getting-started-install.html"
                    .to_string(),
            ),
        }
    }
}

/// Result of prerequisite check for a single binary
#[derive(Debug, Clone)]
pub struct BinaryCheck {
    pub name: String,
    pub found: bool,
    pub installed_version: Option<String>,
    pub required_version: String,
    pub meets_requirement: bool,
    pub path: Option<PathBuf>,
    pub install_hint: Option<String>,
}

/// Overall prerequisite check result
#[derive(Debug, Clone)]
pub struct PrereqResult {
    pub required: Vec<BinaryCheck>,
    pub all_required_met: bool,
}

impl PrereqResult {
    pub fn missing_required(&self) -> Vec<&BinaryCheck> {
        self.required
            .iter()
            .filter(|b| !b.found || !b.meets_requirement)
            .collect()
    }

    /// Print one line per binary
    pub fn print(&self) {
        println!("📦 Required Binaries:");
        for bin in &self.required {
            let status = if bin.found && bin.meets_requirement {
                "✅"
            } else if bin.found {
                "⚠️"
            } else {
                "❌"
            };

            match &bin.installed_version {
                Some(installed) if bin.meets_requirement => {
                    println!("  {status} {} (installed: {installed}, OK)", bin.name);
                }
                Some(installed) => println!(
                    "  {status} {} (installed: {installed}, requires: {}) ⚠️",
                    bin.name, bin.required_version
                ),
                None => {
                    println!(
                        "  {status} {} (not installed) - requires: {}",
                        bin.name, bin.required_version
                    );
                    if let Some(hint) = &bin.install_hint {
                        println!("     install: {hint}");
                    }
                }
            }
        }
    }
}

/// Check if binary exists in PATH
fn find_binary(name: &str) -> Option<PathBuf> {
    cmd!("which", name)
        .stderr_null()
        .read()
        .ok()
        .map(|s| PathBuf::from(s.trim()))
        .filter(|p| !p.as_os_str().is_empty())
}

/// Get version of binary by running `<binary> --version`
fn get_version(name: &str) -> Option<String> {
    // aws v1 printed its version on stderr
    let output = cmd!(name, "--version")
        .stderr_to_stdout()
        .stdout_capture()
        .unchecked()
        .run()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let version_output = String::from_utf8(output.stdout).ok()?;
    extract_version(&version_output)
}

/// Extract semantic version from version output
/// Handles:
///   "aws-cli/2.15.30 Python/3.11.8 Linux/6.5.0 exe/x86_64" -> "2.15.30"
///   "aws-cli/1.18.69 Python/2.7.18 Linux/4.14.0 botocore/1.16.19" -> "1.18.69"
fn extract_version(output: &str) -> Option<String> {
    let re = regex::Regex::new(r"v?(\d+\.\d+\.\d+)").ok()?;
    re.captures(output)
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str().to_string())
}

/// Check if installed version meets a requirement like ">=2.0.0"
fn version_meets_requirement(installed: &str, requirement: &str) -> anyhow::Result<bool> {
    let installed_ver = Version::parse(installed.trim())
        .map_err(|e| anyhow::anyhow!("Failed to parse installed version {installed}: {e}"))?;
    let required = VersionReq::parse(requirement.trim())
        .map_err(|e| anyhow::anyhow!("Failed to parse required version {requirement}: {e}"))?;
    Ok(required.matches(&installed_ver))
}

/// Check a single binary against its version requirement
pub fn check_binary(spec: &BinarySpec) -> BinaryCheck {
    let path = find_binary(&spec.name);
    let found = path.is_some();

    let (installed_version, meets_requirement) = if found {
        match get_version(&spec.name) {
            Some(version) => {
                let meets = version_meets_requirement(&version, &spec.version).unwrap_or(false);
                (Some(version), meets)
            }
            // Present but unversioned: let the first real call decide
            None => (Some("unknown".to_string()), true),
        }
    } else {
        (None, false)
    };

    BinaryCheck {
        name: spec.name.clone(),
        found,
        installed_version,
        required_version: spec.version.clone(),
        meets_requirement,
        path,
        install_hint: spec.install_hint.clone(),
    }
}

/// Check every required binary
pub fn check_prerequisites(specs: &[BinarySpec]) -> PrereqResult {
    let required: Vec<BinaryCheck> = specs.iter().map(check_binary).collect();
    let all_required_met = required
        .iter()
        .all(|check| check.found && check.meets_requirement);

    PrereqResult {
        required,
        all_required_met,
    }
}
