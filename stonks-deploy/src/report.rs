//! Toon format report for a finished deployment
//!
//! Toon (Token-Oriented Object Notation) is TOML with tabular arrays, so the
//! report stays readable in a terminal and parseable by tooling.
//!
//! See: https://github.com/toon-format/toon

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;

use crate::orchestrator::{DeploymentOutcome, DeploymentRun, OrchestratorSettings};
use crate::probe::ProbeOutcome;

/// Everything worth keeping about one deployment run
#[derive(Debug, Clone)]
pub struct DeploymentReport {
    pub timestamp: String,
    pub stack_name: String,
    pub region: String,
    pub outcome: &'static str,
    pub exit_code: u8,
    pub deployment_id: Option<String>,
    pub stack_status: Option<String>,
    pub service_url: Option<String>,
    pub cluster_instance_id: Option<String>,
    pub failed_step: Option<String>,
    pub failure: Option<String>,
    pub probes: Vec<ProbeOutcome>,
}

impl DeploymentReport {
    pub fn from_run(run: &DeploymentRun, settings: &OrchestratorSettings) -> Self {
        let mut report = Self {
            timestamp: Utc::now().to_rfc3339(),
            stack_name: settings.stack_name.clone(),
            region: settings.region.clone(),
            outcome: "success",
            exit_code: run.outcome.exit_code(),
            deployment_id: run.outcome.deployment_id().map(str::to_string),
            stack_status: run.stack_status.clone(),
            service_url: None,
            cluster_instance_id: None,
            failed_step: None,
            failure: None,
            probes: run.probes.clone(),
        };

        match &run.outcome {
            DeploymentOutcome::Success {
                service_url,
                cluster_instance_id,
                ..
            } => {
                report.service_url = Some(service_url.clone());
                report.cluster_instance_id = Some(cluster_instance_id.clone());
            }
            DeploymentOutcome::Failure { reason, .. } => {
                report.outcome = "failure";
                report.failed_step = Some(reason.step().to_string());
                report.failure = Some(reason.to_string());
            }
            DeploymentOutcome::Cancelled { step, .. } => {
                report.outcome = "cancelled";
                report.failed_step = Some(step.to_string());
            }
        }
        report
    }
}

/// Write the Toon report, creating parent directories. `~` is expanded.
pub fn write_report(report: &DeploymentReport, output_path: &Path) -> Result<()> {
    let toon_content = serialize_to_toon(report);

    let raw_path = output_path.to_string_lossy();
    let expanded_path = shellexpand::tilde(raw_path.as_ref());
    let final_path = Path::new(expanded_path.as_ref());

    if let Some(parent) = final_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create parent directory: {}", parent.display()))?;
    }

    fs::write(final_path, toon_content)
        .with_context(|| format!("Failed to write Toon report to {}", final_path.display()))?;

    Ok(())
}

/// Serialize a deployment report to Toon format
pub fn serialize_to_toon(report: &DeploymentReport) -> String {
    let mut toon = String::new();

    toon.push_str("# stonks-deploy report\n\n");
    toon.push_str("[meta]\n");
    let _ = writeln!(toon, "timestamp = {}", quoted(&report.timestamp));
    toon.push_str("format = \"toon\"\n\n");

    toon.push_str("[deployment]\n");
    let _ = writeln!(toon, "stack = {}", quoted(&report.stack_name));
    let _ = writeln!(toon, "region = {}", quoted(&report.region));
    let _ = writeln!(toon, "outcome = {}", quoted(report.outcome));
    let _ = writeln!(toon, "exit_code = {}", report.exit_code);
    let optional = [
        ("deployment_id", &report.deployment_id),
        ("stack_status", &report.stack_status),
        ("service_url", &report.service_url),
        ("cluster_instance_id", &report.cluster_instance_id),
        ("failed_step", &report.failed_step),
        ("failure", &report.failure),
    ];
    for (key, value) in optional {
        if let Some(value) = value {
            let _ = writeln!(toon, "{key} = {}", quoted(value));
        }
    }
    let _ = writeln!(toon, "probe_attempts = {}\n", report.probes.len());

    for probe in &report.probes {
        toon.push_str("[[probes]]\n");
        let _ = writeln!(toon, "attempt = {}", probe.attempt);
        let _ = writeln!(toon, "responded = {}", probe.responded);
        let _ = writeln!(toon, "matched = {}", probe.matched);
        if let Some(error) = &probe.error {
            let _ = writeln!(toon, "error = {}", quoted(&error.to_string()));
        }
        toon.push('\n');
    }

    toon
}

/// Print the report to stdout in human-readable form
pub fn print_report(report: &DeploymentReport) {
    println!("📈 stonks-deploy Report");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Generated: {}", report.timestamp);
    println!("Stack:     {} ({})", report.stack_name, report.region);
    if let Some(id) = &report.deployment_id {
        println!("Stack id:  {id}");
    }
    if let Some(status) = &report.stack_status {
        println!("Status:    {status}");
    }

    if !report.probes.is_empty() {
        println!();
        println!("🩺 Health checks:");
        for probe in &report.probes {
            let status = if probe.matched { "✅" } else { "❌" };
            match &probe.error {
                Some(error) => println!("  {status} #{} {error}", probe.attempt),
                None => println!("  {status} #{} responded", probe.attempt),
            }
        }
    }

    println!();
    match report.outcome {
        "success" => {
            if let Some(url) = &report.service_url {
                println!("✅ stonks is live at {url}");
            }
        }
        "cancelled" => println!(
            "⏹️  Cancelled during {}",
            report.failed_step.as_deref().unwrap_or("startup")
        ),
        _ => {
            println!(
                "❌ Failed during {}: {}",
                report.failed_step.as_deref().unwrap_or("unknown step"),
                report.failure.as_deref().unwrap_or("no detail")
            );
            if let Some(id) = &report.deployment_id {
                println!("   inspect stack {id} (it has not been rolled back)");
            }
        }
    }
}

fn quoted(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(out, "\\u{:04X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}
