use std::fs;

use assert_cmd::Command;
use tempfile::TempDir;

fn stonks_deploy(workdir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("stonks-deploy").unwrap();
    cmd.current_dir(workdir.path())
        .env_remove("STONKS_DEPLOY_CONFIG")
        .env_remove("STONKS_STACK_NAME")
        .env_remove("STONKS_AWS_BIN")
        .env_remove("STONKS_API_KEY");
    cmd
}

fn stdout_of(assert: &assert_cmd::assert::Assert) -> String {
    String::from_utf8_lossy(&assert.get_output().stdout).into_owned()
}

fn stderr_of(assert: &assert_cmd::assert::Assert) -> String {
    String::from_utf8_lossy(&assert.get_output().stderr).into_owned()
}

#[test]
fn test_help_lists_subcommands() {
    let dir = TempDir::new().unwrap();
    let assert = stonks_deploy(&dir).arg("--help").assert().success();

    let out = stdout_of(&assert);
    assert!(out.contains("deploy"));
    assert!(out.contains("template"));
    assert!(out.contains("check"));
}

#[test]
fn test_template_prints_stack_document() {
    let dir = TempDir::new().unwrap();
    let assert = stonks_deploy(&dir).arg("template").assert().success();

    let doc: serde_json::Value = serde_json::from_str(&stdout_of(&assert)).unwrap();
    assert_eq!(doc["AWSTemplateFormatVersion"], "2010-09-09");
    assert!(doc["Outputs"]["serviceURL"].is_object());
    assert!(doc["Outputs"]["clusterInstanceId"].is_object());
    assert_eq!(
        doc["Resources"]["k8sInstance"]["Properties"]["InstanceType"],
        "t2.medium"
    );
}

#[test]
fn test_template_reads_config_file() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("stonks-deploy.toml"),
        "[template]\ninstance_type = \"t3.large\"\nnode_port = 31000\n",
    )
    .unwrap();

    let assert = stonks_deploy(&dir).arg("template").assert().success();

    let doc: serde_json::Value = serde_json::from_str(&stdout_of(&assert)).unwrap();
    assert_eq!(
        doc["Resources"]["k8sInstance"]["Properties"]["InstanceType"],
        "t3.large"
    );
    assert_eq!(
        doc["Outputs"]["serviceURL"]["Value"]["Fn::Sub"][0],
        "http://${IP}:31000"
    );
}

#[test]
fn test_malformed_config_fails() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.toml");
    fs::write(&path, "[stack\nname = ").unwrap();

    let assert = stonks_deploy(&dir)
        .arg("template")
        .arg("--config")
        .arg(&path)
        .assert()
        .failure();

    assert!(stderr_of(&assert).contains("Failed to parse"));
}

#[test]
fn test_zero_attempts_rejected() {
    let dir = TempDir::new().unwrap();
    let assert = stonks_deploy(&dir)
        .args(["template", "--max-attempts", "0"])
        .assert()
        .failure();

    assert!(stderr_of(&assert).contains("max_attempts"));
}

#[test]
fn test_check_reports_missing_aws_cli() {
    let dir = TempDir::new().unwrap();
    let assert = stonks_deploy(&dir)
        .args(["check", "--aws-bin", "stonks-deploy-no-such-aws"])
        .assert()
        .code(1);

    assert!(stdout_of(&assert).contains("stonks-deploy-no-such-aws"));
}

#[test]
fn test_deploy_stops_before_prompt_without_aws_cli() {
    let dir = TempDir::new().unwrap();
    let assert = stonks_deploy(&dir)
        .args(["deploy", "--aws-bin", "stonks-deploy-no-such-aws"])
        .assert()
        .failure();

    let err = stderr_of(&assert);
    assert!(err.contains("prerequisites missing"));
    assert!(!stdout_of(&assert).contains("Creating secrets manager secret"));
}
