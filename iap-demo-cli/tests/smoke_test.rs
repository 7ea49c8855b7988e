//! Smoke tests for iap-demo-cli
//!
//! These run the built binary against the sandbox store; no device or
//! network is needed.

use std::io::Write;
use std::process::{Command, Output};

fn run(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_iap-demo"))
        .args(args)
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute command")
}

fn stdout(output: &Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    if !output.status.success() {
        eprintln!("stdout: {}", stdout);
        eprintln!("stderr: {}", String::from_utf8_lossy(&output.stderr));
    }
    stdout
}

/// Test that the CLI can show help
#[test]
fn test_cli_help() {
    let output = run(&["--help"]);
    let text = stdout(&output);
    assert!(output.status.success());
    assert!(text.contains("scenario"), "Help should mention 'scenario'");
    assert!(text.contains("restore"), "Help should mention 'restore'");
}

#[test]
fn test_catalog_lists_coins() {
    let output = run(&["catalog", "coins_100"]);
    let text = stdout(&output);
    assert!(output.status.success());
    assert!(text.contains("100 Coins"));
    assert!(text.contains("$0.99"));
    assert!(text.contains("0.990000 USD"));
}

#[test]
fn test_scenario_on_both_platforms() {
    for platform in ["play", "storekit"] {
        let output = run(&["scenario", "--platform", platform]);
        let text = stdout(&output);
        assert!(output.status.success(), "scenario failed on {}", platform);
        assert!(text.contains("Scenario complete"));
        assert!(text.contains("closed"));
    }
}

#[test]
fn test_cancelled_purchase_is_not_an_error() {
    let output = run(&["buy", "premium", "--cancel", "--platform", "storekit"]);
    let text = stdout(&output);
    assert!(output.status.success());
    assert!(text.contains("cancelled"));
}

#[test]
fn test_unknown_product_fails() {
    let output = run(&["buy", "no_such_product"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Unknown product"));
}

#[test]
fn test_restore_with_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{"owned": [
            {{"product_id": "premium", "token": "tok-premium"}},
            {{"product_id": "gold_monthly", "token": "tok-gold"}}
        ]}}"#
    )
    .unwrap();
    let path = file.path().to_str().unwrap();

    let output = run(&["restore", "--config", path]);
    let text = stdout(&output);
    assert!(output.status.success());
    assert!(text.contains("Restored purchases (2)"));
    assert!(text.contains("Store acknowledgements: 2"));
}
