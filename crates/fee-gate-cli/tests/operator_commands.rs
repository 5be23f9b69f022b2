// crates/fee-gate-cli/tests/operator_commands.rs
// ============================================================================
// Module: CLI Operator Command Tests
// Description: Integration tests for the fee-gate binary over SQLite.
// Purpose: Ensure lifecycle commands and gate checks behave end to end.
// Dependencies: fee-gate-cli binary, serde_json, tempfile
// ============================================================================
//! ## Overview
//! Runs the `fee-gate` binary against a temporary `SQLite` database and
//! checks the JSON it prints and the exit status of `check`.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::process::Command;
use std::process::Output;

use serde_json::Value;

// ============================================================================
// SECTION: Helpers
// ============================================================================

const DAY_MS: i64 = 86_400_000;
const T0: i64 = 1_700_000_000_000;

fn fee_gate_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_fee-gate"))
}

fn write_config(root: &Path) -> PathBuf {
    let path = root.join("fee-gate.toml");
    fs::write(
        &path,
        format!(
            "[storage.sqlite]\npath = \"{}\"\n\n[audit]\nsink = \"file\"\npath = \"{}\"\n",
            root.join("fees.db").display(),
            root.join("audit.jsonl").display()
        ),
    )
    .expect("write config");
    path
}

fn fee_gate(config: &Path, now_ms: i64, args: &[&str]) -> Output {
    Command::new(fee_gate_bin())
        .arg("--config")
        .arg(config)
        .args(["--now-ms", &now_ms.to_string()])
        .args(args)
        .output()
        .expect("run fee-gate")
}

fn stdout_json(output: &Output) -> Value {
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    serde_json::from_slice(&output.stdout).expect("json output")
}

fn stdout_text(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

// ============================================================================
// SECTION: Tests
// ============================================================================

/// A provisioned school is allowed until its trial lapses, then locked.
#[test]
fn cli_trial_school_is_locked_after_expiry() {
    let root = tempfile::tempdir().unwrap();
    let config = write_config(root.path());

    let tenant = stdout_json(&fee_gate(&config, T0, &[
        "provision",
        "--name",
        "Kisumu Girls",
        "--admin",
        "kisumu-admin",
    ]));
    assert_eq!(tenant["subscription_status"], "trial");
    let id = tenant["id"].as_u64().unwrap().to_string();

    let allowed = fee_gate(&config, T0 + DAY_MS, &[
        "check",
        "students",
        "--username",
        "kisumu-admin",
        "--tenant",
        &id,
    ]);
    assert!(allowed.status.success());
    assert!(stdout_text(&allowed).starts_with("allowed: tenant"));

    let denied = fee_gate(&config, T0 + 31 * DAY_MS, &[
        "check",
        "students",
        "--username",
        "kisumu-admin",
        "--tenant",
        &id,
    ]);
    assert!(!denied.status.success());
    assert!(stdout_text(&denied).starts_with("denied: subscription_expired"));

    let shown = stdout_json(&fee_gate(&config, T0 + 31 * DAY_MS, &["show", &id]));
    assert_eq!(shown["tenant"]["subscription_status"], "expired");
    assert_eq!(shown["admin"]["username"], "kisumu-admin");

    let audit = fs::read_to_string(root.path().join("audit.jsonl")).unwrap();
    assert!(audit.contains("tenant_auto_lock"));
}

/// Renewal restores access and block revokes it regardless of entitlement.
#[test]
fn cli_renew_and_block_change_gate_outcome() {
    let root = tempfile::tempdir().unwrap();
    let config = write_config(root.path());
    let tenant = stdout_json(&fee_gate(&config, T0, &[
        "provision",
        "--name",
        "Meru Academy",
        "--admin",
        "meru-admin",
    ]));
    let id = tenant["id"].as_u64().unwrap().to_string();
    let later = T0 + 40 * DAY_MS;

    let renewed = stdout_json(&fee_gate(&config, later, &[
        "renew",
        &id,
        "--plan",
        "12months",
        "--amount",
        "1500000",
        "--reference",
        "MPESA-123",
    ]));
    assert_eq!(renewed["subscription_status"], "active");
    assert_eq!(renewed["is_blocked"], false);

    let check = ["check", "payments", "--username", "meru-admin", "--tenant", id.as_str()];
    assert!(fee_gate(&config, later, &check).status.success());

    let blocked = stdout_json(&fee_gate(&config, later, &["block", &id]));
    assert_eq!(blocked["is_blocked"], true);
    let denied = fee_gate(&config, later, &check);
    assert!(stdout_text(&denied).starts_with("denied: tenant_revoked"));

    stdout_json(&fee_gate(&config, later, &["unblock", &id]));
    assert!(fee_gate(&config, later, &check).status.success());
}

/// Exempt routes and malformed sessions are reported without touching tenants.
#[test]
fn cli_check_reports_exempt_and_unauthenticated() {
    let root = tempfile::tempdir().unwrap();
    let config = write_config(root.path());

    let exempt = fee_gate(&config, T0, &["check", "/static/site.css"]);
    assert!(exempt.status.success());
    assert_eq!(stdout_text(&exempt), "exempt: /static/site.css");

    let anonymous = fee_gate(&config, T0, &["check", "students"]);
    assert!(stdout_text(&anonymous).starts_with("denied: unauthenticated"));

    let zero_tenant =
        fee_gate(&config, T0, &["check", "students", "--username", "x", "--tenant", "0"]);
    assert!(stdout_text(&zero_tenant).starts_with("denied: unauthenticated"));

    let developer =
        fee_gate(&config, T0, &["check", "students", "--username", "dev", "--role", "developer"]);
    assert!(developer.status.success());
    assert_eq!(stdout_text(&developer), "allowed: all schools");
}

/// Sweep locks lapsed schools and delete requires confirmation.
#[test]
fn cli_sweep_and_delete() {
    let root = tempfile::tempdir().unwrap();
    let config = write_config(root.path());
    let tenant = stdout_json(&fee_gate(&config, T0, &[
        "provision",
        "--name",
        "Eldoret Day",
        "--admin",
        "eldoret-admin",
    ]));
    let id = tenant["id"].as_u64().unwrap();

    let report = stdout_json(&fee_gate(&config, T0 + 35 * DAY_MS, &["sweep"]));
    assert_eq!(report["locked"], serde_json::json!([id]));

    let refused = fee_gate(&config, T0, &["delete", &id.to_string()]);
    assert!(!refused.status.success());
    assert!(String::from_utf8_lossy(&refused.stderr).contains("--yes"));

    let deleted = fee_gate(&config, T0, &["delete", &id.to_string(), "--yes"]);
    assert!(deleted.status.success());
    let listed = stdout_json(&fee_gate(&config, T0, &["list", "--json"]));
    assert_eq!(listed, serde_json::json!([]));
}
