// crates/fee-gate-core/tests/audit.rs
// ============================================================================
// Module: Audit Sink Tests
// Description: JSON-line output of the file audit sink.
// Purpose: Ensure audit records are appended, parseable and complete.
// Dependencies: fee-gate-core, tempfile
// ============================================================================
//! ## Overview
//! Writes events through [`fee_gate_core::FileAuditSink`] into a temporary
//! directory and parses each line back as JSON.

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

use std::sync::Arc;

use fee_gate_core::AccessGate;
use fee_gate_core::AuditSeverity;
use fee_gate_core::AuditSink;
use fee_gate_core::FileAuditSink;
use fee_gate_core::GateAuditEvent;
use fee_gate_core::InMemoryBackend;
use fee_gate_core::LifecyclePolicy;
use fee_gate_core::SubscriptionManager;
use fee_gate_core::SubscriptionStatus;
use fee_gate_core::TenantContext;
use fee_gate_core::TenantId;
use fee_gate_core::Timestamp;
use fee_gate_core::Username;
use serde_json::Value;

const T0: Timestamp = Timestamp::from_unix_millis(1_700_000_000_000);

fn read_lines(path: &std::path::Path) -> Vec<Value> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

/// Events are appended as one JSON object per line.
#[test]
fn file_sink_appends_json_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.jsonl");
    let sink = FileAuditSink::new(&path).unwrap();
    let tenant_id = TenantId::from_raw(7);
    sink.record(
        &GateAuditEvent::new("access_denied", AuditSeverity::Warning, T0)
            .with_tenant(tenant_id)
            .with_username(Some(&Username::new("matron")))
            .with_route("/payments")
            .with_reason("tenant_revoked")
            .with_prior_status(SubscriptionStatus::Active),
    );
    sink.record(&GateAuditEvent::new("sweep_completed", AuditSeverity::Info, T0));

    let lines = read_lines(&path);
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["event"], "access_denied");
    assert_eq!(lines[0]["severity"], "warning");
    assert_eq!(lines[0]["tenant_id"], 7);
    assert_eq!(lines[0]["username"], "matron");
    assert_eq!(lines[0]["route"], "/payments");
    assert_eq!(lines[0]["reason"], "tenant_revoked");
    assert_eq!(lines[0]["prior_status"], "active");
    assert_eq!(lines[0]["timestamp_ms"], T0.as_unix_millis());
    assert_eq!(lines[1]["event"], "sweep_completed");
    assert!(lines[1]["tenant_id"].is_null());
}

/// Reopening the same file keeps earlier records.
#[test]
fn file_sink_reopens_in_append_mode() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.jsonl");
    for _ in 0..2 {
        let sink = FileAuditSink::new(&path).unwrap();
        sink.record(&GateAuditEvent::new("tenant_blocked", AuditSeverity::Info, T0));
    }
    assert_eq!(read_lines(&path).len(), 2);
}

/// An auto-lock through the gate lands in the file with its prior status.
#[test]
fn gate_auto_lock_is_written_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gate.jsonl");
    let sink: Arc<dyn AuditSink> = Arc::new(FileAuditSink::new(&path).unwrap());
    let backend = InMemoryBackend::new();
    let manager =
        SubscriptionManager::new(backend.clone(), LifecyclePolicy::default(), Arc::clone(&sink));
    let tenant = manager
        .provision("Nyeri High", &Username::new("nyeri-admin"), &Username::new("ops"), T0)
        .unwrap();
    let gate = AccessGate::new(backend, LifecyclePolicy::default(), sink);
    let context = TenantContext::school_admin("nyeri-admin", Some(tenant.id));
    assert!(!gate.evaluate(&context, "students", T0.plus_days(45)).is_allowed());

    let lines = read_lines(&path);
    let events: Vec<&str> = lines.iter().filter_map(|line| line["event"].as_str()).collect();
    assert_eq!(events, vec!["tenant_provisioned", "tenant_auto_lock"]);
    assert_eq!(lines[1]["prior_status"], "trial");
    assert_eq!(lines[1]["reason"], "subscription_expired");
    assert_eq!(lines[1]["tenant_id"], tenant.id.get());
}
