// crates/fee-gate-store-sqlite/tests/sqlite_store.rs
// ============================================================================
// Module: SQLite Store Tests
// Description: Durability, atomicity and isolation of the SQLite store.
// Purpose: Validate directory, ledger and owned-record behavior on disk.
// Dependencies: fee-gate-core, fee-gate-store-sqlite, rusqlite, tempfile
// ============================================================================
//! ## Overview
//! Every test opens a fresh database inside a temporary directory:
//! - provisioning is all-or-nothing and rejects duplicate usernames
//! - auto-lock is a conditional, idempotent transition
//! - tenant deletion cascades to every dependent row
//! - owned-record reads and guarded writes never cross tenants
//! - corrupted rows and unknown schema versions fail closed

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
    reason = "Test-only assertions and helpers are permitted."
)]

use std::path::PathBuf;
use std::sync::Arc;

use fee_gate_core::AccessGate;
use fee_gate_core::Admission;
use fee_gate_core::DenialReason;
use fee_gate_core::DirectoryError;
use fee_gate_core::EntityKind;
use fee_gate_core::ExemptRoutes;
use fee_gate_core::LifecycleError;
use fee_gate_core::LifecyclePolicy;
use fee_gate_core::LockOutcome;
use fee_gate_core::NamespaceBinding;
use fee_gate_core::NamespaceRouter;
use fee_gate_core::NewNotification;
use fee_gate_core::NewStoredRecord;
use fee_gate_core::NoopAuditSink;
use fee_gate_core::NotificationKind;
use fee_gate_core::OwnedStore;
use fee_gate_core::OwnershipGuard;
use fee_gate_core::Provisioning;
use fee_gate_core::RenewalRequest;
use fee_gate_core::RequestPipeline;
use fee_gate_core::Role;
use fee_gate_core::RouterError;
use fee_gate_core::Session;
use fee_gate_core::StoreError;
use fee_gate_core::Student;
use fee_gate_core::SubscriptionLedger;
use fee_gate_core::SubscriptionManager;
use fee_gate_core::SubscriptionPlan;
use fee_gate_core::SubscriptionStatus;
use fee_gate_core::TenantDirectory;
use fee_gate_core::TenantFilter;
use fee_gate_core::TenantId;
use fee_gate_core::Timestamp;
use fee_gate_core::Username;
use fee_gate_core::WriteOutcome;
use fee_gate_store_sqlite::SqliteStore;
use fee_gate_store_sqlite::SqliteStoreConfig;
use fee_gate_store_sqlite::SqliteStoreError;
use rusqlite::Connection;
use rusqlite::params;
use serde_json::json;
use tempfile::TempDir;

// ============================================================================
// SECTION: Helpers
// ============================================================================

const T0: Timestamp = Timestamp::from_unix_millis(1_700_000_000_000);

fn db_path(dir: &TempDir) -> PathBuf {
    dir.path().join("fee-gate.db")
}

fn open(dir: &TempDir) -> SqliteStore {
    SqliteStore::new(&SqliteStoreConfig::for_path(db_path(dir))).unwrap()
}

fn provisioning(name: &str, admin: &str) -> Provisioning {
    Provisioning {
        name: name.to_string(),
        admin_username: Username::new(admin),
        plan: SubscriptionPlan::Trial,
        start: T0,
        end: Some(T0.plus_days(30)),
        created_by: Username::new("ops"),
        notes: "Initial 30-day trial subscription".to_string(),
    }
}

fn row(tenant_id: TenantId, name: &str) -> NewStoredRecord {
    NewStoredRecord {
        kind: EntityKind::Student,
        tenant_id,
        fields: json!({ "admission_number": format!("ADM-{name}"), "name": name }),
    }
}

// ============================================================================
// SECTION: Directory
// ============================================================================

/// Provisioning writes the tenant, its admin and its trial record together.
#[test]
fn provision_creates_tenant_admin_and_trial() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    let tenant = store.provision(&provisioning("Moi Girls", "moi-admin")).unwrap();
    assert!(tenant.is_active);
    assert!(!tenant.is_blocked);
    assert_eq!(tenant.subscription_status, SubscriptionStatus::Trial);
    assert_eq!(tenant.trial_start, Some(T0));
    assert_eq!(tenant.subscription_end, None);

    let admin = store.principal(&Username::new("moi-admin")).unwrap().unwrap();
    assert_eq!(admin.role, Role::SchoolAdmin);
    assert_eq!(admin.tenant_id, Some(tenant.id));
    assert!(admin.must_change_password);
    assert_eq!(store.principals(tenant.id).unwrap(), vec![admin]);

    let subscriptions = store.subscriptions(tenant.id).unwrap();
    assert_eq!(subscriptions.len(), 1);
    assert_eq!(subscriptions[0].end, Some(T0.plus_days(30)));
    assert_eq!(subscriptions[0].notes.as_deref(), Some("Initial 30-day trial subscription"));
    assert!(subscriptions[0].is_active);
}

/// A duplicate admin username rolls back the whole provisioning.
#[test]
fn provision_conflict_leaves_nothing_behind() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    store.provision(&provisioning("First", "shared-admin")).unwrap();
    let err = store.provision(&provisioning("Second", "shared-admin")).unwrap_err();
    assert!(matches!(err, DirectoryError::Conflict(_)));
    let tenants = store.tenants().unwrap();
    assert_eq!(tenants.len(), 1);
    assert_eq!(tenants[0].name, "First");
}

/// The auto-lock transition applies once and reports later calls as no-ops.
#[test]
fn lock_expired_is_conditional() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    let tenant = store.provision(&provisioning("Lapsing", "lapsing-admin")).unwrap();
    let later = T0.plus_days(31);
    assert_eq!(
        store.lock_expired(tenant.id, later).unwrap(),
        LockOutcome::Locked {
            prior_status: SubscriptionStatus::Trial,
        }
    );
    assert_eq!(store.lock_expired(tenant.id, later).unwrap(), LockOutcome::AlreadyBlocked);
    let missing = TenantId::from_raw(999).unwrap();
    assert_eq!(store.lock_expired(missing, later).unwrap(), LockOutcome::Missing);
    let locked = store.tenant(tenant.id).unwrap().unwrap();
    assert!(locked.is_blocked);
    assert_eq!(locked.subscription_status, SubscriptionStatus::Expired);
    assert_eq!(locked.updated_at, later);
}

/// Blocking a missing tenant reports not found.
#[test]
fn set_blocked_requires_tenant() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    let missing = TenantId::from_raw(42).unwrap();
    let err = store.set_blocked(missing, true, SubscriptionStatus::Blocked, T0).unwrap_err();
    assert_eq!(err, DirectoryError::NotFound(missing));
}

/// Deleting a tenant removes its principals, history and owned rows.
#[test]
fn delete_tenant_cascades() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    let doomed = store.provision(&provisioning("Doomed", "doomed-admin")).unwrap();
    let survivor = store.provision(&provisioning("Survivor", "survivor-admin")).unwrap();
    store.insert(&row(doomed.id, "a")).unwrap();
    store.insert(&row(survivor.id, "b")).unwrap();
    store
        .record_notification(&NewNotification::reminder(
            doomed.id,
            NotificationKind::SubscriptionReminder,
            3,
            T0,
        ))
        .unwrap();

    assert!(store.delete_tenant(doomed.id).unwrap());
    assert!(!store.delete_tenant(doomed.id).unwrap());
    assert!(store.tenant(doomed.id).unwrap().is_none());
    assert!(store.principal(&Username::new("doomed-admin")).unwrap().is_none());
    assert!(store.subscriptions(doomed.id).unwrap().is_empty());
    assert!(store.notifications(doomed.id, 10).unwrap().is_empty());
    let remaining = store.list(EntityKind::Student, TenantFilter::All).unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].tenant_id, survivor.id);
}

// ============================================================================
// SECTION: Ledger
// ============================================================================

/// Renewal deactivates prior records and unblocks the tenant atomically.
#[test]
fn renewal_replaces_active_subscription() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    let manager = SubscriptionManager::new(
        store.clone(),
        LifecyclePolicy::default(),
        Arc::new(NoopAuditSink),
    );
    let tenant = manager
        .provision("Renewing", &Username::new("renew-admin"), &Username::new("ops"), T0)
        .unwrap();
    store.lock_expired(tenant.id, T0.plus_days(31)).unwrap();
    let now = T0.plus_days(32);
    let (renewed, _) = manager
        .renew(
            RenewalRequest {
                tenant_id: tenant.id,
                plan: SubscriptionPlan::TwelveMonths,
                amount_paid_minor: 1_200_000,
                payment_reference: Some("MPESA-XYZ".to_string()),
                notes: None,
            },
            &Username::new("ops"),
            now,
        )
        .unwrap();
    assert!(!renewed.is_blocked);
    assert_eq!(renewed.subscription_status, SubscriptionStatus::Active);
    assert_eq!(renewed.subscription_end, Some(now.plus_days(365)));

    let history = store.subscriptions(tenant.id).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].plan, SubscriptionPlan::TwelveMonths);
    assert!(history[0].is_active);
    assert!(!history[1].is_active);
    assert_eq!(history[0].payment_reference.as_deref(), Some("MPESA-XYZ"));
}

/// Reminder notifications stamp the tenant; auto-expiry notices do not.
#[test]
fn notifications_stamp_last_sent() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    let tenant = store.provision(&provisioning("Reminded", "reminded-admin")).unwrap();
    let sent = T0.plus_days(25);
    let record = store
        .record_notification(&NewNotification::reminder(
            tenant.id,
            NotificationKind::SubscriptionReminder,
            5,
            sent,
        ))
        .unwrap();
    assert_eq!(record.days_remaining, Some(5));
    assert_eq!(store.tenant(tenant.id).unwrap().unwrap().last_notification_sent, Some(sent));

    store
        .record_notification(&NewNotification {
            tenant_id: tenant.id,
            kind: NotificationKind::SubscriptionExpiredAuto,
            message: "Subscription expired".to_string(),
            days_remaining: None,
            sent_at: sent.plus_days(10),
        })
        .unwrap();
    assert_eq!(store.tenant(tenant.id).unwrap().unwrap().last_notification_sent, Some(sent));
    let recent = store.notifications(tenant.id, 1).unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].kind, NotificationKind::SubscriptionExpiredAuto);

    let missing = TenantId::from_raw(77).unwrap();
    let err = store
        .record_notification(&NewNotification::reminder(
            missing,
            NotificationKind::SubscriptionReminder,
            1,
            sent,
        ))
        .unwrap_err();
    assert_eq!(err, DirectoryError::NotFound(missing));
}

/// A sweep lock and its log entry commit together or not at all.
#[test]
fn sweep_lock_and_notice_commit_together() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    let manager = SubscriptionManager::new(
        store.clone(),
        LifecyclePolicy::default(),
        Arc::new(NoopAuditSink),
    );
    let tenant = store.provision(&provisioning("Lapsed", "lapsed-admin")).unwrap();
    let later = T0.plus_days(31);
    let ops = Username::new("ops");

    let raw = Connection::open(db_path(&dir)).unwrap();
    raw.execute_batch(
        "CREATE TRIGGER reject_notifications BEFORE INSERT ON notifications BEGIN SELECT \
         RAISE(ABORT, 'notification log offline'); END;",
    )
    .unwrap();
    let err = manager.sweep(&ops, later).unwrap_err();
    assert!(matches!(err, LifecycleError::Directory(_)));
    let untouched = store.tenant(tenant.id).unwrap().unwrap();
    assert!(!untouched.is_blocked);
    assert_eq!(untouched.subscription_status, SubscriptionStatus::Trial);
    assert!(store.notifications(tenant.id, 10).unwrap().is_empty());

    raw.execute_batch("DROP TRIGGER reject_notifications;").unwrap();
    drop(raw);
    let report = manager.sweep(&ops, later).unwrap();
    assert_eq!(report.locked, vec![tenant.id]);
    let locked = store.tenant(tenant.id).unwrap().unwrap();
    assert!(locked.is_blocked);
    assert_eq!(locked.subscription_status, SubscriptionStatus::Expired);
    let log = store.notifications(tenant.id, 10).unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].kind, NotificationKind::SubscriptionExpiredAuto);
    assert_eq!(log[0].days_remaining, Some(0));
    assert_eq!(log[0].sent_at, later);
}

/// A notice for an already blocked tenant is not written.
#[test]
fn lock_with_notice_skips_blocked_tenants() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    let tenant = store.provision(&provisioning("Blocked", "blocked-admin")).unwrap();
    store.set_blocked(tenant.id, true, SubscriptionStatus::Blocked, T0).unwrap();
    let notice = NewNotification::auto_lock(tenant.id, T0.plus_days(31));
    assert_eq!(store.lock_expired_with_notice(&notice).unwrap(), LockOutcome::AlreadyBlocked);
    assert!(store.notifications(tenant.id, 10).unwrap().is_empty());
    let missing = NewNotification::auto_lock(TenantId::from_raw(404).unwrap(), T0);
    assert_eq!(store.lock_expired_with_notice(&missing).unwrap(), LockOutcome::Missing);
}

// ============================================================================
// SECTION: Owned Records
// ============================================================================

/// Reads filter by owner and guarded writes reject foreign rows.
#[test]
fn owned_rows_are_tenant_filtered() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    let a = store.provision(&provisioning("A", "a-admin")).unwrap();
    let b = store.provision(&provisioning("B", "b-admin")).unwrap();
    let a_row = store.insert(&row(a.id, "ann")).unwrap();
    let b_row = store.insert(&row(b.id, "ben")).unwrap();

    let visible = store.list(EntityKind::Student, TenantFilter::Tenant(a.id)).unwrap();
    assert_eq!(visible, vec![a_row.clone()]);
    let foreign = store.fetch(EntityKind::Student, b_row.id, TenantFilter::Tenant(a.id)).unwrap();
    assert!(foreign.is_none());
    assert!(store.fetch(EntityKind::Payment, a_row.id, TenantFilter::All).unwrap().is_none());
    assert_eq!(store.list(EntityKind::Student, TenantFilter::All).unwrap().len(), 2);

    let outcome = store
        .update(EntityKind::Student, b_row.id, OwnershipGuard::Owner(a.id), &json!({ "name": "x" }))
        .unwrap();
    assert_eq!(outcome, WriteOutcome::OwnerMismatch {
        owner: b.id
    });
    let outcome = store.delete(EntityKind::Student, b_row.id, OwnershipGuard::Owner(a.id)).unwrap();
    assert_eq!(outcome, WriteOutcome::OwnerMismatch {
        owner: b.id
    });
    let untouched = store.fetch(EntityKind::Student, b_row.id, TenantFilter::All).unwrap().unwrap();
    assert_eq!(untouched, b_row);

    let outcome = store
        .update(
            EntityKind::Student,
            a_row.id,
            OwnershipGuard::Owner(a.id),
            &json!({ "name": "anne" }),
        )
        .unwrap();
    assert_eq!(outcome, WriteOutcome::Applied);
    let updated =
        store.fetch(EntityKind::Student, a_row.id, TenantFilter::Tenant(a.id)).unwrap().unwrap();
    assert_eq!(updated.fields, json!({ "name": "anne" }));
    assert_eq!(updated.tenant_id, a.id);
}

/// Inserting for an unknown tenant is rejected.
#[test]
fn insert_requires_existing_tenant() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    let err = store.insert(&row(TenantId::from_raw(5).unwrap(), "ghost")).unwrap_err();
    assert!(matches!(err, StoreError::Invalid(_)));
}

// ============================================================================
// SECTION: Durability
// ============================================================================

/// Data survives reopening the database file.
#[test]
fn reopen_preserves_state() {
    let dir = TempDir::new().unwrap();
    let tenant = {
        let store = open(&dir);
        let tenant = store.provision(&provisioning("Durable", "durable-admin")).unwrap();
        store.insert(&row(tenant.id, "kept")).unwrap();
        tenant
    };
    let store = open(&dir);
    assert_eq!(store.tenant(tenant.id).unwrap(), Some(tenant.clone()));
    assert_eq!(store.list(EntityKind::Student, TenantFilter::Tenant(tenant.id)).unwrap().len(), 1);
}

/// Unknown schema versions are refused.
#[test]
fn unsupported_schema_version_fails_closed() {
    let dir = TempDir::new().unwrap();
    drop(open(&dir));
    let raw = Connection::open(db_path(&dir)).unwrap();
    raw.execute("UPDATE store_meta SET version = ?1", params![99_i64]).unwrap();
    drop(raw);
    let err = SqliteStore::new(&SqliteStoreConfig::for_path(db_path(&dir))).err().unwrap();
    assert!(matches!(err, SqliteStoreError::VersionMismatch(_)));
}

/// Rows with unknown labels are reported invalid rather than guessed.
#[test]
fn corrupted_status_label_fails_closed() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    let tenant = store.provision(&provisioning("Tampered", "tampered-admin")).unwrap();
    let raw = Connection::open(db_path(&dir)).unwrap();
    raw.execute(
        "UPDATE tenants SET subscription_status = 'forever' WHERE id = ?1",
        params![tenant.id.as_i64()],
    )
    .unwrap();
    drop(raw);
    let err = store.tenant(tenant.id).unwrap_err();
    assert!(matches!(err, DirectoryError::Invalid(_)));
}

/// Directories are rejected as store paths.
#[test]
fn directory_path_is_rejected() {
    let dir = TempDir::new().unwrap();
    let config = SqliteStoreConfig::for_path(dir.path().to_path_buf());
    let err = SqliteStore::new(&config).err().unwrap();
    assert!(matches!(err, SqliteStoreError::Invalid(_)));
}

// ============================================================================
// SECTION: Pipeline
// ============================================================================

/// Activation fails for tenants that do not exist.
#[test]
fn activation_checks_tenant() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    assert!(store.activate(NamespaceBinding::Shared).is_ok());
    let missing = TenantId::from_raw(3).unwrap();
    let err = store.activate(NamespaceBinding::Tenant(missing)).err().unwrap();
    assert!(matches!(err, RouterError::Activation { .. }));
}

/// The full request pipeline runs against the SQLite backend.
#[test]
fn pipeline_over_sqlite() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    let manager = SubscriptionManager::new(
        store.clone(),
        LifecyclePolicy::default(),
        Arc::new(NoopAuditSink),
    );
    let tenant = manager
        .provision("Pipeline", &Username::new("pipe-admin"), &Username::new("ops"), T0)
        .unwrap();
    let gate = AccessGate::new(store.clone(), LifecyclePolicy::default(), Arc::new(NoopAuditSink));
    let pipeline =
        RequestPipeline::new(gate, store.clone(), ExemptRoutes::default(), Arc::new(NoopAuditSink));
    let session = Session::school_admin("pipe-admin", Some(tenant.id));

    let Admission::Admitted(request) = pipeline.admit(&session, "students", T0.plus_days(1)) else {
        panic!("expected admission");
    };
    let created = request
        .scoped::<Student>()
        .create(Student {
            admission_number: "ADM-1".to_string(),
            name: "Wanjiru".to_string(),
            sex: "F".to_string(),
            form_class: "Form 2".to_string(),
            parent_phone: None,
        })
        .unwrap();
    assert_eq!(created.tenant_id(), tenant.id);
    drop(request);

    let denied = pipeline.admit(&session, "students", T0.plus_days(40));
    assert_eq!(
        denied.denial().map(|denial| denial.reason),
        Some(DenialReason::SubscriptionExpired)
    );
    assert!(store.tenant(tenant.id).unwrap().unwrap().is_blocked);
}
