// crates/fee-gate-core/tests/scoped_isolation.rs
// ============================================================================
// Module: Scoped Query Isolation Tests
// Description: Tenant filtering, owner stamping and ownership violations.
// Purpose: Prove owned-entity access never crosses tenant boundaries.
// Dependencies: fee-gate-core, proptest
// ============================================================================
//! ## Overview
//! Property tests create rows for several tenants in random order and check
//! that every school administrator only ever sees its own rows, while
//! scenario tests cover developer visibility and rejected cross-tenant writes.
//!
//! Security posture: ownership is stamped from the context, never the payload.

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

use fee_gate_core::AuditSeverity;
use fee_gate_core::EntityKind;
use fee_gate_core::InMemoryBackend;
use fee_gate_core::LifecyclePolicy;
use fee_gate_core::MemoryAuditSink;
use fee_gate_core::NoopAuditSink;
use fee_gate_core::OwnedEntity;
use fee_gate_core::OwnedStore;
use fee_gate_core::Payment;
use fee_gate_core::QueryScope;
use fee_gate_core::ScopedError;
use fee_gate_core::Student;
use fee_gate_core::SubscriptionManager;
use fee_gate_core::TenantContext;
use fee_gate_core::TenantFilter;
use fee_gate_core::TenantId;
use fee_gate_core::Timestamp;
use fee_gate_core::Username;
use fee_gate_core::scoped;
use proptest::prelude::*;
use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Helpers
// ============================================================================

const T0: Timestamp = Timestamp::from_unix_millis(1_700_000_000_000);

fn backend_with_tenants(count: usize) -> (InMemoryBackend, Vec<TenantId>) {
    let backend = InMemoryBackend::new();
    let manager = SubscriptionManager::new(
        backend.clone(),
        LifecyclePolicy::default(),
        Arc::new(NoopAuditSink),
    );
    let ids = (0..count)
        .map(|index| {
            manager
                .provision(
                    &format!("School {index}"),
                    &Username::new(format!("admin-{index}")),
                    &Username::new("ops"),
                    T0,
                )
                .unwrap()
                .id
        })
        .collect();
    (backend, ids)
}

fn student(name: &str) -> Student {
    Student {
        admission_number: format!("ADM-{name}"),
        name: name.to_string(),
        sex: "F".to_string(),
        form_class: "Form 1".to_string(),
        parent_phone: None,
    }
}

/// Payload that tries to smuggle its own owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct SmuggledNote {
    body: String,
    #[serde(default)]
    tenant_id: Option<u64>,
}

impl OwnedEntity for SmuggledNote {
    const KIND: EntityKind = EntityKind::Receipt;
}

// ============================================================================
// SECTION: Properties
// ============================================================================

proptest! {
    #[test]
    fn school_admin_only_sees_own_rows(
        creations in proptest::collection::vec((0usize..3, "[a-z]{1,8}"), 0..24)
    ) {
        let (backend, tenants) = backend_with_tenants(3);
        let audit = NoopAuditSink;
        for (index, name) in &creations {
            let context = TenantContext::school_admin("admin", Some(tenants[*index]));
            let query = scoped::<Student, _>(&backend, &context, &audit, T0);
            let record = query.create(student(name)).unwrap();
            prop_assert_eq!(record.tenant_id(), tenants[*index]);
        }
        for (index, tenant_id) in tenants.iter().enumerate() {
            let context = TenantContext::school_admin("admin", Some(*tenant_id));
            let rows = scoped::<Student, _>(&backend, &context, &audit, T0).all().unwrap();
            prop_assert!(rows.iter().all(|row| row.tenant_id() == *tenant_id));
            let expected = creations.iter().filter(|(owner, _)| *owner == index).count();
            prop_assert_eq!(rows.len(), expected);
        }
        let developer = TenantContext::developer("root", None);
        let everything = scoped::<Student, _>(&backend, &developer, &audit, T0).all().unwrap();
        prop_assert_eq!(everything.len(), creations.len());
    }

    #[test]
    fn payload_cannot_choose_owner(smuggled in 1u64..1_000, body in "[a-z ]{0,16}") {
        let (backend, tenants) = backend_with_tenants(2);
        let audit = NoopAuditSink;
        let context = TenantContext::school_admin("admin", Some(tenants[0]));
        let query = scoped::<SmuggledNote, _>(&backend, &context, &audit, T0);
        let record = query
            .create(SmuggledNote {
                body: body.clone(),
                tenant_id: Some(smuggled),
            })
            .unwrap();
        prop_assert_eq!(record.tenant_id(), tenants[0]);
        let stored =
            backend.fetch(EntityKind::Receipt, record.id(), TenantFilter::All).unwrap().unwrap();
        prop_assert_eq!(stored.tenant_id, tenants[0]);
        prop_assert!(stored.fields.get("tenant_id").is_none());
        let reread = query.get(record.id()).unwrap().unwrap();
        prop_assert_eq!(reread.data, SmuggledNote { body, tenant_id: None });
    }
}

// ============================================================================
// SECTION: Scenarios
// ============================================================================

/// School administrators without a tenant see nothing and cannot write.
#[test]
fn unbound_school_admin_sees_nothing() {
    let (backend, tenants) = backend_with_tenants(1);
    let audit = NoopAuditSink;
    let owner = TenantContext::school_admin("admin-0", Some(tenants[0]));
    let row = scoped::<Student, _>(&backend, &owner, &audit, T0).create(student("amy")).unwrap();

    let unbound = TenantContext::school_admin("drifter", None);
    let query = scoped::<Student, _>(&backend, &unbound, &audit, T0);
    assert_eq!(query.scope(), QueryScope::Empty);
    assert!(query.all().unwrap().is_empty());
    assert!(query.filter(|_| true).unwrap().is_empty());
    assert!(query.get(row.id()).unwrap().is_none());
    assert_eq!(
        query.create(student("bob")),
        Err(ScopedError::NoTenantContext(EntityKind::Student))
    );

    let anonymous = TenantContext::Unauthenticated;
    assert!(scoped::<Student, _>(&backend, &anonymous, &audit, T0).all().unwrap().is_empty());
}

/// Developers see every tenant's rows.
#[test]
fn developer_sees_union_of_tenants() {
    let (backend, tenants) = backend_with_tenants(2);
    let audit = NoopAuditSink;
    for (tenant_id, name) in tenants.iter().zip(["alice", "bongani"]) {
        let context = TenantContext::school_admin("admin", Some(*tenant_id));
        scoped::<Student, _>(&backend, &context, &audit, T0).create(student(name)).unwrap();
    }
    let developer = TenantContext::developer("root", None);
    let rows = scoped::<Student, _>(&backend, &developer, &audit, T0).all().unwrap();
    assert_eq!(rows.len(), 2);
    let owners: Vec<TenantId> = rows.iter().map(|row| row.tenant_id()).collect();
    assert_eq!(owners, tenants);

    let impersonating = TenantContext::developer("root", Some(tenants[1]));
    let rows = scoped::<Student, _>(&backend, &impersonating, &audit, T0).all().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].data.name, "bongani");
}

/// Unscoped developers cannot create owned rows.
#[test]
fn unscoped_developer_create_requires_tenant() {
    let (backend, _tenants) = backend_with_tenants(1);
    let audit = NoopAuditSink;
    let developer = TenantContext::developer("root", None);
    let err =
        scoped::<Student, _>(&backend, &developer, &audit, T0).create(student("x")).unwrap_err();
    assert_eq!(err, ScopedError::TenantRequired(EntityKind::Student));
}

/// Cross-tenant updates and deletes are rejected and audited; rows stay unchanged.
#[test]
fn cross_tenant_update_is_ownership_violation() {
    let (backend, tenants) = backend_with_tenants(2);
    let audit = MemoryAuditSink::new();
    let tenant_b = TenantContext::school_admin("admin-1", Some(tenants[1]));
    let victim =
        scoped::<Student, _>(&backend, &tenant_b, &audit, T0).create(student("zola")).unwrap();

    // Tenant A obtains B's record through a developer-scoped listing.
    let developer = TenantContext::developer("root", None);
    let leaked = scoped::<Student, _>(&backend, &developer, &audit, T0)
        .get(victim.id())
        .unwrap()
        .unwrap();
    let tenant_a = TenantContext::school_admin("admin-0", Some(tenants[0]));
    let query = scoped::<Student, _>(&backend, &tenant_a, &audit, T0);

    let err = query.update(&leaked, student("overwritten")).unwrap_err();
    assert!(matches!(err, ScopedError::OwnershipViolation { owner, .. } if owner == tenants[1]));
    assert_eq!(err.public_message(), "Record not found or access denied.");
    let err = query.delete(&leaked).unwrap_err();
    assert!(matches!(err, ScopedError::OwnershipViolation { .. }));

    let stored = scoped::<Student, _>(&backend, &tenant_b, &audit, T0)
        .get(victim.id())
        .unwrap()
        .unwrap();
    assert_eq!(stored.data, student("zola"));
    let events = audit.events();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|event| event.severity == AuditSeverity::Critical));
    assert!(events.iter().all(|event| event.tenant_id == Some(tenants[0])));
}

/// Owners can update and delete their rows; owner never changes.
#[test]
fn owner_update_and_delete_round_trip() {
    let (backend, tenants) = backend_with_tenants(1);
    let audit = NoopAuditSink;
    let context = TenantContext::school_admin("admin-0", Some(tenants[0]));
    let query = scoped::<Payment, _>(&backend, &context, &audit, T0);
    let payment = Payment {
        admission_number: "ADM-1".to_string(),
        fee_type: "pta".to_string(),
        amount_minor: 25_000,
        payment_reference: None,
        paid_at: T0,
    };
    let created = query.create(payment.clone()).unwrap();
    let updated = query
        .update(&created, Payment {
            amount_minor: 30_000,
            ..payment
        })
        .unwrap();
    assert_eq!(updated.tenant_id(), tenants[0]);
    assert_eq!(query.get(created.id()).unwrap().unwrap().data.amount_minor, 30_000);
    let big = query.filter(|row| row.amount_minor > 26_000).unwrap();
    assert_eq!(big.len(), 1);
    query.delete(&updated).unwrap();
    assert!(query.all().unwrap().is_empty());
    let err = query.delete(&updated).unwrap_err();
    assert!(matches!(err, ScopedError::NotFound { .. }));
}

/// Entity kinds are partitioned: a student id never resolves as a payment.
#[test]
fn kinds_do_not_alias() {
    let (backend, tenants) = backend_with_tenants(1);
    let audit = NoopAuditSink;
    let context = TenantContext::school_admin("admin-0", Some(tenants[0]));
    let created =
        scoped::<Student, _>(&backend, &context, &audit, T0).create(student("kim")).unwrap();
    let payments = scoped::<Payment, _>(&backend, &context, &audit, T0);
    assert!(payments.get(created.id()).unwrap().is_none());
    assert!(payments.all().unwrap().is_empty());
}
