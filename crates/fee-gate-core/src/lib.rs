// crates/fee-gate-core/src/lib.rs
// ============================================================================
// Module: Fee Gate Core Library
// Description: Public API surface for the tenant isolation and access gate.
// Purpose: Expose core types, storage interfaces, runtime and audit sinks.
// Dependencies: crate::{audit, core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! Fee Gate is the multi-tenant isolation and access-control layer of a
//! multi-school fee-collection application. It resolves the tenant of each
//! request, denies revoked or expired schools before any data access,
//! restricts every owned-entity read and write to the request's tenant, and
//! binds storage connections to per-tenant namespaces. It is an in-process
//! library with no wire protocol; storage engines plug in through
//! [`interfaces`].

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod audit;
pub mod core;
pub mod interfaces;
pub mod runtime;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use core::*;

pub use audit::AuditSeverity;
pub use audit::AuditSink;
pub use audit::FileAuditSink;
pub use audit::GateAuditEvent;
pub use audit::MemoryAuditSink;
pub use audit::NoopAuditSink;
pub use audit::StderrAuditSink;
pub use interfaces::DirectoryError;
pub use interfaces::LockOutcome;
pub use interfaces::NamespaceBinding;
pub use interfaces::NamespaceRouter;
pub use interfaces::OwnedStore;
pub use interfaces::OwnershipGuard;
pub use interfaces::Provisioning;
pub use interfaces::RouterError;
pub use interfaces::StoreError;
pub use interfaces::SubscriptionLedger;
pub use interfaces::TenantDirectory;
pub use interfaces::TenantFilter;
pub use interfaces::WriteOutcome;
pub use runtime::AccessGate;
pub use runtime::AccessGrant;
pub use runtime::ActiveRequest;
pub use runtime::Admission;
pub use runtime::Denial;
pub use runtime::DEFAULT_EXEMPT_ROUTES;
pub use runtime::DenialReason;
pub use runtime::ExemptRoutes;
pub use runtime::GateDecision;
pub use runtime::InMemoryBackend;
pub use runtime::LifecycleError;
pub use runtime::QueryScope;
pub use runtime::RequestPipeline;
pub use runtime::ScopedError;
pub use runtime::ScopedQuery;
pub use runtime::SubscriptionManager;
pub use runtime::SweepReport;
pub use runtime::TenantOverview;
pub use runtime::resolve;
pub use runtime::scoped;
