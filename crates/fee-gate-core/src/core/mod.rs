// crates/fee-gate-core/src/core/mod.rs
// ============================================================================
// Module: Fee Gate Core Types
// Description: Canonical tenant, principal, subscription and entity types.
// Purpose: Provide stable, serializable types shared by every backend.
// Dependencies: serde, serde_json, time
// ============================================================================

//! ## Overview
//! Core types describe tenants, principals, the request-scoped tenant
//! context, subscription plans and the tenant-owned entity records. They are
//! backend-agnostic; storage crates map them to rows.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod entity;
pub mod identifiers;
pub mod principal;
pub mod subscription;
pub mod tenant;
pub mod time;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use entity::EntityKind;
pub use entity::Expenditure;
pub use entity::FundConfiguration;
pub use entity::NewStoredRecord;
pub use entity::OwnedEntity;
pub use entity::Payment;
pub use entity::Receipt;
pub use entity::Record;
pub use entity::StoredRecord;
pub use entity::Student;
pub use identifiers::RecordId;
pub use identifiers::TenantId;
pub use identifiers::Username;
pub use principal::NewPrincipal;
pub use principal::PrincipalRecord;
pub use principal::Role;
pub use principal::Session;
pub use principal::TenantContext;
pub use subscription::LifecyclePolicy;
pub use subscription::NewNotification;
pub use subscription::NotificationKind;
pub use subscription::NotificationRecord;
pub use subscription::Renewal;
pub use subscription::RenewalRequest;
pub use subscription::SubscriptionPlan;
pub use subscription::SubscriptionRecord;
pub use subscription::UNLIMITED_DAYS;
pub use tenant::NewTenant;
pub use tenant::SubscriptionStatus;
pub use tenant::Tenant;
pub use tenant::UnknownLabel;
pub use time::Timestamp;
