// crates/fee-gate-core/src/interfaces/mod.rs
// ============================================================================
// Module: Fee Gate Interfaces
// Description: Backend-agnostic storage and namespace routing contracts.
// Purpose: Define the surfaces the gate, scoped builder and lifecycle manager use.
// Dependencies: crate::core, serde_json, thiserror
// ============================================================================

//! ## Overview
//! Interfaces separate the gate runtime from storage engines. Global entities
//! (tenants, principals, subscriptions, notifications) live behind
//! [`TenantDirectory`] and [`SubscriptionLedger`]; tenant-owned rows live
//! behind [`OwnedStore`]; [`NamespaceRouter`] binds an [`OwnedStore`] handle to
//! a tenant namespace for one request. Implementations must fail closed on
//! missing or invalid data and must apply every multi-row mutation
//! atomically.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

use crate::core::EntityKind;
use crate::core::NewNotification;
use crate::core::NewStoredRecord;
use crate::core::NotificationRecord;
use crate::core::PrincipalRecord;
use crate::core::RecordId;
use crate::core::Renewal;
use crate::core::StoredRecord;
use crate::core::SubscriptionPlan;
use crate::core::SubscriptionRecord;
use crate::core::SubscriptionStatus;
use crate::core::Tenant;
use crate::core::TenantId;
use crate::core::Timestamp;
use crate::core::Username;

// ============================================================================
// SECTION: Tenant Directory
// ============================================================================

/// Tenant directory and subscription ledger errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    /// Backend could not be reached or failed mid-operation.
    #[error("tenant directory unavailable: {0}")]
    Unavailable(String),
    /// Stored data failed validation.
    #[error("tenant directory invalid data: {0}")]
    Invalid(String),
    /// A uniqueness constraint rejected the write.
    #[error("tenant directory conflict: {0}")]
    Conflict(String),
    /// Tenant does not exist.
    #[error("tenant not found: {0}")]
    NotFound(TenantId),
}

/// Result of the idempotent auto-lock transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    /// This call flipped the tenant to blocked/expired.
    Locked {
        /// Status observed before the transition.
        prior_status: SubscriptionStatus,
    },
    /// Tenant was already blocked; nothing changed.
    AlreadyBlocked,
    /// Tenant no longer exists.
    Missing,
}

/// Input for provisioning a tenant with its first administrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provisioning {
    /// School display name.
    pub name: String,
    /// Login name of the first school administrator.
    pub admin_username: Username,
    /// Plan of the initial subscription record.
    pub plan: SubscriptionPlan,
    /// Trial start and initial subscription start.
    pub start: Timestamp,
    /// End of the initial subscription record. The tenant row keeps no
    /// explicit end, so entitlement runs from the trial start.
    pub end: Option<Timestamp>,
    /// Operator performing the provisioning.
    pub created_by: Username,
    /// Notes stored on the initial subscription record.
    pub notes: String,
}

/// Durable record of tenants and principals in the shared namespace.
///
/// # Invariants
/// - `provision` and `delete_tenant` are all-or-nothing.
/// - `lock_expired` is a conditional transition and safe to race.
pub trait TenantDirectory: Send + Sync {
    /// Loads one tenant.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError`] when the backend fails.
    fn tenant(&self, tenant_id: TenantId) -> Result<Option<Tenant>, DirectoryError>;

    /// Lists every tenant ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError`] when the backend fails.
    fn tenants(&self) -> Result<Vec<Tenant>, DirectoryError>;

    /// Creates a tenant, its first administrator and its initial subscription.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::Conflict`] when the admin username is taken.
    fn provision(&self, request: &Provisioning) -> Result<Tenant, DirectoryError>;

    /// Sets the blocked flag and status of a tenant.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::NotFound`] when the tenant does not exist.
    fn set_blocked(
        &self,
        tenant_id: TenantId,
        blocked: bool,
        status: SubscriptionStatus,
        now: Timestamp,
    ) -> Result<Tenant, DirectoryError>;

    /// Marks an unblocked tenant blocked with status `expired`.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError`] when the backend fails.
    fn lock_expired(&self, tenant_id: TenantId, now: Timestamp)
    -> Result<LockOutcome, DirectoryError>;

    /// Deletes a tenant and everything it owns. Returns false when missing.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError`] when the backend fails; nothing is deleted.
    fn delete_tenant(&self, tenant_id: TenantId) -> Result<bool, DirectoryError>;

    /// Loads a principal by username.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError`] when the backend fails.
    fn principal(&self, username: &Username) -> Result<Option<PrincipalRecord>, DirectoryError>;

    /// Lists principals bound to a tenant, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError`] when the backend fails.
    fn principals(&self, tenant_id: TenantId) -> Result<Vec<PrincipalRecord>, DirectoryError>;
}

// ============================================================================
// SECTION: Subscription Ledger
// ============================================================================

/// Subscription history and notification log.
pub trait SubscriptionLedger: Send + Sync {
    /// Deactivates prior subscriptions, inserts the new one and updates the
    /// tenant's denormalized fields in one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::NotFound`] when the tenant does not exist.
    fn apply_renewal(
        &self,
        renewal: &Renewal,
        now: Timestamp,
    ) -> Result<(Tenant, SubscriptionRecord), DirectoryError>;

    /// Lists subscription records for a tenant, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError`] when the backend fails.
    fn subscriptions(&self, tenant_id: TenantId)
    -> Result<Vec<SubscriptionRecord>, DirectoryError>;

    /// Appends a notification and, for reminder kinds, stamps the tenant's
    /// `last_notification_sent` in the same transaction.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::NotFound`] when the tenant does not exist.
    fn record_notification(
        &self,
        notification: &NewNotification,
    ) -> Result<NotificationRecord, DirectoryError>;

    /// Locks `notice.tenant_id` as of `notice.sent_at` and appends `notice`
    /// in one transaction.
    ///
    /// The notice is written only when this call performs the lock. If the
    /// append fails, the lock is rolled back with it.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError`] when the backend fails; nothing is written.
    fn lock_expired_with_notice(
        &self,
        notice: &NewNotification,
    ) -> Result<LockOutcome, DirectoryError>;

    /// Lists the most recent notifications for a tenant, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError`] when the backend fails.
    fn notifications(
        &self,
        tenant_id: TenantId,
        limit: usize,
    ) -> Result<Vec<NotificationRecord>, DirectoryError>;
}

// ============================================================================
// SECTION: Owned Store
// ============================================================================

/// Owned entity store errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Backend could not be reached or failed mid-operation.
    #[error("owned store unavailable: {0}")]
    Unavailable(String),
    /// Stored or supplied data failed validation.
    #[error("owned store invalid data: {0}")]
    Invalid(String),
}

/// Row visibility applied by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TenantFilter {
    /// Every tenant's rows.
    All,
    /// Only rows owned by the tenant.
    Tenant(TenantId),
}

impl TenantFilter {
    /// Returns true when a row owned by `owner` is visible.
    #[must_use]
    pub fn admits(self, owner: TenantId) -> bool {
        match self {
            Self::All => true,
            Self::Tenant(tenant_id) => tenant_id == owner,
        }
    }
}

/// Owner check applied atomically with an update or delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnershipGuard {
    /// Any owner is acceptable.
    Any,
    /// The row must be owned by this tenant.
    Owner(TenantId),
}

impl OwnershipGuard {
    /// Returns true when a row owned by `owner` may be written.
    #[must_use]
    pub fn permits(self, owner: TenantId) -> bool {
        match self {
            Self::Any => true,
            Self::Owner(tenant_id) => tenant_id == owner,
        }
    }
}

/// Outcome of a guarded write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The write was applied.
    Applied,
    /// No row with that id exists.
    NotFound,
    /// The row exists under another tenant; nothing was written.
    OwnerMismatch {
        /// Actual owner of the row.
        owner: TenantId,
    },
}

/// Storage for tenant-owned rows, keyed by entity kind.
///
/// # Invariants
/// - `tenant_id` is written once by `insert` and never rewritten.
/// - `update`/`delete` check the guard and write in one atomic step.
pub trait OwnedStore: Send + Sync {
    /// Lists rows of `kind` visible under `filter`, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the backend fails.
    fn list(&self, kind: EntityKind, filter: TenantFilter)
    -> Result<Vec<StoredRecord>, StoreError>;

    /// Loads one row of `kind` if visible under `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the backend fails.
    fn fetch(
        &self,
        kind: EntityKind,
        id: RecordId,
        filter: TenantFilter,
    ) -> Result<Option<StoredRecord>, StoreError>;

    /// Inserts a row and assigns its id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Invalid`] when the owning tenant does not exist.
    fn insert(&self, record: &NewStoredRecord) -> Result<StoredRecord, StoreError>;

    /// Replaces the payload of a row when the guard permits its owner.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the backend fails.
    fn update(
        &self,
        kind: EntityKind,
        id: RecordId,
        guard: OwnershipGuard,
        fields: &serde_json::Value,
    ) -> Result<WriteOutcome, StoreError>;

    /// Deletes a row when the guard permits its owner.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the backend fails.
    fn delete(
        &self,
        kind: EntityKind,
        id: RecordId,
        guard: OwnershipGuard,
    ) -> Result<WriteOutcome, StoreError>;
}

// ============================================================================
// SECTION: Namespace Router
// ============================================================================

/// Namespace routing errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouterError {
    /// No connection could be checked out.
    #[error("namespace router unavailable: {0}")]
    Unavailable(String),
    /// The namespace could not be created or selected.
    #[error("namespace activation failed for {binding}: {message}")]
    Activation {
        /// Binding that failed.
        binding: NamespaceBinding,
        /// Backend error message.
        message: String,
    },
}

/// Namespace a request is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamespaceBinding {
    /// Shared namespace; owned reads span every tenant.
    Shared,
    /// One tenant's namespace.
    Tenant(TenantId),
}

impl std::fmt::Display for NamespaceBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Shared => f.write_str("shared"),
            Self::Tenant(tenant_id) => write!(f, "tenant {tenant_id}"),
        }
    }
}

/// Binds an owned store handle to a namespace for one request.
///
/// # Invariants
/// - Every call re-selects the namespace; pooled state is never trusted.
/// - Global entities are never redirected by an activation.
/// - Dropping the handle resets the connection's namespace.
pub trait NamespaceRouter: Send + Sync {
    /// Request-scoped store handle.
    type Handle: OwnedStore;

    /// Ensures the namespace exists and returns a handle bound to it.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError`] when the namespace cannot be activated; callers
    /// must abort the request.
    fn activate(&self, binding: NamespaceBinding) -> Result<Self::Handle, RouterError>;
}
