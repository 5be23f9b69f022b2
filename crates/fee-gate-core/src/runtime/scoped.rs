// crates/fee-gate-core/src/runtime/scoped.rs
// ============================================================================
// Module: Scoped Query Builder
// Description: Tenant-filtered read and write handles over owned entities.
// Purpose: Make every owned-entity access carry the request's tenant context.
// Dependencies: crate::{audit, core, interfaces}, serde_json, thiserror
// ============================================================================

//! ## Overview
//! [`scoped`] turns a store and a [`TenantContext`] into a [`ScopedQuery`]
//! whose visibility is fixed at construction:
//! - developer without a tenant: every tenant's rows
//! - developer impersonating a tenant, or school administrator with a tenant:
//!   that tenant's rows
//! - anything else: no rows, and storage is never touched
//!
//! Creates stamp the owner from the context. Updates and deletes check the
//! record's owner against the context and then let the store re-check it
//! atomically; a mismatch is an [`ScopedError::OwnershipViolation`] and is
//! audited as critical.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::marker::PhantomData;

use thiserror::Error;

use crate::audit::AuditSeverity;
use crate::audit::AuditSink;
use crate::audit::GateAuditEvent;
use crate::core::EntityKind;
use crate::core::NewStoredRecord;
use crate::core::OwnedEntity;
use crate::core::Record;
use crate::core::RecordId;
use crate::core::Role;
use crate::core::StoredRecord;
use crate::core::TenantContext;
use crate::core::TenantId;
use crate::core::Timestamp;
use crate::interfaces::OwnedStore;
use crate::interfaces::OwnershipGuard;
use crate::interfaces::StoreError;
use crate::interfaces::TenantFilter;
use crate::interfaces::WriteOutcome;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Generic message for missing or foreign records.
const NOT_FOUND_MESSAGE: &str = "Record not found or access denied.";

/// Scoped query errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScopedError {
    /// The target row belongs to another tenant.
    #[error("ownership violation: {kind} {id} is owned by tenant {owner}")]
    OwnershipViolation {
        /// Entity kind.
        kind: EntityKind,
        /// Record identifier.
        id: RecordId,
        /// Actual owner of the row.
        owner: TenantId,
    },
    /// The target row does not exist.
    #[error("{kind} {id} not found")]
    NotFound {
        /// Entity kind.
        kind: EntityKind,
        /// Record identifier.
        id: RecordId,
    },
    /// Creation needs a tenant but the context is an unscoped developer.
    #[error("creating a {0} requires a tenant context")]
    TenantRequired(EntityKind),
    /// The context carries no usable tenant.
    #[error("no tenant context for {0}")]
    NoTenantContext(EntityKind),
    /// Stored payload could not be encoded or decoded.
    #[error("record codec error: {0}")]
    Codec(String),
    /// Backend failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ScopedError {
    /// Returns a message safe to show end users.
    ///
    /// Foreign and missing rows produce the same text.
    #[must_use]
    pub const fn public_message(&self) -> &'static str {
        match self {
            Self::OwnershipViolation { .. } | Self::NotFound { .. } | Self::NoTenantContext(_) => {
                NOT_FOUND_MESSAGE
            }
            Self::TenantRequired(_) => "Select a school before creating records.",
            Self::Codec(_) | Self::Store(_) => "Service temporarily unavailable. Please try again.",
        }
    }
}

// ============================================================================
// SECTION: Scope
// ============================================================================

/// Visibility of a scoped query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryScope {
    /// Every tenant's rows.
    Unrestricted,
    /// One tenant's rows.
    Tenant(TenantId),
    /// No rows.
    Empty,
}

impl QueryScope {
    /// Derives the scope for a context.
    #[must_use]
    pub const fn for_context(context: &TenantContext) -> Self {
        match context {
            TenantContext::Unauthenticated => Self::Empty,
            TenantContext::Authenticated {
                role,
                tenant_id,
                ..
            } => match (role, tenant_id) {
                (_, Some(tenant_id)) => Self::Tenant(*tenant_id),
                (Role::Developer, None) => Self::Unrestricted,
                (Role::SchoolAdmin, None) => Self::Empty,
            },
        }
    }

    /// Returns the store filter, or `None` when nothing is visible.
    #[must_use]
    pub const fn filter(self) -> Option<TenantFilter> {
        match self {
            Self::Unrestricted => Some(TenantFilter::All),
            Self::Tenant(tenant_id) => Some(TenantFilter::Tenant(tenant_id)),
            Self::Empty => None,
        }
    }
}

// ============================================================================
// SECTION: Scoped Query
// ============================================================================

/// Tenant-scoped handle over one entity type.
pub struct ScopedQuery<'a, E, S: ?Sized> {
    /// Backing store.
    store: &'a S,
    /// Request context.
    context: &'a TenantContext,
    /// Visibility fixed at construction.
    scope: QueryScope,
    /// Audit sink for ownership violations.
    audit: &'a dyn AuditSink,
    /// Request time used for audit records.
    now: Timestamp,
    /// Entity type marker.
    entity: PhantomData<fn() -> E>,
}

/// Builds a scoped query for `E` under `context`.
#[must_use]
pub fn scoped<'a, E: OwnedEntity, S: OwnedStore + ?Sized>(
    store: &'a S,
    context: &'a TenantContext,
    audit: &'a dyn AuditSink,
    now: Timestamp,
) -> ScopedQuery<'a, E, S> {
    ScopedQuery {
        store,
        context,
        scope: QueryScope::for_context(context),
        audit,
        now,
        entity: PhantomData,
    }
}

impl<E: OwnedEntity, S: OwnedStore + ?Sized> ScopedQuery<'_, E, S> {
    /// Returns the visibility of this query.
    #[must_use]
    pub const fn scope(&self) -> QueryScope {
        self.scope
    }

    /// Returns every visible record.
    ///
    /// # Errors
    ///
    /// Returns [`ScopedError`] when the store fails or a row cannot be decoded.
    pub fn all(&self) -> Result<Vec<Record<E>>, ScopedError> {
        let Some(filter) = self.scope.filter() else {
            return Ok(Vec::new());
        };
        self.store
            .list(E::KIND, filter)?
            .into_iter()
            .filter(|stored| stored.kind == E::KIND && filter.admits(stored.tenant_id))
            .map(decode::<E>)
            .collect()
    }

    /// Returns every visible record matching `predicate`.
    ///
    /// # Errors
    ///
    /// Returns [`ScopedError`] when the store fails or a row cannot be decoded.
    pub fn filter(&self, predicate: impl Fn(&E) -> bool) -> Result<Vec<Record<E>>, ScopedError> {
        let mut records = self.all()?;
        records.retain(|record| predicate(&record.data));
        Ok(records)
    }

    /// Returns one visible record.
    ///
    /// # Errors
    ///
    /// Returns [`ScopedError`] when the store fails or the row cannot be decoded.
    pub fn get(&self, id: RecordId) -> Result<Option<Record<E>>, ScopedError> {
        let Some(filter) = self.scope.filter() else {
            return Ok(None);
        };
        match self.store.fetch(E::KIND, id, filter)? {
            Some(stored) if stored.kind == E::KIND && filter.admits(stored.tenant_id) => {
                decode::<E>(stored).map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Creates a record owned by the context's tenant.
    ///
    /// # Errors
    ///
    /// Returns [`ScopedError::TenantRequired`] for unscoped developers and
    /// [`ScopedError::NoTenantContext`] when the context has no tenant.
    pub fn create(&self, fields: E) -> Result<Record<E>, ScopedError> {
        let tenant_id = match self.scope {
            QueryScope::Tenant(tenant_id) => tenant_id,
            QueryScope::Unrestricted => return Err(ScopedError::TenantRequired(E::KIND)),
            QueryScope::Empty => return Err(ScopedError::NoTenantContext(E::KIND)),
        };
        let stored = self.store.insert(&NewStoredRecord {
            kind: E::KIND,
            tenant_id,
            fields: encode(&fields)?,
        })?;
        if stored.tenant_id != tenant_id {
            return Err(ScopedError::Store(StoreError::Invalid(format!(
                "store assigned tenant {} to a row created for tenant {tenant_id}",
                stored.tenant_id
            ))));
        }
        Ok(Record::from_parts(stored.id, stored.tenant_id, fields))
    }

    /// Replaces the payload of a record owned by the context's tenant.
    ///
    /// The owner is never rewritten.
    ///
    /// # Errors
    ///
    /// Returns [`ScopedError::OwnershipViolation`] when the row belongs to
    /// another tenant; storage is left unchanged.
    pub fn update(&self, record: &Record<E>, fields: E) -> Result<Record<E>, ScopedError> {
        let guard = self.guard_for(record)?;
        let outcome = self.store.update(E::KIND, record.id(), guard, &encode(&fields)?)?;
        self.settle(record, outcome)?;
        Ok(Record::from_parts(record.id(), record.tenant_id(), fields))
    }

    /// Deletes a record owned by the context's tenant.
    ///
    /// # Errors
    ///
    /// Returns [`ScopedError::OwnershipViolation`] when the row belongs to
    /// another tenant; storage is left unchanged.
    pub fn delete(&self, record: &Record<E>) -> Result<(), ScopedError> {
        let guard = self.guard_for(record)?;
        let outcome = self.store.delete(E::KIND, record.id(), guard)?;
        self.settle(record, outcome)
    }

    /// Checks the record owner against the context and returns the store guard.
    fn guard_for(&self, record: &Record<E>) -> Result<OwnershipGuard, ScopedError> {
        match self.scope {
            QueryScope::Unrestricted => Ok(OwnershipGuard::Any),
            QueryScope::Tenant(tenant_id) if tenant_id == record.tenant_id() => {
                Ok(OwnershipGuard::Owner(tenant_id))
            }
            QueryScope::Tenant(_) | QueryScope::Empty => {
                Err(self.violation(record.id(), record.tenant_id()))
            }
        }
    }

    /// Maps a store write outcome to the scoped result.
    fn settle(&self, record: &Record<E>, outcome: WriteOutcome) -> Result<(), ScopedError> {
        match outcome {
            WriteOutcome::Applied => Ok(()),
            WriteOutcome::NotFound => Err(ScopedError::NotFound {
                kind: E::KIND,
                id: record.id(),
            }),
            WriteOutcome::OwnerMismatch {
                owner,
            } => Err(self.violation(record.id(), owner)),
        }
    }

    /// Records and returns an ownership violation.
    fn violation(&self, id: RecordId, owner: TenantId) -> ScopedError {
        let error = ScopedError::OwnershipViolation {
            kind: E::KIND,
            id,
            owner,
        };
        let event = GateAuditEvent::new("ownership_violation", AuditSeverity::Critical, self.now)
            .with_tenant(self.context.tenant_id())
            .with_username(self.context.username())
            .with_reason("ownership_violation")
            .with_message(error.to_string());
        self.audit.record(&event);
        error
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Decodes a stored row into a typed record.
fn decode<E: OwnedEntity>(stored: StoredRecord) -> Result<Record<E>, ScopedError> {
    let id = stored.id;
    Record::decode(stored).map_err(|err| ScopedError::Codec(format!("{} {id}: {err}", E::KIND)))
}

/// Encodes an entity payload, dropping any embedded owner field.
fn encode<E: OwnedEntity>(fields: &E) -> Result<serde_json::Value, ScopedError> {
    let mut value =
        serde_json::to_value(fields).map_err(|err| ScopedError::Codec(err.to_string()))?;
    if let Some(object) = value.as_object_mut() {
        object.remove("tenant_id");
    }
    Ok(value)
}
