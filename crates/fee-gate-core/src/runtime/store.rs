// crates/fee-gate-core/src/runtime/store.rs
// ============================================================================
// Module: Fee Gate In-Memory Backend
// Description: In-memory directory, ledger, owned store and router.
// Purpose: Provide a deterministic backend for tests and embedding.
// Dependencies: crate::core, crate::interfaces
// ============================================================================

//! ## Overview
//! [`InMemoryBackend`] implements every storage interface over one mutex, so
//! each operation is trivially atomic. Tenant deletion cascades to every row
//! the tenant owns. The namespace router is a no-op: activation hands back a
//! clone of the backend and isolation comes from the tenant filter alone.
//! It is not intended for production use.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use crate::core::EntityKind;
use crate::core::NewNotification;
use crate::core::NewStoredRecord;
use crate::core::NotificationRecord;
use crate::core::PrincipalRecord;
use crate::core::RecordId;
use crate::core::Renewal;
use crate::core::Role;
use crate::core::StoredRecord;
use crate::core::SubscriptionRecord;
use crate::core::SubscriptionStatus;
use crate::core::Tenant;
use crate::core::TenantId;
use crate::core::Timestamp;
use crate::core::Username;
use crate::interfaces::DirectoryError;
use crate::interfaces::LockOutcome;
use crate::interfaces::NamespaceBinding;
use crate::interfaces::NamespaceRouter;
use crate::interfaces::OwnedStore;
use crate::interfaces::OwnershipGuard;
use crate::interfaces::Provisioning;
use crate::interfaces::RouterError;
use crate::interfaces::StoreError;
use crate::interfaces::SubscriptionLedger;
use crate::interfaces::TenantDirectory;
use crate::interfaces::TenantFilter;
use crate::interfaces::WriteOutcome;

// ============================================================================
// SECTION: State
// ============================================================================

/// Mutable backend state.
#[derive(Debug, Default)]
struct MemoryState {
    /// Tenants by id.
    tenants: BTreeMap<TenantId, Tenant>,
    /// Principals by username.
    principals: BTreeMap<Username, PrincipalRecord>,
    /// Subscription history in insertion order.
    subscriptions: Vec<SubscriptionRecord>,
    /// Notification log in insertion order.
    notifications: Vec<NotificationRecord>,
    /// Owned rows by id.
    records: BTreeMap<RecordId, StoredRecord>,
    /// Last issued id, shared by every sequence.
    last_id: u64,
}

impl MemoryState {
    /// Issues the next positive id.
    fn next_id(&mut self) -> u64 {
        self.last_id = self.last_id.saturating_add(1);
        self.last_id
    }

    /// Flips an unblocked tenant to blocked/expired.
    fn lock_expired(&mut self, tenant_id: TenantId, now: Timestamp) -> LockOutcome {
        let Some(tenant) = self.tenants.get_mut(&tenant_id) else {
            return LockOutcome::Missing;
        };
        if tenant.is_blocked {
            return LockOutcome::AlreadyBlocked;
        }
        let prior_status = tenant.subscription_status;
        tenant.is_blocked = true;
        tenant.subscription_status = SubscriptionStatus::Expired;
        tenant.updated_at = now;
        LockOutcome::Locked {
            prior_status,
        }
    }

    /// Appends a notification, stamping reminder kinds on the tenant.
    fn append_notification(
        &mut self,
        notification: &NewNotification,
    ) -> Result<NotificationRecord, DirectoryError> {
        if !self.tenants.contains_key(&notification.tenant_id) {
            return Err(DirectoryError::NotFound(notification.tenant_id));
        }
        let id = RecordId::from_raw(self.next_id())
            .ok_or_else(|| DirectoryError::Unavailable("record id exhausted".to_string()))?;
        let record = NotificationRecord {
            id,
            tenant_id: notification.tenant_id,
            kind: notification.kind,
            message: notification.message.clone(),
            days_remaining: notification.days_remaining,
            sent_at: notification.sent_at,
        };
        self.notifications.push(record.clone());
        if notification.kind.stamps_last_notification()
            && let Some(tenant) = self.tenants.get_mut(&notification.tenant_id)
        {
            tenant.last_notification_sent = Some(notification.sent_at);
            tenant.updated_at = notification.sent_at;
        }
        Ok(record)
    }
}

/// In-memory backend for tests and embedding.
#[derive(Debug, Default, Clone)]
pub struct InMemoryBackend {
    /// State protected by a mutex.
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the state for a directory operation.
    fn directory(&self) -> Result<MutexGuard<'_, MemoryState>, DirectoryError> {
        self.state.lock().map_err(|_| {
            DirectoryError::Unavailable("in-memory backend mutex poisoned".to_string())
        })
    }

    /// Locks the state for an owned-store operation.
    fn owned(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("in-memory backend mutex poisoned".to_string()))
    }
}

// ============================================================================
// SECTION: Tenant Directory
// ============================================================================

impl TenantDirectory for InMemoryBackend {
    fn tenant(&self, tenant_id: TenantId) -> Result<Option<Tenant>, DirectoryError> {
        Ok(self.directory()?.tenants.get(&tenant_id).cloned())
    }

    fn tenants(&self) -> Result<Vec<Tenant>, DirectoryError> {
        Ok(self.directory()?.tenants.values().cloned().collect())
    }

    fn provision(&self, request: &Provisioning) -> Result<Tenant, DirectoryError> {
        let mut state = self.directory()?;
        if state.principals.contains_key(&request.admin_username) {
            return Err(DirectoryError::Conflict(format!(
                "username already exists: {}",
                request.admin_username
            )));
        }
        let tenant_id = TenantId::from_raw(state.next_id())
            .ok_or_else(|| DirectoryError::Unavailable("tenant id exhausted".to_string()))?;
        let subscription_id = RecordId::from_raw(state.next_id())
            .ok_or_else(|| DirectoryError::Unavailable("record id exhausted".to_string()))?;
        let tenant = Tenant {
            id: tenant_id,
            name: request.name.clone(),
            is_active: true,
            is_blocked: false,
            subscription_status: request.plan.resulting_status(),
            subscription_plan: request.plan,
            subscription_end: None,
            trial_start: Some(request.start),
            last_notification_sent: None,
            created_at: request.start,
            updated_at: request.start,
        };
        state.tenants.insert(tenant_id, tenant.clone());
        state.principals.insert(
            request.admin_username.clone(),
            PrincipalRecord {
                username: request.admin_username.clone(),
                role: Role::SchoolAdmin,
                tenant_id: Some(tenant_id),
                is_active: true,
                must_change_password: true,
                created_at: request.start,
            },
        );
        state.subscriptions.push(SubscriptionRecord {
            id: subscription_id,
            tenant_id,
            plan: request.plan,
            start: request.start,
            end: request.end,
            amount_paid_minor: 0,
            payment_reference: None,
            is_active: true,
            created_by: request.created_by.clone(),
            notes: Some(request.notes.clone()),
            created_at: request.start,
        });
        Ok(tenant)
    }

    fn set_blocked(
        &self,
        tenant_id: TenantId,
        blocked: bool,
        status: SubscriptionStatus,
        now: Timestamp,
    ) -> Result<Tenant, DirectoryError> {
        let mut state = self.directory()?;
        let tenant = state.tenants.get_mut(&tenant_id).ok_or(DirectoryError::NotFound(tenant_id))?;
        tenant.is_blocked = blocked;
        tenant.subscription_status = status;
        tenant.updated_at = now;
        Ok(tenant.clone())
    }

    fn lock_expired(
        &self,
        tenant_id: TenantId,
        now: Timestamp,
    ) -> Result<LockOutcome, DirectoryError> {
        Ok(self.directory()?.lock_expired(tenant_id, now))
    }

    fn delete_tenant(&self, tenant_id: TenantId) -> Result<bool, DirectoryError> {
        let mut state = self.directory()?;
        if state.tenants.remove(&tenant_id).is_none() {
            return Ok(false);
        }
        state.records.retain(|_, record| record.tenant_id != tenant_id);
        state.principals.retain(|_, principal| principal.tenant_id != Some(tenant_id));
        state.subscriptions.retain(|record| record.tenant_id != tenant_id);
        state.notifications.retain(|record| record.tenant_id != tenant_id);
        Ok(true)
    }

    fn principal(&self, username: &Username) -> Result<Option<PrincipalRecord>, DirectoryError> {
        Ok(self.directory()?.principals.get(username).cloned())
    }

    fn principals(&self, tenant_id: TenantId) -> Result<Vec<PrincipalRecord>, DirectoryError> {
        let state = self.directory()?;
        let mut principals: Vec<PrincipalRecord> = state
            .principals
            .values()
            .filter(|principal| principal.tenant_id == Some(tenant_id))
            .cloned()
            .collect();
        principals.sort_by_key(|principal| principal.created_at);
        Ok(principals)
    }
}

// ============================================================================
// SECTION: Subscription Ledger
// ============================================================================

impl SubscriptionLedger for InMemoryBackend {
    fn apply_renewal(
        &self,
        renewal: &Renewal,
        now: Timestamp,
    ) -> Result<(Tenant, SubscriptionRecord), DirectoryError> {
        let mut state = self.directory()?;
        if !state.tenants.contains_key(&renewal.tenant_id) {
            return Err(DirectoryError::NotFound(renewal.tenant_id));
        }
        let id = RecordId::from_raw(state.next_id())
            .ok_or_else(|| DirectoryError::Unavailable("record id exhausted".to_string()))?;
        for record in &mut state.subscriptions {
            if record.tenant_id == renewal.tenant_id {
                record.is_active = false;
            }
        }
        let record = SubscriptionRecord {
            id,
            tenant_id: renewal.tenant_id,
            plan: renewal.plan,
            start: renewal.start,
            end: renewal.end,
            amount_paid_minor: renewal.amount_paid_minor,
            payment_reference: renewal.payment_reference.clone(),
            is_active: true,
            created_by: renewal.created_by.clone(),
            notes: renewal.notes.clone(),
            created_at: now,
        };
        state.subscriptions.push(record.clone());
        let tenant = state
            .tenants
            .get_mut(&renewal.tenant_id)
            .ok_or(DirectoryError::NotFound(renewal.tenant_id))?;
        tenant.subscription_plan = renewal.plan;
        tenant.subscription_status = renewal.status;
        tenant.subscription_end = renewal.end;
        tenant.is_blocked = false;
        tenant.updated_at = now;
        Ok((tenant.clone(), record))
    }

    fn subscriptions(
        &self,
        tenant_id: TenantId,
    ) -> Result<Vec<SubscriptionRecord>, DirectoryError> {
        let state = self.directory()?;
        Ok(state
            .subscriptions
            .iter()
            .rev()
            .filter(|record| record.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    fn record_notification(
        &self,
        notification: &NewNotification,
    ) -> Result<NotificationRecord, DirectoryError> {
        self.directory()?.append_notification(notification)
    }

    fn lock_expired_with_notice(
        &self,
        notice: &NewNotification,
    ) -> Result<LockOutcome, DirectoryError> {
        let mut state = self.directory()?;
        let snapshot = state.tenants.get(&notice.tenant_id).cloned();
        let outcome = state.lock_expired(notice.tenant_id, notice.sent_at);
        if matches!(outcome, LockOutcome::Locked { .. })
            && let Err(err) = state.append_notification(notice)
        {
            if let Some(tenant) = snapshot {
                state.tenants.insert(tenant.id, tenant);
            }
            return Err(err);
        }
        Ok(outcome)
    }

    fn notifications(
        &self,
        tenant_id: TenantId,
        limit: usize,
    ) -> Result<Vec<NotificationRecord>, DirectoryError> {
        let state = self.directory()?;
        Ok(state
            .notifications
            .iter()
            .rev()
            .filter(|record| record.tenant_id == tenant_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

// ============================================================================
// SECTION: Owned Store
// ============================================================================

impl OwnedStore for InMemoryBackend {
    fn list(
        &self,
        kind: EntityKind,
        filter: TenantFilter,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        let state = self.owned()?;
        Ok(state
            .records
            .values()
            .filter(|record| record.kind == kind && filter.admits(record.tenant_id))
            .cloned()
            .collect())
    }

    fn fetch(
        &self,
        kind: EntityKind,
        id: RecordId,
        filter: TenantFilter,
    ) -> Result<Option<StoredRecord>, StoreError> {
        let state = self.owned()?;
        Ok(state
            .records
            .get(&id)
            .filter(|record| record.kind == kind && filter.admits(record.tenant_id))
            .cloned())
    }

    fn insert(&self, record: &NewStoredRecord) -> Result<StoredRecord, StoreError> {
        let mut state = self.owned()?;
        if !state.tenants.contains_key(&record.tenant_id) {
            return Err(StoreError::Invalid(format!("unknown tenant: {}", record.tenant_id)));
        }
        let id = RecordId::from_raw(state.next_id())
            .ok_or_else(|| StoreError::Unavailable("record id exhausted".to_string()))?;
        let stored = StoredRecord {
            kind: record.kind,
            id,
            tenant_id: record.tenant_id,
            fields: record.fields.clone(),
        };
        state.records.insert(id, stored.clone());
        Ok(stored)
    }

    fn update(
        &self,
        kind: EntityKind,
        id: RecordId,
        guard: OwnershipGuard,
        fields: &serde_json::Value,
    ) -> Result<WriteOutcome, StoreError> {
        let mut state = self.owned()?;
        let Some(record) = state.records.get_mut(&id).filter(|record| record.kind == kind) else {
            return Ok(WriteOutcome::NotFound);
        };
        if !guard.permits(record.tenant_id) {
            return Ok(WriteOutcome::OwnerMismatch {
                owner: record.tenant_id,
            });
        }
        record.fields = fields.clone();
        Ok(WriteOutcome::Applied)
    }

    fn delete(
        &self,
        kind: EntityKind,
        id: RecordId,
        guard: OwnershipGuard,
    ) -> Result<WriteOutcome, StoreError> {
        let mut state = self.owned()?;
        let Some(owner) = state
            .records
            .get(&id)
            .filter(|record| record.kind == kind)
            .map(|record| record.tenant_id)
        else {
            return Ok(WriteOutcome::NotFound);
        };
        if !guard.permits(owner) {
            return Ok(WriteOutcome::OwnerMismatch {
                owner,
            });
        }
        state.records.remove(&id);
        Ok(WriteOutcome::Applied)
    }
}

// ============================================================================
// SECTION: Namespace Router
// ============================================================================

impl NamespaceRouter for InMemoryBackend {
    type Handle = Self;

    fn activate(&self, binding: NamespaceBinding) -> Result<Self::Handle, RouterError> {
        if self.state.is_poisoned() {
            return Err(RouterError::Unavailable(format!(
                "in-memory backend unusable for {binding}"
            )));
        }
        Ok(self.clone())
    }
}
