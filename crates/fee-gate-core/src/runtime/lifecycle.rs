// crates/fee-gate-core/src/runtime/lifecycle.rs
// ============================================================================
// Module: Subscription Lifecycle Manager
// Description: Provisioning, renewal, block/unblock, notifications and sweeps.
// Purpose: Apply operator lifecycle actions through the directory and ledger.
// Dependencies: crate::{audit, core, interfaces}, thiserror
// ============================================================================

//! ## Overview
//! The manager is the write side of tenant entitlement. Each operation is a
//! single directory or ledger call so it stays atomic at the storage layer;
//! batch operations (bulk notification, sweep) apply the same per-tenant
//! transitions the gate uses and report what they did.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::audit::AuditSeverity;
use crate::audit::AuditSink;
use crate::audit::GateAuditEvent;
use crate::core::LifecyclePolicy;
use crate::core::NewNotification;
use crate::core::NotificationKind;
use crate::core::NotificationRecord;
use crate::core::PrincipalRecord;
use crate::core::Renewal;
use crate::core::RenewalRequest;
use crate::core::SubscriptionPlan;
use crate::core::SubscriptionRecord;
use crate::core::SubscriptionStatus;
use crate::core::Tenant;
use crate::core::TenantId;
use crate::core::Timestamp;
use crate::core::Username;
use crate::interfaces::DirectoryError;
use crate::interfaces::LockOutcome;
use crate::interfaces::Provisioning;
use crate::interfaces::SubscriptionLedger;
use crate::interfaces::TenantDirectory;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Number of notifications shown per tenant in the overview.
pub const OVERVIEW_NOTIFICATION_LIMIT: usize = 3;
/// Maximum length of a school display name.
pub const MAX_TENANT_NAME_LENGTH: usize = 200;
/// Maximum length of a username.
pub const MAX_USERNAME_LENGTH: usize = 80;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Lifecycle operation errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    /// Tenant does not exist.
    #[error("tenant not found: {0}")]
    NotFound(TenantId),
    /// Operator input failed validation.
    #[error("invalid lifecycle request: {0}")]
    Invalid(String),
    /// Directory or ledger failure.
    #[error(transparent)]
    Directory(DirectoryError),
}

impl From<DirectoryError> for LifecycleError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::NotFound(tenant_id) => Self::NotFound(tenant_id),
            other => Self::Directory(other),
        }
    }
}

// ============================================================================
// SECTION: Reports
// ============================================================================

/// Result of a sweep over every tenant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Tenants locked by this sweep.
    pub locked: Vec<TenantId>,
    /// Tenants that received an expiry warning.
    pub notified: Vec<TenantId>,
}

/// Operator view of one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TenantOverview {
    /// Tenant row.
    pub tenant: Tenant,
    /// Days of entitlement left.
    pub days_remaining: i64,
    /// Whether a reminder is due.
    pub needs_notification: bool,
    /// Current active subscription record.
    pub active_subscription: Option<SubscriptionRecord>,
    /// First administrator account.
    pub admin: Option<PrincipalRecord>,
    /// Most recent notifications, newest first.
    pub recent_notifications: Vec<NotificationRecord>,
}

// ============================================================================
// SECTION: Manager
// ============================================================================

/// Subscription lifecycle manager.
pub struct SubscriptionManager<B> {
    /// Directory and ledger backend.
    backend: B,
    /// Entitlement policy.
    policy: LifecyclePolicy,
    /// Audit sink for operator actions.
    audit: Arc<dyn AuditSink>,
}

impl<B: TenantDirectory + SubscriptionLedger> SubscriptionManager<B> {
    /// Creates a manager.
    #[must_use]
    pub fn new(backend: B, policy: LifecyclePolicy, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            backend,
            policy,
            audit,
        }
    }

    /// Returns the entitlement policy.
    #[must_use]
    pub const fn policy(&self) -> &LifecyclePolicy {
        &self.policy
    }

    /// Returns the backend.
    #[must_use]
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Creates a trial tenant with its first administrator and trial record.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Invalid`] for blank or oversized input and
    /// [`LifecycleError::Directory`] with a conflict when the username is taken.
    pub fn provision(
        &self,
        name: &str,
        admin_username: &Username,
        actor: &Username,
        now: Timestamp,
    ) -> Result<Tenant, LifecycleError> {
        let name = name.trim();
        validate_text("school name", name, MAX_TENANT_NAME_LENGTH)?;
        validate_text("admin username", admin_username.as_str(), MAX_USERNAME_LENGTH)?;
        let trial_days = self.policy.trial_days;
        let trial_end =
            SubscriptionPlan::Trial.duration_days(&self.policy).map(|days| now.plus_days(days));
        let tenant = self.backend.provision(&Provisioning {
            name: name.to_string(),
            admin_username: admin_username.clone(),
            plan: SubscriptionPlan::Trial,
            start: now,
            end: trial_end,
            created_by: actor.clone(),
            notes: format!("Initial {trial_days}-day trial subscription"),
        })?;
        self.record_action("tenant_provisioned", tenant.id, actor, now, None);
        Ok(tenant)
    }

    /// Blocks a tenant.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::NotFound`] when the tenant does not exist.
    pub fn block(
        &self,
        tenant_id: TenantId,
        actor: &Username,
        now: Timestamp,
    ) -> Result<Tenant, LifecycleError> {
        let tenant = self.backend.set_blocked(tenant_id, true, SubscriptionStatus::Blocked, now)?;
        self.record_action("tenant_blocked", tenant_id, actor, now, None);
        Ok(tenant)
    }

    /// Unblocks a tenant and marks it active.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::NotFound`] when the tenant does not exist.
    pub fn unblock(
        &self,
        tenant_id: TenantId,
        actor: &Username,
        now: Timestamp,
    ) -> Result<Tenant, LifecycleError> {
        let tenant = self.backend.set_blocked(tenant_id, false, SubscriptionStatus::Active, now)?;
        self.record_action("tenant_unblocked", tenant_id, actor, now, None);
        Ok(tenant)
    }

    /// Renews a tenant's subscription starting now.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Invalid`] for a negative amount and
    /// [`LifecycleError::NotFound`] when the tenant does not exist.
    pub fn renew(
        &self,
        request: RenewalRequest,
        actor: &Username,
        now: Timestamp,
    ) -> Result<(Tenant, SubscriptionRecord), LifecycleError> {
        if request.amount_paid_minor < 0 {
            return Err(LifecycleError::Invalid("amount paid must not be negative".to_string()));
        }
        let tenant_id = request.tenant_id;
        let renewal = Renewal::compute(request, actor.clone(), &self.policy, now);
        let plan = renewal.plan;
        let applied = self.backend.apply_renewal(&renewal, now)?;
        self.record_action(
            "subscription_renewed",
            tenant_id,
            actor,
            now,
            Some(format!("plan {plan}")),
        );
        Ok(applied)
    }

    /// Records a manual expiry notice or reminder for one tenant.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::NotFound`] when the tenant does not exist.
    pub fn notify(
        &self,
        tenant_id: TenantId,
        now: Timestamp,
    ) -> Result<NotificationRecord, LifecycleError> {
        let tenant = self.require(tenant_id)?;
        let days = self.policy.days_remaining(&tenant, now);
        let notification = if days <= 0 {
            NewNotification {
                tenant_id,
                kind: NotificationKind::SubscriptionExpired,
                message: "Your subscription has expired. Please contact support to renew your \
                          subscription."
                    .to_string(),
                days_remaining: Some(days),
                sent_at: now,
            }
        } else {
            NewNotification {
                tenant_id,
                kind: NotificationKind::SubscriptionReminder,
                message: format!(
                    "Your subscription will expire in {days} days. Please renew to avoid service \
                     interruption."
                ),
                days_remaining: Some(days),
                sent_at: now,
            }
        };
        Ok(self.backend.record_notification(&notification)?)
    }

    /// Records a bulk reminder for every usable tenant that needs one.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError`] when the directory or ledger fails; reminders
    /// recorded before the failure stay recorded.
    pub fn notify_all(&self, now: Timestamp) -> Result<Vec<NotificationRecord>, LifecycleError> {
        let mut sent = Vec::new();
        for tenant in self.backend.tenants()? {
            let usable = tenant.is_active && !tenant.is_blocked;
            if !usable || !self.policy.needs_notification(&tenant, now) {
                continue;
            }
            let days = self.policy.days_remaining(&tenant, now);
            let notification = NewNotification::reminder(
                tenant.id,
                NotificationKind::SubscriptionReminderBulk,
                days,
                now,
            );
            sent.push(self.backend.record_notification(&notification)?);
        }
        Ok(sent)
    }

    /// Locks every lapsed tenant and warns every tenant inside the window.
    ///
    /// Each lock is written together with its `subscription_expired_auto`
    /// log entry, so the log never misses a sweep lock.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError`] when the directory or ledger fails; tenants
    /// processed before the failure keep their new state.
    pub fn sweep(&self, actor: &Username, now: Timestamp) -> Result<SweepReport, LifecycleError> {
        let mut report = SweepReport::default();
        for tenant in self.backend.tenants()? {
            if !tenant.is_active || tenant.is_blocked {
                continue;
            }
            if self.policy.is_lapsed(&tenant, now) {
                let notice = NewNotification::auto_lock(tenant.id, now);
                if let LockOutcome::Locked {
                    prior_status,
                } = self.backend.lock_expired_with_notice(&notice)?
                {
                    let event =
                        GateAuditEvent::new("tenant_auto_lock", AuditSeverity::Warning, now)
                            .with_tenant(Some(tenant.id))
                            .with_username(Some(actor))
                            .with_reason("subscription_expired")
                            .with_prior_status(prior_status)
                            .with_message("locked by sweep");
                    self.audit.record(&event);
                    report.locked.push(tenant.id);
                }
            } else if self.policy.needs_notification(&tenant, now) {
                let days = self.policy.days_remaining(&tenant, now);
                self.backend.record_notification(&NewNotification::reminder(
                    tenant.id,
                    NotificationKind::SubscriptionWarningAuto,
                    days,
                    now,
                ))?;
                report.notified.push(tenant.id);
            }
        }
        let summary = format!("locked {} notified {}", report.locked.len(), report.notified.len());
        let event = GateAuditEvent::new("sweep_completed", AuditSeverity::Info, now)
            .with_username(Some(actor))
            .with_message(summary);
        self.audit.record(&event);
        Ok(report)
    }

    /// Returns the operator view of one tenant.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::NotFound`] when the tenant does not exist.
    pub fn show(
        &self,
        tenant_id: TenantId,
        now: Timestamp,
    ) -> Result<TenantOverview, LifecycleError> {
        let tenant = self.require(tenant_id)?;
        self.describe(tenant, now)
    }

    /// Returns the operator view of every tenant.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError`] when the directory or ledger fails.
    pub fn overview(&self, now: Timestamp) -> Result<Vec<TenantOverview>, LifecycleError> {
        self.backend.tenants()?.into_iter().map(|tenant| self.describe(tenant, now)).collect()
    }

    /// Deletes a tenant and everything it owns.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::NotFound`] when the tenant does not exist.
    pub fn delete(
        &self,
        tenant_id: TenantId,
        actor: &Username,
        now: Timestamp,
    ) -> Result<(), LifecycleError> {
        if !self.backend.delete_tenant(tenant_id)? {
            return Err(LifecycleError::NotFound(tenant_id));
        }
        self.record_action("tenant_deleted", tenant_id, actor, now, None);
        Ok(())
    }

    /// Loads a tenant or fails with `NotFound`.
    fn require(&self, tenant_id: TenantId) -> Result<Tenant, LifecycleError> {
        self.backend.tenant(tenant_id)?.ok_or(LifecycleError::NotFound(tenant_id))
    }

    /// Assembles the overview for one tenant.
    fn describe(&self, tenant: Tenant, now: Timestamp) -> Result<TenantOverview, LifecycleError> {
        let active_subscription =
            self.backend.subscriptions(tenant.id)?.into_iter().find(|record| record.is_active);
        let admin = self.backend.principals(tenant.id)?.into_iter().next();
        let recent_notifications =
            self.backend.notifications(tenant.id, OVERVIEW_NOTIFICATION_LIMIT)?;
        Ok(TenantOverview {
            days_remaining: self.policy.days_remaining(&tenant, now),
            needs_notification: self.policy.needs_notification(&tenant, now),
            tenant,
            active_subscription,
            admin,
            recent_notifications,
        })
    }

    /// Records an operator action.
    fn record_action(
        &self,
        event: &'static str,
        tenant_id: TenantId,
        actor: &Username,
        now: Timestamp,
        message: Option<String>,
    ) {
        let mut record = GateAuditEvent::new(event, AuditSeverity::Info, now)
            .with_tenant(Some(tenant_id))
            .with_username(Some(actor));
        record.message = message;
        self.audit.record(&record);
    }
}

/// Rejects blank or oversized operator text.
fn validate_text(label: &str, value: &str, max: usize) -> Result<(), LifecycleError> {
    if value.trim().is_empty() {
        return Err(LifecycleError::Invalid(format!("{label} must not be empty")));
    }
    if value.len() > max {
        return Err(LifecycleError::Invalid(format!("{label} exceeds {max} bytes")));
    }
    Ok(())
}
