// crates/fee-gate-core/src/core/subscription.rs
// ============================================================================
// Module: Subscription Model
// Description: Plans, entitlement math, subscription records and notifications.
// Purpose: Compute remaining entitlement and renewal outcomes deterministically.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Entitlement is derived from the tenant row, never cached: absolute
//! subscriptions never run out, explicit end dates win over the trial window,
//! and everything floors at zero. All functions take `now` explicitly.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::RecordId;
use crate::core::identifiers::TenantId;
use crate::core::identifiers::Username;
use crate::core::tenant::SubscriptionStatus;
use crate::core::tenant::Tenant;
use crate::core::tenant::UnknownLabel;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Days remaining reported for absolute subscriptions.
pub const UNLIMITED_DAYS: i64 = 999_999;
/// Default trial length in days.
pub const DEFAULT_TRIAL_DAYS: i64 = 30;
/// Default reminder window in days before expiry.
pub const DEFAULT_NOTIFICATION_WINDOW_DAYS: i64 = 7;
/// Minimum whole days between two reminders for the same tenant.
pub const NOTIFICATION_DEBOUNCE_DAYS: i64 = 1;

// ============================================================================
// SECTION: Plans
// ============================================================================

/// Subscription plan sold to a school.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubscriptionPlan {
    /// Trial plan (length set by [`LifecyclePolicy::trial_days`]).
    #[serde(rename = "trial")]
    Trial,
    /// 90 day plan.
    #[serde(rename = "90days")]
    NinetyDays,
    /// 365 day plan.
    #[serde(rename = "12months")]
    TwelveMonths,
    /// 730 day plan.
    #[serde(rename = "24months")]
    TwentyFourMonths,
    /// Never expires.
    #[serde(rename = "absolute")]
    Absolute,
}

impl SubscriptionPlan {
    /// Returns the stable storage label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trial => "trial",
            Self::NinetyDays => "90days",
            Self::TwelveMonths => "12months",
            Self::TwentyFourMonths => "24months",
            Self::Absolute => "absolute",
        }
    }

    /// Returns the plan length in days, or `None` when the plan never ends.
    #[must_use]
    pub const fn duration_days(self, policy: &LifecyclePolicy) -> Option<i64> {
        match self {
            Self::Trial => Some(policy.trial_days),
            Self::NinetyDays => Some(90),
            Self::TwelveMonths => Some(365),
            Self::TwentyFourMonths => Some(730),
            Self::Absolute => None,
        }
    }

    /// Returns the tenant status a renewal onto this plan produces.
    #[must_use]
    pub const fn resulting_status(self) -> SubscriptionStatus {
        match self {
            Self::Trial => SubscriptionStatus::Trial,
            Self::Absolute => SubscriptionStatus::Absolute,
            Self::NinetyDays | Self::TwelveMonths | Self::TwentyFourMonths => {
                SubscriptionStatus::Active
            }
        }
    }
}

impl fmt::Display for SubscriptionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionPlan {
    type Err = UnknownLabel;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "trial" => Ok(Self::Trial),
            "90days" => Ok(Self::NinetyDays),
            "12months" => Ok(Self::TwelveMonths),
            "24months" => Ok(Self::TwentyFourMonths),
            "absolute" => Ok(Self::Absolute),
            other => Err(UnknownLabel {
                kind: "subscription plan",
                label: other.to_string(),
            }),
        }
    }
}

// ============================================================================
// SECTION: Lifecycle Policy
// ============================================================================

/// Tunable entitlement parameters.
///
/// # Invariants
/// - `trial_days` and `notification_window_days` are positive (enforced by config validation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecyclePolicy {
    /// Trial length used when a tenant has no explicit end date.
    pub trial_days: i64,
    /// Reminder window before expiry.
    pub notification_window_days: i64,
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self {
            trial_days: DEFAULT_TRIAL_DAYS,
            notification_window_days: DEFAULT_NOTIFICATION_WINDOW_DAYS,
        }
    }
}

impl LifecyclePolicy {
    /// Returns whole days of entitlement left, floored at zero.
    ///
    /// Absolute subscriptions report [`UNLIMITED_DAYS`] regardless of any
    /// stored end date.
    #[must_use]
    pub const fn days_remaining(&self, tenant: &Tenant, now: Timestamp) -> i64 {
        if matches!(tenant.subscription_status, SubscriptionStatus::Absolute) {
            return UNLIMITED_DAYS;
        }
        let deadline = match (tenant.subscription_end, tenant.trial_start) {
            (Some(end), _) => end,
            (None, Some(start)) => start.plus_days(self.trial_days),
            (None, None) => return 0,
        };
        let days = now.whole_days_until(deadline);
        if days < 0 { 0 } else { days }
    }

    /// Returns true when the tenant is inside the reminder window and was not
    /// notified within the debounce interval.
    #[must_use]
    pub const fn needs_notification(&self, tenant: &Tenant, now: Timestamp) -> bool {
        let days = self.days_remaining(tenant, now);
        if days <= 0 || days > self.notification_window_days {
            return false;
        }
        match tenant.last_notification_sent {
            None => true,
            Some(last) => last.whole_days_until(now) >= NOTIFICATION_DEBOUNCE_DAYS,
        }
    }

    /// Returns true when the tenant's entitlement has run out.
    #[must_use]
    pub const fn is_lapsed(&self, tenant: &Tenant, now: Timestamp) -> bool {
        !matches!(tenant.subscription_status, SubscriptionStatus::Absolute)
            && self.days_remaining(tenant, now) <= 0
    }

    /// Returns true when requests for the tenant may proceed.
    #[must_use]
    pub const fn is_usable(&self, tenant: &Tenant, now: Timestamp) -> bool {
        tenant.is_active && !tenant.is_blocked && !self.is_lapsed(tenant, now)
    }
}

// ============================================================================
// SECTION: Subscription Records
// ============================================================================

/// Durable subscription history row.
///
/// # Invariants
/// - At most one active record per tenant after any committed renewal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    /// Record identifier.
    pub id: RecordId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Plan sold.
    pub plan: SubscriptionPlan,
    /// Start of the subscription.
    pub start: Timestamp,
    /// End of the subscription (`None` for absolute).
    pub end: Option<Timestamp>,
    /// Amount paid in minor currency units.
    pub amount_paid_minor: i64,
    /// External payment reference.
    pub payment_reference: Option<String>,
    /// Whether this is the current subscription.
    pub is_active: bool,
    /// Operator who recorded the subscription.
    pub created_by: Username,
    /// Free-form notes.
    pub notes: Option<String>,
    /// Creation time.
    pub created_at: Timestamp,
}

/// A fully computed renewal, applied by a ledger in one transaction.
///
/// # Invariants
/// - `end == start + plan duration` (or `None` for absolute).
/// - `status == plan.resulting_status()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Renewal {
    /// Tenant being renewed.
    pub tenant_id: TenantId,
    /// Plan sold.
    pub plan: SubscriptionPlan,
    /// Tenant status after renewal.
    pub status: SubscriptionStatus,
    /// Start of the new subscription.
    pub start: Timestamp,
    /// End of the new subscription.
    pub end: Option<Timestamp>,
    /// Amount paid in minor currency units.
    pub amount_paid_minor: i64,
    /// External payment reference.
    pub payment_reference: Option<String>,
    /// Free-form notes.
    pub notes: Option<String>,
    /// Operator recording the renewal.
    pub created_by: Username,
}

/// Operator-supplied renewal input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenewalRequest {
    /// Tenant being renewed.
    pub tenant_id: TenantId,
    /// Plan sold.
    pub plan: SubscriptionPlan,
    /// Amount paid in minor currency units.
    pub amount_paid_minor: i64,
    /// External payment reference.
    pub payment_reference: Option<String>,
    /// Free-form notes.
    pub notes: Option<String>,
}

impl Renewal {
    /// Computes the renewal starting at `now`.
    #[must_use]
    pub fn compute(
        request: RenewalRequest,
        actor: Username,
        policy: &LifecyclePolicy,
        now: Timestamp,
    ) -> Self {
        let end = request.plan.duration_days(policy).map(|days| now.plus_days(days));
        Self {
            tenant_id: request.tenant_id,
            plan: request.plan,
            status: request.plan.resulting_status(),
            start: now,
            end,
            amount_paid_minor: request.amount_paid_minor,
            payment_reference: request.payment_reference,
            notes: request.notes,
            created_by: actor,
        }
    }
}

// ============================================================================
// SECTION: Notifications
// ============================================================================

/// Kind of notification log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Manual notice that the subscription has expired.
    SubscriptionExpired,
    /// Manual reminder before expiry.
    SubscriptionReminder,
    /// Bulk reminder before expiry.
    SubscriptionReminderBulk,
    /// Sweep auto-lock record.
    SubscriptionExpiredAuto,
    /// Sweep reminder before expiry.
    SubscriptionWarningAuto,
}

impl NotificationKind {
    /// Returns the stable storage label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SubscriptionExpired => "subscription_expired",
            Self::SubscriptionReminder => "subscription_reminder",
            Self::SubscriptionReminderBulk => "subscription_reminder_bulk",
            Self::SubscriptionExpiredAuto => "subscription_expired_auto",
            Self::SubscriptionWarningAuto => "subscription_warning_auto",
        }
    }

    /// Returns true for kinds that count as a reminder for debounce purposes.
    #[must_use]
    pub const fn stamps_last_notification(self) -> bool {
        !matches!(self, Self::SubscriptionExpiredAuto)
    }
}

impl FromStr for NotificationKind {
    type Err = UnknownLabel;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "subscription_expired" => Ok(Self::SubscriptionExpired),
            "subscription_reminder" => Ok(Self::SubscriptionReminder),
            "subscription_reminder_bulk" => Ok(Self::SubscriptionReminderBulk),
            "subscription_expired_auto" => Ok(Self::SubscriptionExpiredAuto),
            "subscription_warning_auto" => Ok(Self::SubscriptionWarningAuto),
            other => Err(UnknownLabel {
                kind: "notification kind",
                label: other.to_string(),
            }),
        }
    }
}

/// Notification to be appended to the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewNotification {
    /// Tenant notified.
    pub tenant_id: TenantId,
    /// Notification kind.
    pub kind: NotificationKind,
    /// Human-readable message.
    pub message: String,
    /// Days remaining at send time.
    pub days_remaining: Option<i64>,
    /// Send time.
    pub sent_at: Timestamp,
}

impl NewNotification {
    /// Builds the reminder message for a tenant with `days` left.
    #[must_use]
    pub fn reminder(
        tenant_id: TenantId,
        kind: NotificationKind,
        days: i64,
        now: Timestamp,
    ) -> Self {
        Self {
            tenant_id,
            kind,
            message: format!(
                "Subscription expires in {days} days. Please renew to avoid service interruption."
            ),
            days_remaining: Some(days),
            sent_at: now,
        }
    }

    /// Builds the log entry written when a sweep locks a lapsed tenant.
    #[must_use]
    pub fn auto_lock(tenant_id: TenantId, now: Timestamp) -> Self {
        Self {
            tenant_id,
            kind: NotificationKind::SubscriptionExpiredAuto,
            message: "School automatically locked due to expired subscription.".to_string(),
            days_remaining: Some(0),
            sent_at: now,
        }
    }
}

/// Stored notification log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecord {
    /// Record identifier.
    pub id: RecordId,
    /// Tenant notified.
    pub tenant_id: TenantId,
    /// Notification kind.
    pub kind: NotificationKind,
    /// Human-readable message.
    pub message: String,
    /// Days remaining at send time.
    pub days_remaining: Option<i64>,
    /// Send time.
    pub sent_at: Timestamp,
}
