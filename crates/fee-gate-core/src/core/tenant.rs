// crates/fee-gate-core/src/core/tenant.rs
// ============================================================================
// Module: Tenant Directory Records
// Description: School tenant records and their subscription state.
// Purpose: Model the durable source of truth for access decisions.
// Dependencies: serde, thiserror
// ============================================================================

//! ## Overview
//! A [`Tenant`] is one school account. Its activation flag, blocked flag and
//! denormalized subscription fields are everything the access gate needs to
//! decide whether a request may proceed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::identifiers::TenantId;
use crate::core::subscription::LifecyclePolicy;
use crate::core::subscription::SubscriptionPlan;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Subscription Status
// ============================================================================

/// Denormalized subscription status stored on the tenant row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Trial period; entitlement runs from the trial start.
    Trial,
    /// Paid subscription with an end date.
    Active,
    /// Subscription lapsed; set by auto-lock.
    Expired,
    /// Blocked by an operator.
    Blocked,
    /// Never expires.
    Absolute,
}

impl SubscriptionStatus {
    /// Returns the stable storage label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trial => "trial",
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Blocked => "blocked",
            Self::Absolute => "absolute",
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a stored label does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} label: {label}")]
pub struct UnknownLabel {
    /// Kind of label being parsed.
    pub kind: &'static str,
    /// Offending label.
    pub label: String,
}

impl FromStr for SubscriptionStatus {
    type Err = UnknownLabel;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "trial" => Ok(Self::Trial),
            "active" => Ok(Self::Active),
            "expired" => Ok(Self::Expired),
            "blocked" => Ok(Self::Blocked),
            "absolute" => Ok(Self::Absolute),
            other => Err(UnknownLabel {
                kind: "subscription status",
                label: other.to_string(),
            }),
        }
    }
}

// ============================================================================
// SECTION: Tenant
// ============================================================================

/// A school tenant as stored in the tenant directory.
///
/// # Invariants
/// - Usable iff `is_active && !is_blocked && (status == absolute || days_remaining > 0)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    /// Tenant identifier.
    pub id: TenantId,
    /// Display name of the school.
    pub name: String,
    /// Activation flag; inactive tenants are denied.
    pub is_active: bool,
    /// Blocked flag; blocked tenants are denied.
    pub is_blocked: bool,
    /// Denormalized subscription status.
    pub subscription_status: SubscriptionStatus,
    /// Plan of the current subscription.
    pub subscription_plan: SubscriptionPlan,
    /// Explicit subscription end, when the plan has one.
    pub subscription_end: Option<Timestamp>,
    /// Start of the trial period.
    pub trial_start: Option<Timestamp>,
    /// Last time an expiry notification was recorded.
    pub last_notification_sent: Option<Timestamp>,
    /// Creation time.
    pub created_at: Timestamp,
    /// Last mutation time.
    pub updated_at: Timestamp,
}

impl Tenant {
    /// Returns whole days of entitlement left under the default policy.
    #[must_use]
    pub fn days_remaining(&self, now: Timestamp) -> i64 {
        LifecyclePolicy::default().days_remaining(self, now)
    }

    /// Returns true when an expiry reminder is due under the default policy.
    #[must_use]
    pub fn needs_notification(&self, now: Timestamp) -> bool {
        LifecyclePolicy::default().needs_notification(self, now)
    }

    /// Returns true when requests for this tenant may proceed under the default policy.
    #[must_use]
    pub fn is_usable(&self, now: Timestamp) -> bool {
        LifecyclePolicy::default().is_usable(self, now)
    }
}

/// Input for provisioning a new tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTenant {
    /// Display name of the school.
    pub name: String,
    /// Trial start (usually the provisioning time).
    pub trial_start: Timestamp,
}
