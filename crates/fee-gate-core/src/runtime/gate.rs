// crates/fee-gate-core/src/runtime/gate.rs
// ============================================================================
// Module: Access Gate
// Description: Per-request tenant access decision with expiry auto-lock.
// Purpose: Deny revoked, expired or unverifiable tenants before any data access.
// Dependencies: crate::{audit, core, interfaces}
// ============================================================================

//! ## Overview
//! The gate runs once per request, after the resolver and before namespace
//! activation. Developers are always admitted. School administrators are
//! admitted only when their tenant exists, is active, is not blocked and
//! still has entitlement. A lapsed tenant is flipped to blocked/expired as a
//! side effect through the directory's conditional transition, which makes
//! concurrent evaluations of the same tenant idempotent.
//!
//! Security posture: every failure path denies. A directory error never
//! triggers an auto-lock, because locking requires a successful read.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use crate::audit::AuditSeverity;
use crate::audit::AuditSink;
use crate::audit::GateAuditEvent;
use crate::core::LifecyclePolicy;
use crate::core::Role;
use crate::core::Tenant;
use crate::core::TenantContext;
use crate::core::TenantId;
use crate::core::Timestamp;
use crate::core::Username;
use crate::interfaces::LockOutcome;
use crate::interfaces::NamespaceBinding;
use crate::interfaces::TenantDirectory;

// ============================================================================
// SECTION: Decisions
// ============================================================================

/// Reason a request was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    /// No authenticated principal.
    Unauthenticated,
    /// Tenant missing, inactive or blocked.
    TenantRevoked,
    /// Tenant entitlement has run out.
    SubscriptionExpired,
    /// Tenant directory could not be read.
    DirectoryUnavailable,
    /// Tenant namespace could not be activated.
    NamespaceUnavailable,
}

impl DenialReason {
    /// Returns the stable reason label used in audit events.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::TenantRevoked => "tenant_revoked",
            Self::SubscriptionExpired => "subscription_expired",
            Self::DirectoryUnavailable => "directory_unavailable",
            Self::NamespaceUnavailable => "namespace_unavailable",
        }
    }

    /// Returns the message shown to the end user.
    #[must_use]
    pub const fn user_message(self) -> &'static str {
        match self {
            Self::Unauthenticated => "Please log in to continue.",
            Self::TenantRevoked => "School access revoked. Please contact support.",
            Self::SubscriptionExpired => {
                "Subscription expired. Your school has been locked. Please contact support to \
                 renew."
            }
            Self::DirectoryUnavailable | Self::NamespaceUnavailable => {
                "Service temporarily unavailable. Please try again shortly."
            }
        }
    }

    /// Returns true when the session must be cleared.
    ///
    /// Infrastructure failures keep the session so a retry can succeed.
    #[must_use]
    pub const fn clears_session(self) -> bool {
        matches!(self, Self::TenantRevoked | Self::SubscriptionExpired)
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal denial for a request; the web layer redirects to login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    /// Why the request was denied.
    pub reason: DenialReason,
    /// Tenant involved, when known.
    pub tenant_id: Option<TenantId>,
    /// Whether the session must be cleared.
    pub clear_session: bool,
    /// Message shown to the end user.
    pub message: &'static str,
}

impl Denial {
    /// Builds a denial with the reason's defaults.
    #[must_use]
    pub const fn new(reason: DenialReason, tenant_id: Option<TenantId>) -> Self {
        Self {
            reason,
            tenant_id,
            clear_session: reason.clears_session(),
            message: reason.user_message(),
        }
    }
}

/// Successful gate evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessGrant {
    /// Context that was admitted.
    pub context: TenantContext,
    /// Tenant row read during evaluation (school administrators only).
    pub tenant: Option<Tenant>,
}

impl AccessGrant {
    /// Returns the namespace this request must be bound to.
    #[must_use]
    pub const fn binding(&self) -> NamespaceBinding {
        match self.context.tenant_id() {
            Some(tenant_id) => NamespaceBinding::Tenant(tenant_id),
            None => NamespaceBinding::Shared,
        }
    }
}

/// Gate decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// Request may proceed.
    Allow(AccessGrant),
    /// Request is denied.
    Deny(Denial),
}

impl GateDecision {
    /// Returns true when the request may proceed.
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow(_))
    }
}

// ============================================================================
// SECTION: Exempt Routes
// ============================================================================

/// Default routes that bypass the gate.
pub const DEFAULT_EXEMPT_ROUTES: [&str; 4] = ["login", "logout", "static", "health_check"];

/// Allow-list of routes served before authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExemptRoutes {
    /// Exempt endpoint names.
    routes: Vec<String>,
}

impl Default for ExemptRoutes {
    fn default() -> Self {
        Self::new(DEFAULT_EXEMPT_ROUTES.iter().map(|route| (*route).to_string()))
    }
}

impl ExemptRoutes {
    /// Builds an allow-list from endpoint names.
    #[must_use]
    pub fn new(routes: impl IntoIterator<Item = String>) -> Self {
        Self {
            routes: routes.into_iter().collect(),
        }
    }

    /// Returns true when the route is exempt.
    ///
    /// Accepts endpoint names (`static`) and paths whose first segment names an
    /// exempt endpoint (`/static/app.css`). Paths carrying `.` or `..`
    /// segments, literal or percent-encoded, are never exempt: a router could
    /// resolve `/static/../students` to a gated endpoint.
    #[must_use]
    pub fn is_exempt(&self, route: &str) -> bool {
        if route.split(['/', '\\']).any(is_dot_segment) {
            return false;
        }
        let endpoint = route.trim_start_matches('/').split('/').next().unwrap_or_default();
        !endpoint.is_empty() && self.routes.iter().any(|exempt| exempt == endpoint)
    }
}

/// Returns true for `.` and `..` path segments, including `%2e` spellings.
fn is_dot_segment(segment: &str) -> bool {
    let decoded = segment.to_ascii_lowercase().replace("%2e", ".");
    decoded == "." || decoded == ".."
}

// ============================================================================
// SECTION: Access Gate
// ============================================================================

/// Per-request access gate.
pub struct AccessGate<D> {
    /// Tenant directory consulted on every school administrator request.
    directory: D,
    /// Entitlement policy.
    policy: LifecyclePolicy,
    /// Audit sink for denials.
    audit: Arc<dyn AuditSink>,
}

impl<D: TenantDirectory> AccessGate<D> {
    /// Creates a gate.
    #[must_use]
    pub fn new(directory: D, policy: LifecyclePolicy, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            directory,
            policy,
            audit,
        }
    }

    /// Returns the entitlement policy.
    #[must_use]
    pub const fn policy(&self) -> &LifecyclePolicy {
        &self.policy
    }

    /// Evaluates access for one request.
    pub fn evaluate(&self, context: &TenantContext, route: &str, now: Timestamp) -> GateDecision {
        let (username, tenant_id) = match context {
            TenantContext::Unauthenticated => {
                return GateDecision::Deny(Denial::new(DenialReason::Unauthenticated, None));
            }
            TenantContext::Authenticated {
                role: Role::Developer,
                ..
            } => {
                return GateDecision::Allow(AccessGrant {
                    context: context.clone(),
                    tenant: None,
                });
            }
            TenantContext::Authenticated {
                username,
                role: Role::SchoolAdmin,
                tenant_id,
            } => (username, *tenant_id),
        };
        let Some(tenant_id) = tenant_id else {
            return self.deny(DenialReason::TenantRevoked, None, username, route, now, |event| {
                event.with_message("school administrator session has no tenant")
            });
        };
        let tenant = match self.directory.tenant(tenant_id) {
            Ok(Some(tenant)) => tenant,
            Ok(None) => {
                return self.deny(
                    DenialReason::TenantRevoked,
                    Some(tenant_id),
                    username,
                    route,
                    now,
                    |event| event.with_message("tenant not found"),
                );
            }
            Err(err) => {
                return self.deny(
                    DenialReason::DirectoryUnavailable,
                    Some(tenant_id),
                    username,
                    route,
                    now,
                    |event| event.with_message(err.to_string()),
                );
            }
        };
        if !tenant.is_active || tenant.is_blocked {
            let detail = if tenant.is_blocked { "tenant blocked" } else { "tenant inactive" };
            return self.deny(
                DenialReason::TenantRevoked,
                Some(tenant_id),
                username,
                route,
                now,
                |event| event.with_prior_status(tenant.subscription_status).with_message(detail),
            );
        }
        if self.policy.is_lapsed(&tenant, now) {
            return self.auto_lock(&tenant, username, route, now);
        }
        GateDecision::Allow(AccessGrant {
            context: context.clone(),
            tenant: Some(tenant),
        })
    }

    /// Locks a lapsed tenant and denies the request, whatever the lock outcome.
    fn auto_lock(
        &self,
        tenant: &Tenant,
        username: &Username,
        route: &str,
        now: Timestamp,
    ) -> GateDecision {
        let reason = DenialReason::SubscriptionExpired;
        let base = GateAuditEvent::new("tenant_auto_lock", AuditSeverity::Warning, now)
            .with_tenant(Some(tenant.id))
            .with_username(Some(username))
            .with_route(route)
            .with_reason(reason.as_str());
        let event = match self.directory.lock_expired(tenant.id, now) {
            Ok(LockOutcome::Locked {
                prior_status,
            }) => base.with_prior_status(prior_status).with_message("tenant locked"),
            Ok(LockOutcome::AlreadyBlocked) => base
                .with_prior_status(tenant.subscription_status)
                .with_message("tenant already locked by a concurrent request"),
            Ok(LockOutcome::Missing) => base
                .with_prior_status(tenant.subscription_status)
                .with_message("tenant disappeared before lock"),
            Err(err) => {
                let mut event = base
                    .with_prior_status(tenant.subscription_status)
                    .with_message(format!("auto-lock persist failed: {err}"));
                event.event = "tenant_auto_lock_failed";
                event.severity = AuditSeverity::Critical;
                event
            }
        };
        self.audit.record(&event);
        GateDecision::Deny(Denial::new(reason, Some(tenant.id)))
    }

    /// Records and returns a denial.
    fn deny(
        &self,
        reason: DenialReason,
        tenant_id: Option<TenantId>,
        username: &Username,
        route: &str,
        now: Timestamp,
        decorate: impl FnOnce(GateAuditEvent) -> GateAuditEvent,
    ) -> GateDecision {
        let severity = match reason {
            DenialReason::DirectoryUnavailable | DenialReason::NamespaceUnavailable => {
                AuditSeverity::Critical
            }
            DenialReason::Unauthenticated
            | DenialReason::TenantRevoked
            | DenialReason::SubscriptionExpired => AuditSeverity::Warning,
        };
        let event = GateAuditEvent::new("access_denied", severity, now)
            .with_tenant(tenant_id)
            .with_username(Some(username))
            .with_route(route)
            .with_reason(reason.as_str());
        self.audit.record(&decorate(event));
        GateDecision::Deny(Denial::new(reason, tenant_id))
    }
}
