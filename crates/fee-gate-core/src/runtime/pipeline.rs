// crates/fee-gate-core/src/runtime/pipeline.rs
// ============================================================================
// Module: Request Pipeline
// Description: Resolve, gate and namespace activation for one request.
// Purpose: Enforce the per-request ordering and hand handlers a scoped view.
// Dependencies: crate::{audit, core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! [`RequestPipeline::admit`] is the single entry point the web layer calls
//! for every request. It runs three steps strictly in order:
//! 1. resolve the [`TenantContext`] from the session
//! 2. evaluate the [`AccessGate`] (including any auto-lock write)
//! 3. activate the namespace for the admitted context
//!
//! A denial at step 2 returns before any connection is checked out. A failure
//! at step 3 denies the request. The [`ActiveRequest`] owns the namespace
//! handle, and dropping it releases the binding.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use crate::audit::AuditSeverity;
use crate::audit::AuditSink;
use crate::audit::GateAuditEvent;
use crate::core::OwnedEntity;
use crate::core::Session;
use crate::core::Tenant;
use crate::core::TenantContext;
use crate::core::Timestamp;
use crate::interfaces::NamespaceRouter;
use crate::interfaces::OwnedStore;
use crate::interfaces::TenantDirectory;
use crate::runtime::gate::AccessGate;
use crate::runtime::gate::Denial;
use crate::runtime::gate::DenialReason;
use crate::runtime::gate::ExemptRoutes;
use crate::runtime::gate::GateDecision;
use crate::runtime::resolver::resolve;
use crate::runtime::scoped::ScopedQuery;
use crate::runtime::scoped::scoped;

// ============================================================================
// SECTION: Admission
// ============================================================================

/// Outcome of admitting one request.
pub enum Admission<H> {
    /// Route is on the allow-list; no context, gate or namespace applies.
    Exempt,
    /// Request may proceed with a bound namespace.
    Admitted(ActiveRequest<H>),
    /// Request is denied and must not touch tenant data.
    Denied(Denial),
}

impl<H> Admission<H> {
    /// Returns the denial, if any.
    #[must_use]
    pub const fn denial(&self) -> Option<&Denial> {
        match self {
            Self::Denied(denial) => Some(denial),
            Self::Exempt | Self::Admitted(_) => None,
        }
    }
}

/// Admitted request with its namespace binding.
pub struct ActiveRequest<H> {
    /// Resolved context.
    context: TenantContext,
    /// Tenant row read by the gate (school administrators only).
    tenant: Option<Tenant>,
    /// Namespace-bound store handle; released on drop.
    handle: H,
    /// Audit sink handed to scoped queries.
    audit: Arc<dyn AuditSink>,
    /// Request time.
    now: Timestamp,
}

impl<H: OwnedStore> ActiveRequest<H> {
    /// Returns the resolved context.
    #[must_use]
    pub const fn context(&self) -> &TenantContext {
        &self.context
    }

    /// Returns the tenant row read by the gate.
    #[must_use]
    pub const fn tenant(&self) -> Option<&Tenant> {
        self.tenant.as_ref()
    }

    /// Returns the request time.
    #[must_use]
    pub const fn now(&self) -> Timestamp {
        self.now
    }

    /// Returns a scoped query for `E` bound to this request.
    #[must_use]
    pub fn scoped<E: OwnedEntity>(&self) -> ScopedQuery<'_, E, H> {
        scoped::<E, H>(&self.handle, &self.context, self.audit.as_ref(), self.now)
    }
}

// ============================================================================
// SECTION: Pipeline
// ============================================================================

/// Per-request admission pipeline.
pub struct RequestPipeline<D, R> {
    /// Access gate.
    gate: AccessGate<D>,
    /// Namespace router.
    router: R,
    /// Routes that bypass the pipeline.
    exempt: ExemptRoutes,
    /// Audit sink.
    audit: Arc<dyn AuditSink>,
}

impl<D: TenantDirectory, R: NamespaceRouter> RequestPipeline<D, R> {
    /// Creates a pipeline.
    #[must_use]
    pub fn new(
        gate: AccessGate<D>,
        router: R,
        exempt: ExemptRoutes,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            gate,
            router,
            exempt,
            audit,
        }
    }

    /// Returns the access gate.
    #[must_use]
    pub const fn gate(&self) -> &AccessGate<D> {
        &self.gate
    }

    /// Admits one request.
    pub fn admit(&self, session: &Session, route: &str, now: Timestamp) -> Admission<R::Handle> {
        if self.exempt.is_exempt(route) {
            return Admission::Exempt;
        }
        let context = resolve(session);
        let grant = match self.gate.evaluate(&context, route, now) {
            GateDecision::Allow(grant) => grant,
            GateDecision::Deny(denial) => return Admission::Denied(denial),
        };
        let binding = grant.binding();
        match self.router.activate(binding) {
            Ok(handle) => Admission::Admitted(ActiveRequest {
                context: grant.context,
                tenant: grant.tenant,
                handle,
                audit: Arc::clone(&self.audit),
                now,
            }),
            Err(err) => {
                let reason = DenialReason::NamespaceUnavailable;
                let event = GateAuditEvent::new("access_denied", AuditSeverity::Critical, now)
                    .with_tenant(context.tenant_id())
                    .with_username(context.username())
                    .with_route(route)
                    .with_reason(reason.as_str())
                    .with_message(err.to_string());
                self.audit.record(&event);
                Admission::Denied(Denial::new(reason, context.tenant_id()))
            }
        }
    }
}
