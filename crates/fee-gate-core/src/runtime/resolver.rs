// crates/fee-gate-core/src/runtime/resolver.rs
// ============================================================================
// Module: Tenant Context Resolver
// Description: Derives the request-scoped tenant context from session state.
// Purpose: Turn untrusted session fields into a typed context, failing closed.
// Dependencies: crate::core
// ============================================================================

//! ## Overview
//! Resolution is pure and infallible. Anything the resolver cannot make sense
//! of (missing username, unknown role, a tenant id that is zero or negative)
//! collapses to [`TenantContext::Unauthenticated`] so the gate denies it.
//! A malformed tenant id on a developer session is treated the same way, so it
//! can never widen into unrestricted cross-tenant access.

// ============================================================================
// SECTION: Imports
// ============================================================================

use crate::core::Role;
use crate::core::Session;
use crate::core::TenantContext;
use crate::core::TenantId;
use crate::core::Username;

// ============================================================================
// SECTION: Resolver
// ============================================================================

/// Resolves the tenant context for one request.
#[must_use]
pub fn resolve(session: &Session) -> TenantContext {
    if !session.logged_in {
        return TenantContext::Unauthenticated;
    }
    let Some(username) = session.username.as_deref().filter(|name| !name.trim().is_empty()) else {
        return TenantContext::Unauthenticated;
    };
    let Some(role) = session.role.as_deref().and_then(|label| label.parse::<Role>().ok()) else {
        return TenantContext::Unauthenticated;
    };
    let tenant_id = match session.tenant_id {
        None => None,
        Some(raw) => match TenantId::from_i64(raw) {
            Some(tenant_id) => Some(tenant_id),
            None => return TenantContext::Unauthenticated,
        },
    };
    TenantContext::Authenticated {
        username: Username::new(username),
        role,
        tenant_id,
    }
}
