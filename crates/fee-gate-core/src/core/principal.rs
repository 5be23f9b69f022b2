// crates/fee-gate-core/src/core/principal.rs
// ============================================================================
// Module: Principals and Request Context
// Description: Principal roles, principal accounts, inbound sessions and the
//              request-scoped tenant context.
// Purpose: Carry the authenticated actor explicitly through every scoped call.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! A [`Session`] is the raw, untrusted state handed over by the web layer.
//! The resolver turns it into a [`TenantContext`], which is created per
//! request, passed by reference into every gate and scoped call, and dropped
//! at request end. Nothing here is cached or ambient.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::TenantId;
use crate::core::identifiers::Username;
use crate::core::tenant::UnknownLabel;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Roles
// ============================================================================

/// Role of an authenticated principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Global cross-tenant operator.
    Developer,
    /// Administrator bound to exactly one school.
    SchoolAdmin,
}

impl Role {
    /// Returns the stable label used in sessions and storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Developer => "developer",
            Self::SchoolAdmin => "school_admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = UnknownLabel;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "developer" => Ok(Self::Developer),
            "school_admin" => Ok(Self::SchoolAdmin),
            other => Err(UnknownLabel {
                kind: "role",
                label: other.to_string(),
            }),
        }
    }
}

// ============================================================================
// SECTION: Principal Accounts
// ============================================================================

/// Principal account stored in the shared namespace.
///
/// # Invariants
/// - `role == SchoolAdmin` implies `tenant_id.is_some()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalRecord {
    /// Login name; unique across all tenants.
    pub username: Username,
    /// Principal role.
    pub role: Role,
    /// Bound tenant for school administrators.
    pub tenant_id: Option<TenantId>,
    /// Whether the account may log in.
    pub is_active: bool,
    /// Whether the next login must change the password.
    pub must_change_password: bool,
    /// Creation time.
    pub created_at: Timestamp,
}

/// Input for creating a principal account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPrincipal {
    /// Login name.
    pub username: Username,
    /// Principal role.
    pub role: Role,
    /// Bound tenant for school administrators.
    pub tenant_id: Option<TenantId>,
    /// Whether the next login must change the password.
    pub must_change_password: bool,
}

// ============================================================================
// SECTION: Sessions
// ============================================================================

/// Inbound session state supplied by the web layer.
///
/// Fields are kept in their raw wire form; the resolver decides what is
/// trustworthy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Whether the session carries a logged-in principal.
    #[serde(default)]
    pub logged_in: bool,
    /// Login name.
    #[serde(default)]
    pub username: Option<String>,
    /// Role label (`developer` or `school_admin`).
    #[serde(default)]
    pub role: Option<String>,
    /// Raw tenant id.
    #[serde(default)]
    pub tenant_id: Option<i64>,
}

impl Session {
    /// Returns an anonymous session.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Returns a logged-in developer session, optionally impersonating a tenant.
    #[must_use]
    pub fn developer(username: &str, tenant_id: Option<TenantId>) -> Self {
        Self {
            logged_in: true,
            username: Some(username.to_string()),
            role: Some(Role::Developer.as_str().to_string()),
            tenant_id: tenant_id.map(TenantId::as_i64),
        }
    }

    /// Returns a logged-in school administrator session.
    #[must_use]
    pub fn school_admin(username: &str, tenant_id: Option<TenantId>) -> Self {
        Self {
            logged_in: true,
            username: Some(username.to_string()),
            role: Some(Role::SchoolAdmin.as_str().to_string()),
            tenant_id: tenant_id.map(TenantId::as_i64),
        }
    }
}

// ============================================================================
// SECTION: Tenant Context
// ============================================================================

/// Request-scoped actor and tenant binding.
///
/// # Invariants
/// - Created once per request by the resolver and never persisted.
/// - `Unauthenticated` must be treated as an immediate denial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantContext {
    /// No authenticated principal.
    Unauthenticated,
    /// Authenticated principal.
    Authenticated {
        /// Login name.
        username: Username,
        /// Principal role.
        role: Role,
        /// Active tenant (bound tenant, or impersonated tenant for developers).
        tenant_id: Option<TenantId>,
    },
}

impl TenantContext {
    /// Builds a developer context.
    #[must_use]
    pub fn developer(username: impl Into<Username>, tenant_id: Option<TenantId>) -> Self {
        Self::Authenticated {
            username: username.into(),
            role: Role::Developer,
            tenant_id,
        }
    }

    /// Builds a school administrator context.
    #[must_use]
    pub fn school_admin(username: impl Into<Username>, tenant_id: Option<TenantId>) -> Self {
        Self::Authenticated {
            username: username.into(),
            role: Role::SchoolAdmin,
            tenant_id,
        }
    }

    /// Returns the active tenant id, if any.
    #[must_use]
    pub const fn tenant_id(&self) -> Option<TenantId> {
        match self {
            Self::Unauthenticated => None,
            Self::Authenticated { tenant_id, .. } => *tenant_id,
        }
    }

    /// Returns the principal role, if authenticated.
    #[must_use]
    pub const fn role(&self) -> Option<Role> {
        match self {
            Self::Unauthenticated => None,
            Self::Authenticated { role, .. } => Some(*role),
        }
    }

    /// Returns the username, if authenticated.
    #[must_use]
    pub const fn username(&self) -> Option<&Username> {
        match self {
            Self::Unauthenticated => None,
            Self::Authenticated { username, .. } => Some(username),
        }
    }

    /// Returns true for developer contexts.
    #[must_use]
    pub const fn is_developer(&self) -> bool {
        matches!(self, Self::Authenticated { role: Role::Developer, .. })
    }
}
