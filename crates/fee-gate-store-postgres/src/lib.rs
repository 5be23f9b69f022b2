// crates/fee-gate-store-postgres/src/lib.rs
// ============================================================================
// Module: Fee Gate Postgres Store
// Description: Postgres-backed storage with schema-per-tenant isolation.
// Purpose: Provide the production backend and namespace router.
// Dependencies: fee-gate-core, postgres, r2d2, r2d2_postgres
// ============================================================================

//! ## Overview
//! Global entities (tenants, principals, subscriptions, notifications and the
//! owned-record registry) live in the `public` schema and every statement
//! touching them is schema-qualified. Each school's owned records live in its
//! own schema, selected per request through `search_path` by
//! [`PostgresStore`]'s [`fee_gate_core::NamespaceRouter`] implementation.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod namespace;
pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use namespace::PostgresNamespace;
pub use namespace::TENANT_SCHEMA_PREFIX;
pub use namespace::quoted_tenant_schema;
pub use namespace::tenant_schema;
pub use store::PostgresStore;
pub use store::PostgresStoreConfig;
pub use store::PostgresStoreError;
