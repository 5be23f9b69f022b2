// crates/fee-gate-store-sqlite/src/lib.rs
// ============================================================================
// Module: Fee Gate SQLite Store
// Description: SQLite-backed storage for the fee gate.
// Purpose: Provide a durable single-file backend for development and small
//          deployments.
// Dependencies: fee-gate-core, rusqlite
// ============================================================================

//! ## Overview
//! Implements every fee gate storage interface over one `SQLite` database.
//! Tenant isolation is row-level: owned records carry a `tenant_id` column
//! and every read and guarded write filters on it. Namespace activation only
//! verifies connectivity and tenant existence.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use store::SqliteJournalMode;
pub use store::SqliteStore;
pub use store::SqliteStoreConfig;
pub use store::SqliteStoreError;
pub use store::SqliteSyncMode;
