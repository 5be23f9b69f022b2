// crates/fee-gate-store-postgres/tests/postgres_config.rs
// ============================================================================
// Module: Postgres Store Config Tests
// Description: Config defaults, validation and schema naming.
// Purpose: Cover the parts of the Postgres backend that need no server.
// Dependencies: fee-gate-store-postgres, fee-gate-core, toml
// ============================================================================
//! ## Overview
//! Exercises [`PostgresStoreConfig`] parsing and validation plus the tenant
//! schema naming helpers. Nothing here opens a connection.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use fee_gate_core::TenantId;
use fee_gate_store_postgres::PostgresStoreConfig;
use fee_gate_store_postgres::PostgresStoreError;
use fee_gate_store_postgres::TENANT_SCHEMA_PREFIX;
use fee_gate_store_postgres::quoted_tenant_schema;
use fee_gate_store_postgres::tenant_schema;

/// Defaults pass validation and carry the statement timeout.
#[test]
fn defaults_validate() {
    let config = PostgresStoreConfig::default();
    config.validate().unwrap();
    assert_eq!(config.max_connections, 16);
    assert_eq!(config.session_options(), "-c statement_timeout=30000");
}

/// Missing keys fall back to defaults when parsed from TOML.
#[test]
fn partial_toml_uses_defaults() {
    let config: PostgresStoreConfig = toml::from_str(
        r#"
connection = "postgres://fees@db.internal/fees"
max_connections = 4
"#,
    )
    .unwrap();
    assert_eq!(config.connection, "postgres://fees@db.internal/fees");
    assert_eq!(config.max_connections, 4);
    assert_eq!(config.connect_timeout_ms, PostgresStoreConfig::default().connect_timeout_ms);
    config.validate().unwrap();
}

/// Blank connections and zero limits are rejected.
#[test]
fn invalid_values_are_rejected() {
    let empty = PostgresStoreConfig {
        connection: "   ".to_string(),
        ..PostgresStoreConfig::default()
    };
    assert!(matches!(empty.validate(), Err(PostgresStoreError::Invalid(_))));

    let no_pool = PostgresStoreConfig {
        max_connections: 0,
        ..PostgresStoreConfig::default()
    };
    assert!(matches!(no_pool.validate(), Err(PostgresStoreError::Invalid(_))));

    let no_timeout = PostgresStoreConfig {
        statement_timeout_ms: 0,
        ..PostgresStoreConfig::default()
    };
    assert!(matches!(no_timeout.validate(), Err(PostgresStoreError::Invalid(_))));
}

/// Each school maps to its own prefixed schema.
#[test]
fn schema_names_follow_tenant_ids() {
    let first = TenantId::from_raw(1).unwrap();
    let second = TenantId::from_raw(42).unwrap();
    assert_eq!(tenant_schema(first), format!("{TENANT_SCHEMA_PREFIX}1"));
    assert_eq!(tenant_schema(second), "school_42");
    assert_eq!(quoted_tenant_schema(second), "\"school_42\"");
    assert_ne!(tenant_schema(first), tenant_schema(second));
}
