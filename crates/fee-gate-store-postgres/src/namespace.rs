// crates/fee-gate-store-postgres/src/namespace.rs
// ============================================================================
// Module: Postgres Tenant Namespaces
// Description: Schema-per-tenant routing and the request-scoped owned store.
// Purpose: Bind one pooled connection to one school's schema per request.
// Dependencies: fee-gate-core, postgres, postgres-types, serde_json
// ============================================================================

//! ## Overview
//! Each school owns a schema named [`tenant_schema`] holding its
//! `owned_records` table. Activation creates the schema on first use,
//! then sets `search_path` to that schema alone. [`PostgresNamespace`] keeps the
//! connection for the rest of the request and resets `search_path` on drop,
//! so a pooled connection never carries a previous request's binding.
//!
//! Record ids come from the shared `public.owned_record_owners` registry,
//! which also records each row's owner. Guarded writes consult the registry
//! to tell a missing row from one owned by another school, and developer
//! requests bound to the shared namespace use it to reach rows across
//! school schemas.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Mutex;
use std::sync::MutexGuard;

use fee_gate_core::EntityKind;
use fee_gate_core::NamespaceBinding;
use fee_gate_core::NewStoredRecord;
use fee_gate_core::OwnedStore;
use fee_gate_core::OwnershipGuard;
use fee_gate_core::RecordId;
use fee_gate_core::StoreError;
use fee_gate_core::StoredRecord;
use fee_gate_core::TenantFilter;
use fee_gate_core::TenantId;
use fee_gate_core::WriteOutcome;
use postgres::GenericClient;
use postgres::Row;
use postgres_types::Json;

use crate::store::PgConnection;
use crate::store::PostgresStoreError;
use crate::store::column;
use crate::store::load_tenant;
use crate::store::record_id_from_column;
use crate::store::tenant_id_from_column;

// ============================================================================
// SECTION: Naming
// ============================================================================

/// Prefix of every school schema.
pub const TENANT_SCHEMA_PREFIX: &str = "school_";

/// Returns the schema name for a tenant (`school_<id>`).
#[must_use]
pub fn tenant_schema(tenant_id: TenantId) -> String {
    format!("{TENANT_SCHEMA_PREFIX}{tenant_id}")
}

/// Returns the quoted schema identifier for SQL text.
#[must_use]
pub fn quoted_tenant_schema(tenant_id: TenantId) -> String {
    format!("\"{}\"", tenant_schema(tenant_id))
}

/// Returns the fully qualified owned-record table of a tenant.
fn qualified_table(tenant_id: TenantId) -> String {
    format!("{}.owned_records", quoted_tenant_schema(tenant_id))
}

// ============================================================================
// SECTION: Schema Management
// ============================================================================

/// Creates the tenant schema and its table when missing.
pub(crate) fn ensure_tenant_schema(
    client: &mut impl GenericClient,
    tenant_id: TenantId,
) -> Result<(), PostgresStoreError> {
    let schema = quoted_tenant_schema(tenant_id);
    client.batch_execute(&format!(
        "CREATE SCHEMA IF NOT EXISTS {schema};CREATE TABLE IF NOT EXISTS {schema}.owned_records \
         (id BIGINT PRIMARY KEY REFERENCES public.owned_record_owners(id) ON DELETE CASCADE,kind \
         TEXT NOT NULL,tenant_id BIGINT NOT NULL,fields JSONB NOT NULL);CREATE INDEX IF NOT \
         EXISTS idx_owned_records_kind ON {schema}.owned_records (kind, id);"
    ))?;
    Ok(())
}

/// Drops the tenant schema and everything in it.
pub(crate) fn drop_tenant_schema(
    client: &mut impl GenericClient,
    tenant_id: TenantId,
) -> Result<(), PostgresStoreError> {
    client.batch_execute(&format!(
        "DROP SCHEMA IF EXISTS {} CASCADE;",
        quoted_tenant_schema(tenant_id)
    ))?;
    Ok(())
}

/// Points the connection's `search_path` at the binding.
///
/// Runs on every activation, so a checked-out connection never keeps the
/// path a previous request left behind.
pub(crate) fn select_namespace(
    conn: &mut PgConnection,
    binding: NamespaceBinding,
) -> Result<(), PostgresStoreError> {
    match binding {
        NamespaceBinding::Shared => {
            conn.batch_execute("SET search_path TO public")?;
        }
        NamespaceBinding::Tenant(tenant_id) => {
            if load_tenant(&mut **conn, tenant_id)?.is_none() {
                return Err(PostgresStoreError::Invalid(format!("unknown tenant: {tenant_id}")));
            }
            ensure_tenant_schema(&mut **conn, tenant_id)?;
            conn.batch_execute(&format!(
                "SET search_path TO {}",
                quoted_tenant_schema(tenant_id)
            ))?;
        }
    }
    Ok(())
}

// ============================================================================
// SECTION: Namespace Handle
// ============================================================================

/// Request-scoped owned store bound to one namespace.
///
/// # Invariants
/// - While bound to a tenant, only that tenant's rows are read or written.
/// - Dropping the handle resets `search_path` before the connection returns
///   to the pool.
pub struct PostgresNamespace {
    /// Pooled connection with `search_path` already selected.
    conn: Mutex<PgConnection>,
    /// Active binding.
    binding: NamespaceBinding,
}

impl Drop for PostgresNamespace {
    fn drop(&mut self) {
        // r2d2 discards closed clients on return. A live client that refuses the
        // reset is pinned to `public`, and activation re-selects the path anyway.
        if let Ok(conn) = self.conn.get_mut()
            && conn.batch_execute("RESET search_path").is_err()
            && !conn.is_closed()
        {
            let _ = conn.batch_execute("SET search_path TO public");
        }
    }
}

impl PostgresNamespace {
    /// Wraps an activated connection.
    pub(crate) const fn new(conn: PgConnection, binding: NamespaceBinding) -> Self {
        Self {
            conn: Mutex::new(conn),
            binding,
        }
    }

    /// Returns the active binding.
    #[must_use]
    pub const fn binding(&self) -> NamespaceBinding {
        self.binding
    }

    /// Returns the session's current `search_path`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the connection fails.
    pub fn search_path(&self) -> Result<String, StoreError> {
        let mut conn = self.lock()?;
        let row = conn
            .query_one("SELECT current_setting('search_path')", &[])
            .map_err(PostgresStoreError::from)?;
        Ok(column(&row, 0)?)
    }

    /// Locks the bound connection.
    fn lock(&self) -> Result<MutexGuard<'_, PgConnection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("postgres namespace mutex poisoned".to_string()))
    }

    /// Returns the table holding `owner`'s rows on this connection.
    ///
    /// Tenant-bound handles rely on `search_path`; shared handles qualify.
    fn table_for(&self, owner: TenantId) -> String {
        match self.binding {
            NamespaceBinding::Tenant(_) => "owned_records".to_string(),
            NamespaceBinding::Shared => qualified_table(owner),
        }
    }

    /// Returns true when this handle may touch rows owned by `owner`.
    fn reaches(&self, owner: TenantId) -> bool {
        match self.binding {
            NamespaceBinding::Tenant(tenant_id) => tenant_id == owner,
            NamespaceBinding::Shared => true,
        }
    }
}

// ============================================================================
// SECTION: Owned Store
// ============================================================================

impl OwnedStore for PostgresNamespace {
    fn list(
        &self,
        kind: EntityKind,
        filter: TenantFilter,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        let mut conn = self.lock()?;
        let owners = match (self.binding, filter) {
            (NamespaceBinding::Tenant(bound), TenantFilter::Tenant(wanted)) if bound != wanted => {
                return Ok(Vec::new());
            }
            (NamespaceBinding::Tenant(bound), _) => vec![bound],
            (NamespaceBinding::Shared, filter) => owners_with_rows(&mut **conn, kind, filter)?,
        };
        let mut records = Vec::new();
        for owner in owners {
            let rows = conn
                .query(
                    &format!(
                        "SELECT id, kind, tenant_id, fields FROM {} WHERE kind = $1 AND \
                         tenant_id = $2 ORDER BY id",
                        self.table_for(owner)
                    ),
                    &[&kind.as_str(), &owner.as_i64()],
                )
                .map_err(PostgresStoreError::from)?;
            for row in &rows {
                records.push(owned_from_row(row)?);
            }
        }
        records.sort_by_key(|record| record.id);
        Ok(records)
    }

    fn fetch(
        &self,
        kind: EntityKind,
        id: RecordId,
        filter: TenantFilter,
    ) -> Result<Option<StoredRecord>, StoreError> {
        let mut conn = self.lock()?;
        let Some(owner) = registered_owner(&mut **conn, kind, id, false)? else {
            return Ok(None);
        };
        if !filter.admits(owner) || !self.reaches(owner) {
            return Ok(None);
        }
        let row = conn
            .query_opt(
                &format!(
                    "SELECT id, kind, tenant_id, fields FROM {} WHERE id = $1 AND kind = $2",
                    self.table_for(owner)
                ),
                &[&id.as_i64(), &kind.as_str()],
            )
            .map_err(PostgresStoreError::from)?;
        Ok(row.as_ref().map(owned_from_row).transpose()?)
    }

    fn insert(&self, record: &NewStoredRecord) -> Result<StoredRecord, StoreError> {
        if !self.reaches(record.tenant_id) {
            return Err(StoreError::Invalid(format!(
                "record owner {} does not match active namespace {}",
                record.tenant_id, self.binding
            )));
        }
        let mut conn = self.lock()?;
        let mut tx = conn.transaction().map_err(PostgresStoreError::from)?;
        if load_tenant(&mut tx, record.tenant_id)?.is_none() {
            return Err(StoreError::Invalid(format!("unknown tenant: {}", record.tenant_id)));
        }
        if self.binding == NamespaceBinding::Shared {
            ensure_tenant_schema(&mut tx, record.tenant_id)?;
        }
        let row = tx
            .query_one(
                "INSERT INTO public.owned_record_owners (kind, tenant_id) VALUES ($1, $2) \
                 RETURNING id",
                &[&record.kind.as_str(), &record.tenant_id.as_i64()],
            )
            .map_err(PostgresStoreError::from)?;
        let id = record_id_from_column(column(&row, 0)?)?;
        tx.execute(
            &format!(
                "INSERT INTO {} (id, kind, tenant_id, fields) VALUES ($1, $2, $3, $4)",
                self.table_for(record.tenant_id)
            ),
            &[
                &id.as_i64(),
                &record.kind.as_str(),
                &record.tenant_id.as_i64(),
                &Json(&record.fields),
            ],
        )
        .map_err(PostgresStoreError::from)?;
        tx.commit().map_err(PostgresStoreError::from)?;
        Ok(StoredRecord {
            kind: record.kind,
            id,
            tenant_id: record.tenant_id,
            fields: record.fields.clone(),
        })
    }

    fn update(
        &self,
        kind: EntityKind,
        id: RecordId,
        guard: OwnershipGuard,
        fields: &serde_json::Value,
    ) -> Result<WriteOutcome, StoreError> {
        let mut conn = self.lock()?;
        let mut tx = conn.transaction().map_err(PostgresStoreError::from)?;
        let Some(owner) = registered_owner(&mut tx, kind, id, true)? else {
            return Ok(WriteOutcome::NotFound);
        };
        if !guard.permits(owner) || !self.reaches(owner) {
            return Ok(WriteOutcome::OwnerMismatch {
                owner,
            });
        }
        tx.execute(
            &format!(
                "UPDATE {} SET fields = $1 WHERE id = $2 AND kind = $3",
                self.table_for(owner)
            ),
            &[&Json(fields), &id.as_i64(), &kind.as_str()],
        )
        .map_err(PostgresStoreError::from)?;
        tx.commit().map_err(PostgresStoreError::from)?;
        Ok(WriteOutcome::Applied)
    }

    fn delete(
        &self,
        kind: EntityKind,
        id: RecordId,
        guard: OwnershipGuard,
    ) -> Result<WriteOutcome, StoreError> {
        let mut conn = self.lock()?;
        let mut tx = conn.transaction().map_err(PostgresStoreError::from)?;
        let Some(owner) = registered_owner(&mut tx, kind, id, true)? else {
            return Ok(WriteOutcome::NotFound);
        };
        if !guard.permits(owner) || !self.reaches(owner) {
            return Ok(WriteOutcome::OwnerMismatch {
                owner,
            });
        }
        tx.execute(&format!("DELETE FROM {} WHERE id = $1", self.table_for(owner)), &[
            &id.as_i64(),
        ])
        .map_err(PostgresStoreError::from)?;
        tx.execute("DELETE FROM public.owned_record_owners WHERE id = $1", &[&id.as_i64()])
            .map_err(PostgresStoreError::from)?;
        tx.commit().map_err(PostgresStoreError::from)?;
        Ok(WriteOutcome::Applied)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Looks up the owner of a registered row, optionally locking it.
fn registered_owner(
    client: &mut impl GenericClient,
    kind: EntityKind,
    id: RecordId,
    lock: bool,
) -> Result<Option<TenantId>, PostgresStoreError> {
    let sql = if lock {
        "SELECT tenant_id FROM public.owned_record_owners WHERE id = $1 AND kind = $2 FOR UPDATE"
    } else {
        "SELECT tenant_id FROM public.owned_record_owners WHERE id = $1 AND kind = $2"
    };
    client
        .query_opt(sql, &[&id.as_i64(), &kind.as_str()])?
        .map(|row| column(&row, 0).and_then(tenant_id_from_column))
        .transpose()
}

/// Lists tenants holding rows of `kind`, ordered by id.
fn owners_with_rows(
    client: &mut impl GenericClient,
    kind: EntityKind,
    filter: TenantFilter,
) -> Result<Vec<TenantId>, PostgresStoreError> {
    let wanted: Option<i64> = match filter {
        TenantFilter::All => None,
        TenantFilter::Tenant(tenant_id) => Some(tenant_id.as_i64()),
    };
    let rows = client.query(
        "SELECT DISTINCT tenant_id FROM public.owned_record_owners WHERE kind = $1 AND \
         ($2::BIGINT IS NULL OR tenant_id = $2) ORDER BY tenant_id",
        &[&kind.as_str(), &wanted],
    )?;
    rows.iter().map(|row| column(row, 0).and_then(tenant_id_from_column)).collect()
}

/// Converts an owned record row.
fn owned_from_row(row: &Row) -> Result<StoredRecord, PostgresStoreError> {
    let kind: String = column(row, 1)?;
    let Json(fields): Json<serde_json::Value> = column(row, 3)?;
    Ok(StoredRecord {
        kind: kind.parse::<EntityKind>()?,
        id: record_id_from_column(column(row, 0)?)?,
        tenant_id: tenant_id_from_column(column(row, 2)?)?,
        fields,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Schema names are derived from the numeric tenant id.
    #[test]
    fn qualified_table_quotes_schema() {
        let tenant_id = TenantId::from_raw(12);
        assert_eq!(tenant_id.map(qualified_table), Some("\"school_12\".owned_records".to_string()));
    }
}
