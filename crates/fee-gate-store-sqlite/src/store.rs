// crates/fee-gate-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Fee Gate Store
// Description: Tenant directory, subscription ledger and owned records in SQLite.
// Purpose: Persist tenants and tenant-owned rows with atomic guarded writes.
// Dependencies: fee-gate-core, rusqlite, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! [`SqliteStore`] implements [`TenantDirectory`], [`SubscriptionLedger`],
//! [`OwnedStore`] and [`NamespaceRouter`] over one `SQLite` connection guarded
//! by a mutex. Multi-row mutations run inside a single transaction, and
//! tenant deletion relies on `ON DELETE CASCADE` foreign keys so a school's
//! principals, subscriptions, notifications and owned rows vanish together.
//! Security posture: database contents are untrusted; every row is validated
//! on load and unknown labels fail closed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::time::Duration;

use fee_gate_core::DirectoryError;
use fee_gate_core::EntityKind;
use fee_gate_core::LockOutcome;
use fee_gate_core::NamespaceBinding;
use fee_gate_core::NamespaceRouter;
use fee_gate_core::NewNotification;
use fee_gate_core::NewStoredRecord;
use fee_gate_core::NotificationKind;
use fee_gate_core::NotificationRecord;
use fee_gate_core::OwnedStore;
use fee_gate_core::OwnershipGuard;
use fee_gate_core::PrincipalRecord;
use fee_gate_core::Provisioning;
use fee_gate_core::RecordId;
use fee_gate_core::Renewal;
use fee_gate_core::Role;
use fee_gate_core::RouterError;
use fee_gate_core::StoreError;
use fee_gate_core::StoredRecord;
use fee_gate_core::SubscriptionLedger;
use fee_gate_core::SubscriptionPlan;
use fee_gate_core::SubscriptionRecord;
use fee_gate_core::SubscriptionStatus;
use fee_gate_core::Tenant;
use fee_gate_core::TenantDirectory;
use fee_gate_core::TenantFilter;
use fee_gate_core::TenantId;
use fee_gate_core::Timestamp;
use fee_gate_core::UnknownLabel;
use fee_gate_core::Username;
use fee_gate_core::WriteOutcome;
use rusqlite::Connection;
use rusqlite::ErrorCode;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::Transaction;
use rusqlite::TransactionBehavior;
use rusqlite::params;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for the store.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Maximum serialized size of one owned record payload.
pub const MAX_RECORD_BYTES: usize = 256 * 1024;

/// Tenant column list shared by every tenant query.
const TENANT_COLUMNS: &str = "id, name, is_active, is_blocked, subscription_status, \
                              subscription_plan, subscription_end, trial_start, \
                              last_notification_sent, created_at, updated_at";
/// Principal column list.
const PRINCIPAL_COLUMNS: &str =
    "username, role, tenant_id, is_active, must_change_password, created_at";
/// Subscription column list.
const SUBSCRIPTION_COLUMNS: &str = "id, tenant_id, plan, start_at, end_at, amount_paid_minor, \
                                    payment_reference, is_active, created_by, notes, created_at";
/// Notification column list.
const NOTIFICATION_COLUMNS: &str = "id, tenant_id, kind, message, days_remaining, sent_at";

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `journal_mode` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteJournalMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode (legacy).
    Delete,
}

impl SqliteJournalMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `synchronous` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode (balanced).
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for the `SQLite` store.
///
/// # Invariants
/// - `path` must resolve to a file path (not a directory).
/// - `busy_timeout_ms` is interpreted as milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SqliteStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteJournalMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
}

impl SqliteStoreConfig {
    /// Builds a config with default pragmas for `path`.
    #[must_use]
    pub const fn for_path(path: PathBuf) -> Self {
        Self {
            path,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: SqliteJournalMode::Wal,
            sync_mode: SqliteSyncMode::Full,
        }
    }
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` store errors.
///
/// # Invariants
/// - Error messages avoid embedding owned record payloads.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Store schema version mismatch.
    #[error("sqlite store version mismatch: {0}")]
    VersionMismatch(String),
    /// Invalid store data.
    #[error("sqlite store invalid data: {0}")]
    Invalid(String),
    /// Uniqueness constraint violation.
    #[error("sqlite store conflict: {0}")]
    Conflict(String),
}

impl From<rusqlite::Error> for SqliteStoreError {
    fn from(error: rusqlite::Error) -> Self {
        match &error {
            rusqlite::Error::SqliteFailure(failure, _)
                if failure.code == ErrorCode::ConstraintViolation =>
            {
                Self::Conflict(error.to_string())
            }
            _ => Self::Db(error.to_string()),
        }
    }
}

impl From<UnknownLabel> for SqliteStoreError {
    fn from(error: UnknownLabel) -> Self {
        Self::Invalid(error.to_string())
    }
}

impl From<SqliteStoreError> for DirectoryError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Io(message) | SqliteStoreError::Db(message) => {
                Self::Unavailable(message)
            }
            SqliteStoreError::VersionMismatch(message) | SqliteStoreError::Invalid(message) => {
                Self::Invalid(message)
            }
            SqliteStoreError::Conflict(message) => Self::Conflict(message),
        }
    }
}

impl From<SqliteStoreError> for StoreError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Io(message) | SqliteStoreError::Db(message) => {
                Self::Unavailable(message)
            }
            SqliteStoreError::VersionMismatch(message)
            | SqliteStoreError::Invalid(message)
            | SqliteStoreError::Conflict(message) => Self::Invalid(message),
        }
    }
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed fee gate store.
///
/// # Invariants
/// - Connection access is serialized through a mutex.
/// - `PRAGMA foreign_keys = ON` is applied before any statement runs.
#[derive(Clone)]
pub struct SqliteStore {
    /// Shared connection.
    connection: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (and if needed initializes) the store.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the database cannot be opened or
    /// carries an unsupported schema version.
    pub fn new(config: &SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        validate_store_path(&config.path)?;
        ensure_parent_dir(&config.path)?;
        let mut connection = open_connection(config)?;
        initialize_schema(&mut connection)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Locks the shared connection.
    fn lock(&self) -> Result<MutexGuard<'_, Connection>, SqliteStoreError> {
        self.connection
            .lock()
            .map_err(|_| SqliteStoreError::Io("sqlite connection mutex poisoned".to_string()))
    }

    /// Verifies the store can execute a simple SQL statement.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] if the mutex is poisoned or the query fails.
    pub fn readiness(&self) -> Result<(), SqliteStoreError> {
        let guard = self.lock()?;
        guard.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }

    /// Runs `body` in an immediate transaction and commits on success.
    fn write<T>(
        &self,
        body: impl FnOnce(&Transaction<'_>) -> Result<T, SqliteStoreError>,
    ) -> Result<T, SqliteStoreError> {
        let mut guard = self.lock()?;
        let tx = guard.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = body(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

// ============================================================================
// SECTION: Tenant Directory
// ============================================================================

impl TenantDirectory for SqliteStore {
    fn tenant(&self, tenant_id: TenantId) -> Result<Option<Tenant>, DirectoryError> {
        let guard = self.lock()?;
        Ok(load_tenant(&guard, tenant_id)?)
    }

    fn tenants(&self) -> Result<Vec<Tenant>, DirectoryError> {
        let guard = self.lock()?;
        let mut stmt = guard
            .prepare(&format!("SELECT {TENANT_COLUMNS} FROM tenants ORDER BY id"))
            .map_err(SqliteStoreError::from)?;
        let rows = stmt
            .query_map([], TenantRow::read)
            .map_err(SqliteStoreError::from)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(SqliteStoreError::from)?;
        Ok(rows.into_iter().map(TenantRow::into_tenant).collect::<Result<Vec<_>, _>>()?)
    }

    fn provision(&self, request: &Provisioning) -> Result<Tenant, DirectoryError> {
        Ok(self.write(|tx| {
            let taken: Option<i64> = tx
                .query_row(
                    "SELECT 1 FROM principals WHERE username = ?1",
                    params![request.admin_username.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            if taken.is_some() {
                return Err(SqliteStoreError::Conflict(format!(
                    "username already exists: {}",
                    request.admin_username
                )));
            }
            let start = request.start.as_unix_millis();
            tx.execute(
                "INSERT INTO tenants (name, is_active, is_blocked, subscription_status, \
                 subscription_plan, subscription_end, trial_start, last_notification_sent, \
                 created_at, updated_at) VALUES (?1, 1, 0, ?2, ?3, NULL, ?4, NULL, ?4, ?4)",
                params![
                    request.name,
                    request.plan.resulting_status().as_str(),
                    request.plan.as_str(),
                    start
                ],
            )?;
            let tenant_id = tenant_id_from_row(tx.last_insert_rowid())?;
            tx.execute(
                "INSERT INTO principals (username, role, tenant_id, is_active, \
                 must_change_password, created_at) VALUES (?1, ?2, ?3, 1, 1, ?4)",
                params![
                    request.admin_username.as_str(),
                    Role::SchoolAdmin.as_str(),
                    tenant_id.as_i64(),
                    start
                ],
            )?;
            tx.execute(
                &format!(
                    "INSERT INTO subscriptions ({SUBSCRIPTION_COLUMNS}) VALUES (NULL, ?1, ?2, ?3, \
                     ?4, 0, NULL, 1, ?5, ?6, ?3)"
                ),
                params![
                    tenant_id.as_i64(),
                    request.plan.as_str(),
                    start,
                    request.end.map(Timestamp::as_unix_millis),
                    request.created_by.as_str(),
                    request.notes
                ],
            )?;
            load_tenant(tx, tenant_id)?.ok_or_else(|| {
                SqliteStoreError::Db("provisioned tenant vanished before commit".to_string())
            })
        })?)
    }

    fn set_blocked(
        &self,
        tenant_id: TenantId,
        blocked: bool,
        status: SubscriptionStatus,
        now: Timestamp,
    ) -> Result<Tenant, DirectoryError> {
        let updated = self.write(|tx| {
            let changed = tx.execute(
                "UPDATE tenants SET is_blocked = ?1, subscription_status = ?2, updated_at = ?3 \
                 WHERE id = ?4",
                params![blocked, status.as_str(), now.as_unix_millis(), tenant_id.as_i64()],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            load_tenant(tx, tenant_id)
        })?;
        updated.ok_or(DirectoryError::NotFound(tenant_id))
    }

    fn lock_expired(
        &self,
        tenant_id: TenantId,
        now: Timestamp,
    ) -> Result<LockOutcome, DirectoryError> {
        Ok(self.write(|tx| lock_tenant(tx, tenant_id, now))?)
    }

    fn delete_tenant(&self, tenant_id: TenantId) -> Result<bool, DirectoryError> {
        Ok(self.write(|tx| {
            let deleted =
                tx.execute("DELETE FROM tenants WHERE id = ?1", params![tenant_id.as_i64()])?;
            Ok(deleted > 0)
        })?)
    }

    fn principal(&self, username: &Username) -> Result<Option<PrincipalRecord>, DirectoryError> {
        let guard = self.lock()?;
        let row = guard
            .query_row(
                &format!("SELECT {PRINCIPAL_COLUMNS} FROM principals WHERE username = ?1"),
                params![username.as_str()],
                PrincipalRow::read,
            )
            .optional()
            .map_err(SqliteStoreError::from)?;
        Ok(row.map(PrincipalRow::into_principal).transpose()?)
    }

    fn principals(&self, tenant_id: TenantId) -> Result<Vec<PrincipalRecord>, DirectoryError> {
        let guard = self.lock()?;
        let mut stmt = guard
            .prepare(&format!(
                "SELECT {PRINCIPAL_COLUMNS} FROM principals WHERE tenant_id = ?1 ORDER BY \
                 created_at, rowid"
            ))
            .map_err(SqliteStoreError::from)?;
        let rows = stmt
            .query_map(params![tenant_id.as_i64()], PrincipalRow::read)
            .map_err(SqliteStoreError::from)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(SqliteStoreError::from)?;
        Ok(rows.into_iter().map(PrincipalRow::into_principal).collect::<Result<Vec<_>, _>>()?)
    }
}

// ============================================================================
// SECTION: Subscription Ledger
// ============================================================================

impl SubscriptionLedger for SqliteStore {
    fn apply_renewal(
        &self,
        renewal: &Renewal,
        now: Timestamp,
    ) -> Result<(Tenant, SubscriptionRecord), DirectoryError> {
        let applied = self.write(|tx| {
            if load_tenant(tx, renewal.tenant_id)?.is_none() {
                return Ok(None);
            }
            let tenant_key = renewal.tenant_id.as_i64();
            tx.execute(
                "UPDATE subscriptions SET is_active = 0 WHERE tenant_id = ?1",
                params![tenant_key],
            )?;
            tx.execute(
                &format!(
                    "INSERT INTO subscriptions ({SUBSCRIPTION_COLUMNS}) VALUES (NULL, ?1, ?2, ?3, \
                     ?4, ?5, ?6, 1, ?7, ?8, ?9)"
                ),
                params![
                    tenant_key,
                    renewal.plan.as_str(),
                    renewal.start.as_unix_millis(),
                    renewal.end.map(Timestamp::as_unix_millis),
                    renewal.amount_paid_minor,
                    renewal.payment_reference,
                    renewal.created_by.as_str(),
                    renewal.notes,
                    now.as_unix_millis()
                ],
            )?;
            let record_id = record_id_from_row(tx.last_insert_rowid())?;
            tx.execute(
                "UPDATE tenants SET subscription_plan = ?1, subscription_status = ?2, \
                 subscription_end = ?3, is_blocked = 0, updated_at = ?4 WHERE id = ?5",
                params![
                    renewal.plan.as_str(),
                    renewal.status.as_str(),
                    renewal.end.map(Timestamp::as_unix_millis),
                    now.as_unix_millis(),
                    tenant_key
                ],
            )?;
            let tenant = load_tenant(tx, renewal.tenant_id)?.ok_or_else(|| {
                SqliteStoreError::Db("renewed tenant vanished before commit".to_string())
            })?;
            let record = tx
                .query_row(
                    &format!("SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE id = ?1"),
                    params![record_id.as_i64()],
                    SubscriptionRow::read,
                )?
                .into_record()?;
            Ok(Some((tenant, record)))
        })?;
        applied.ok_or(DirectoryError::NotFound(renewal.tenant_id))
    }

    fn subscriptions(
        &self,
        tenant_id: TenantId,
    ) -> Result<Vec<SubscriptionRecord>, DirectoryError> {
        let guard = self.lock()?;
        let mut stmt = guard
            .prepare(&format!(
                "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE tenant_id = ?1 ORDER BY \
                 id DESC"
            ))
            .map_err(SqliteStoreError::from)?;
        let rows = stmt
            .query_map(params![tenant_id.as_i64()], SubscriptionRow::read)
            .map_err(SqliteStoreError::from)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(SqliteStoreError::from)?;
        Ok(rows.into_iter().map(SubscriptionRow::into_record).collect::<Result<Vec<_>, _>>()?)
    }

    fn record_notification(
        &self,
        notification: &NewNotification,
    ) -> Result<NotificationRecord, DirectoryError> {
        let recorded = self.write(|tx| append_notification(tx, notification))?;
        recorded.ok_or(DirectoryError::NotFound(notification.tenant_id))
    }

    fn lock_expired_with_notice(
        &self,
        notice: &NewNotification,
    ) -> Result<LockOutcome, DirectoryError> {
        Ok(self.write(|tx| {
            let outcome = lock_tenant(tx, notice.tenant_id, notice.sent_at)?;
            if matches!(outcome, LockOutcome::Locked { .. }) {
                append_notification(tx, notice)?;
            }
            Ok(outcome)
        })?)
    }

    fn notifications(
        &self,
        tenant_id: TenantId,
        limit: usize,
    ) -> Result<Vec<NotificationRecord>, DirectoryError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let guard = self.lock()?;
        let mut stmt = guard
            .prepare(&format!(
                "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE tenant_id = ?1 ORDER BY \
                 sent_at DESC, id DESC LIMIT ?2"
            ))
            .map_err(SqliteStoreError::from)?;
        let rows = stmt
            .query_map(params![tenant_id.as_i64(), limit], NotificationRow::read)
            .map_err(SqliteStoreError::from)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(SqliteStoreError::from)?;
        Ok(rows.into_iter().map(NotificationRow::into_record).collect::<Result<Vec<_>, _>>()?)
    }
}

// ============================================================================
// SECTION: Owned Store
// ============================================================================

impl OwnedStore for SqliteStore {
    fn list(
        &self,
        kind: EntityKind,
        filter: TenantFilter,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        let guard = self.lock()?;
        let mut stmt = guard
            .prepare(
                "SELECT id, kind, tenant_id, fields_json FROM owned_records WHERE kind = ?1 AND \
                 (?2 IS NULL OR tenant_id = ?2) ORDER BY id",
            )
            .map_err(SqliteStoreError::from)?;
        let rows = stmt
            .query_map(params![kind.as_str(), filter_key(filter)], OwnedRow::read)
            .map_err(SqliteStoreError::from)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(SqliteStoreError::from)?;
        Ok(rows.into_iter().map(OwnedRow::into_record).collect::<Result<Vec<_>, _>>()?)
    }

    fn fetch(
        &self,
        kind: EntityKind,
        id: RecordId,
        filter: TenantFilter,
    ) -> Result<Option<StoredRecord>, StoreError> {
        let guard = self.lock()?;
        let row = guard
            .query_row(
                "SELECT id, kind, tenant_id, fields_json FROM owned_records WHERE id = ?1 AND \
                 kind = ?2 AND (?3 IS NULL OR tenant_id = ?3)",
                params![id.as_i64(), kind.as_str(), filter_key(filter)],
                OwnedRow::read,
            )
            .optional()
            .map_err(SqliteStoreError::from)?;
        Ok(row.map(OwnedRow::into_record).transpose()?)
    }

    fn insert(&self, record: &NewStoredRecord) -> Result<StoredRecord, StoreError> {
        let fields = encode_fields(&record.fields)?;
        Ok(self.write(|tx| {
            if load_tenant(tx, record.tenant_id)?.is_none() {
                return Err(SqliteStoreError::Invalid(format!(
                    "unknown tenant: {}",
                    record.tenant_id
                )));
            }
            tx.execute(
                "INSERT INTO owned_records (kind, tenant_id, fields_json) VALUES (?1, ?2, ?3)",
                params![record.kind.as_str(), record.tenant_id.as_i64(), fields],
            )?;
            Ok(StoredRecord {
                kind: record.kind,
                id: record_id_from_row(tx.last_insert_rowid())?,
                tenant_id: record.tenant_id,
                fields: record.fields.clone(),
            })
        })?)
    }

    fn update(
        &self,
        kind: EntityKind,
        id: RecordId,
        guard: OwnershipGuard,
        fields: &serde_json::Value,
    ) -> Result<WriteOutcome, StoreError> {
        let payload = encode_fields(fields)?;
        Ok(self.write(|tx| {
            let outcome = check_owner(tx, kind, id, guard)?;
            if outcome == WriteOutcome::Applied {
                tx.execute(
                    "UPDATE owned_records SET fields_json = ?1 WHERE id = ?2 AND kind = ?3",
                    params![payload, id.as_i64(), kind.as_str()],
                )?;
            }
            Ok(outcome)
        })?)
    }

    fn delete(
        &self,
        kind: EntityKind,
        id: RecordId,
        guard: OwnershipGuard,
    ) -> Result<WriteOutcome, StoreError> {
        Ok(self.write(|tx| {
            let outcome = check_owner(tx, kind, id, guard)?;
            if outcome == WriteOutcome::Applied {
                tx.execute(
                    "DELETE FROM owned_records WHERE id = ?1 AND kind = ?2",
                    params![id.as_i64(), kind.as_str()],
                )?;
            }
            Ok(outcome)
        })?)
    }
}

// ============================================================================
// SECTION: Namespace Router
// ============================================================================

/// Single-file databases have one namespace; isolation is row-level, so
/// activation only confirms the connection works and the tenant exists.
impl NamespaceRouter for SqliteStore {
    type Handle = Self;

    fn activate(&self, binding: NamespaceBinding) -> Result<Self::Handle, RouterError> {
        let activation = |err: SqliteStoreError| RouterError::Activation {
            binding,
            message: err.to_string(),
        };
        let guard = self.lock().map_err(|err| RouterError::Unavailable(err.to_string()))?;
        match binding {
            NamespaceBinding::Shared => {
                guard
                    .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                    .map_err(|err| activation(err.into()))?;
            }
            NamespaceBinding::Tenant(tenant_id) => {
                if load_tenant(&guard, tenant_id).map_err(activation)?.is_none() {
                    return Err(activation(SqliteStoreError::Invalid(format!(
                        "unknown tenant: {tenant_id}"
                    ))));
                }
            }
        }
        Ok(self.clone())
    }
}

// ============================================================================
// SECTION: Rows
// ============================================================================

/// Raw tenant row prior to validation.
struct TenantRow {
    /// Tenant id column.
    id: i64,
    /// Display name.
    name: String,
    /// Active flag.
    is_active: bool,
    /// Blocked flag.
    is_blocked: bool,
    /// Status label.
    status: String,
    /// Plan label.
    plan: String,
    /// Explicit subscription end.
    subscription_end: Option<i64>,
    /// Trial start.
    trial_start: Option<i64>,
    /// Last reminder time.
    last_notification_sent: Option<i64>,
    /// Creation time.
    created_at: i64,
    /// Last update time.
    updated_at: i64,
}

impl TenantRow {
    /// Reads a row selected with [`TENANT_COLUMNS`].
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            is_active: row.get(2)?,
            is_blocked: row.get(3)?,
            status: row.get(4)?,
            plan: row.get(5)?,
            subscription_end: row.get(6)?,
            trial_start: row.get(7)?,
            last_notification_sent: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }

    /// Validates the row.
    fn into_tenant(self) -> Result<Tenant, SqliteStoreError> {
        Ok(Tenant {
            id: tenant_id_from_row(self.id)?,
            name: self.name,
            is_active: self.is_active,
            is_blocked: self.is_blocked,
            subscription_status: SubscriptionStatus::from_str(&self.status)?,
            subscription_plan: SubscriptionPlan::from_str(&self.plan)?,
            subscription_end: self.subscription_end.map(Timestamp::from_unix_millis),
            trial_start: self.trial_start.map(Timestamp::from_unix_millis),
            last_notification_sent: self.last_notification_sent.map(Timestamp::from_unix_millis),
            created_at: Timestamp::from_unix_millis(self.created_at),
            updated_at: Timestamp::from_unix_millis(self.updated_at),
        })
    }
}

/// Raw principal row.
struct PrincipalRow {
    /// Login name.
    username: String,
    /// Role label.
    role: String,
    /// Tenant binding.
    tenant_id: Option<i64>,
    /// Active flag.
    is_active: bool,
    /// Password rotation flag.
    must_change_password: bool,
    /// Creation time.
    created_at: i64,
}

impl PrincipalRow {
    /// Reads a row selected with [`PRINCIPAL_COLUMNS`].
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            username: row.get(0)?,
            role: row.get(1)?,
            tenant_id: row.get(2)?,
            is_active: row.get(3)?,
            must_change_password: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    /// Validates the row.
    fn into_principal(self) -> Result<PrincipalRecord, SqliteStoreError> {
        let tenant_id = self.tenant_id.map(tenant_id_from_row).transpose()?;
        let role = Role::from_str(&self.role)?;
        if role == Role::SchoolAdmin && tenant_id.is_none() {
            return Err(SqliteStoreError::Invalid(format!(
                "school administrator without tenant: {}",
                self.username
            )));
        }
        Ok(PrincipalRecord {
            username: Username::new(self.username),
            role,
            tenant_id,
            is_active: self.is_active,
            must_change_password: self.must_change_password,
            created_at: Timestamp::from_unix_millis(self.created_at),
        })
    }
}

/// Raw subscription row.
struct SubscriptionRow {
    /// Record id.
    id: i64,
    /// Owning tenant.
    tenant_id: i64,
    /// Plan label.
    plan: String,
    /// Period start.
    start: i64,
    /// Period end.
    end: Option<i64>,
    /// Amount paid (minor units).
    amount_paid_minor: i64,
    /// Payment reference.
    payment_reference: Option<String>,
    /// Active flag.
    is_active: bool,
    /// Operator.
    created_by: String,
    /// Notes.
    notes: Option<String>,
    /// Creation time.
    created_at: i64,
}

impl SubscriptionRow {
    /// Reads a row selected with [`SUBSCRIPTION_COLUMNS`].
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            tenant_id: row.get(1)?,
            plan: row.get(2)?,
            start: row.get(3)?,
            end: row.get(4)?,
            amount_paid_minor: row.get(5)?,
            payment_reference: row.get(6)?,
            is_active: row.get(7)?,
            created_by: row.get(8)?,
            notes: row.get(9)?,
            created_at: row.get(10)?,
        })
    }

    /// Validates the row.
    fn into_record(self) -> Result<SubscriptionRecord, SqliteStoreError> {
        Ok(SubscriptionRecord {
            id: record_id_from_row(self.id)?,
            tenant_id: tenant_id_from_row(self.tenant_id)?,
            plan: SubscriptionPlan::from_str(&self.plan)?,
            start: Timestamp::from_unix_millis(self.start),
            end: self.end.map(Timestamp::from_unix_millis),
            amount_paid_minor: self.amount_paid_minor,
            payment_reference: self.payment_reference,
            is_active: self.is_active,
            created_by: Username::new(self.created_by),
            notes: self.notes,
            created_at: Timestamp::from_unix_millis(self.created_at),
        })
    }
}

/// Raw notification row.
struct NotificationRow {
    /// Record id.
    id: i64,
    /// Owning tenant.
    tenant_id: i64,
    /// Kind label.
    kind: String,
    /// Message text.
    message: String,
    /// Days remaining when sent.
    days_remaining: Option<i64>,
    /// Send time.
    sent_at: i64,
}

impl NotificationRow {
    /// Reads a row selected with [`NOTIFICATION_COLUMNS`].
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            tenant_id: row.get(1)?,
            kind: row.get(2)?,
            message: row.get(3)?,
            days_remaining: row.get(4)?,
            sent_at: row.get(5)?,
        })
    }

    /// Validates the row.
    fn into_record(self) -> Result<NotificationRecord, SqliteStoreError> {
        Ok(NotificationRecord {
            id: record_id_from_row(self.id)?,
            tenant_id: tenant_id_from_row(self.tenant_id)?,
            kind: NotificationKind::from_str(&self.kind)?,
            message: self.message,
            days_remaining: self.days_remaining,
            sent_at: Timestamp::from_unix_millis(self.sent_at),
        })
    }
}

/// Raw owned record row.
struct OwnedRow {
    /// Record id.
    id: i64,
    /// Entity kind label.
    kind: String,
    /// Owning tenant.
    tenant_id: i64,
    /// JSON payload.
    fields_json: String,
}

impl OwnedRow {
    /// Reads an owned record row.
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            kind: row.get(1)?,
            tenant_id: row.get(2)?,
            fields_json: row.get(3)?,
        })
    }

    /// Validates the row and parses its payload.
    fn into_record(self) -> Result<StoredRecord, SqliteStoreError> {
        let fields = serde_json::from_str(&self.fields_json).map_err(|err| {
            SqliteStoreError::Invalid(format!("owned record {} payload: {err}", self.id))
        })?;
        Ok(StoredRecord {
            kind: EntityKind::from_str(&self.kind)?,
            id: record_id_from_row(self.id)?,
            tenant_id: tenant_id_from_row(self.tenant_id)?,
            fields,
        })
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Loads a tenant through any connection or transaction.
fn load_tenant(
    connection: &Connection,
    tenant_id: TenantId,
) -> Result<Option<Tenant>, SqliteStoreError> {
    connection
        .query_row(
            &format!("SELECT {TENANT_COLUMNS} FROM tenants WHERE id = ?1"),
            params![tenant_id.as_i64()],
            TenantRow::read,
        )
        .optional()?
        .map(TenantRow::into_tenant)
        .transpose()
}

/// Flips an unblocked tenant to blocked/expired inside a write transaction.
fn lock_tenant(
    tx: &Transaction<'_>,
    tenant_id: TenantId,
    now: Timestamp,
) -> Result<LockOutcome, SqliteStoreError> {
    let Some(tenant) = load_tenant(tx, tenant_id)? else {
        return Ok(LockOutcome::Missing);
    };
    if tenant.is_blocked {
        return Ok(LockOutcome::AlreadyBlocked);
    }
    let changed = tx.execute(
        "UPDATE tenants SET is_blocked = 1, subscription_status = ?1, updated_at = ?2 WHERE id = \
         ?3 AND is_blocked = 0",
        params![SubscriptionStatus::Expired.as_str(), now.as_unix_millis(), tenant_id.as_i64()],
    )?;
    if changed == 0 {
        return Ok(LockOutcome::AlreadyBlocked);
    }
    Ok(LockOutcome::Locked {
        prior_status: tenant.subscription_status,
    })
}

/// Appends a notification inside a write transaction.
///
/// Returns `None` when the tenant does not exist.
fn append_notification(
    tx: &Transaction<'_>,
    notification: &NewNotification,
) -> Result<Option<NotificationRecord>, SqliteStoreError> {
    if load_tenant(tx, notification.tenant_id)?.is_none() {
        return Ok(None);
    }
    tx.execute(
        &format!(
            "INSERT INTO notifications ({NOTIFICATION_COLUMNS}) VALUES (NULL, ?1, ?2, ?3, ?4, ?5)"
        ),
        params![
            notification.tenant_id.as_i64(),
            notification.kind.as_str(),
            notification.message,
            notification.days_remaining,
            notification.sent_at.as_unix_millis()
        ],
    )?;
    let id = record_id_from_row(tx.last_insert_rowid())?;
    if notification.kind.stamps_last_notification() {
        tx.execute(
            "UPDATE tenants SET last_notification_sent = ?1, updated_at = ?1 WHERE id = ?2",
            params![notification.sent_at.as_unix_millis(), notification.tenant_id.as_i64()],
        )?;
    }
    Ok(Some(NotificationRecord {
        id,
        tenant_id: notification.tenant_id,
        kind: notification.kind,
        message: notification.message.clone(),
        days_remaining: notification.days_remaining,
        sent_at: notification.sent_at,
    }))
}

/// Compares a row's owner against the guard inside a write transaction.
fn check_owner(
    tx: &Transaction<'_>,
    kind: EntityKind,
    id: RecordId,
    guard: OwnershipGuard,
) -> Result<WriteOutcome, SqliteStoreError> {
    let owner: Option<i64> = tx
        .query_row(
            "SELECT tenant_id FROM owned_records WHERE id = ?1 AND kind = ?2",
            params![id.as_i64(), kind.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    let Some(owner) = owner else {
        return Ok(WriteOutcome::NotFound);
    };
    let owner = tenant_id_from_row(owner)?;
    if guard.permits(owner) {
        Ok(WriteOutcome::Applied)
    } else {
        Ok(WriteOutcome::OwnerMismatch {
            owner,
        })
    }
}

/// Maps a filter to the nullable tenant parameter used by owned queries.
fn filter_key(filter: TenantFilter) -> Option<i64> {
    match filter {
        TenantFilter::All => None,
        TenantFilter::Tenant(tenant_id) => Some(tenant_id.as_i64()),
    }
}

/// Serializes an owned payload within the size limit.
fn encode_fields(fields: &serde_json::Value) -> Result<String, SqliteStoreError> {
    let payload = serde_json::to_string(fields)
        .map_err(|err| SqliteStoreError::Invalid(format!("owned record payload: {err}")))?;
    if payload.len() > MAX_RECORD_BYTES {
        return Err(SqliteStoreError::Invalid(format!(
            "owned record payload exceeds size limit: {} bytes (max {MAX_RECORD_BYTES})",
            payload.len()
        )));
    }
    Ok(payload)
}

/// Parses a stored tenant id.
fn tenant_id_from_row(raw: i64) -> Result<TenantId, SqliteStoreError> {
    TenantId::from_i64(raw)
        .ok_or_else(|| SqliteStoreError::Invalid(format!("invalid tenant id: {raw}")))
}

/// Parses a stored record id.
fn record_id_from_row(raw: i64) -> Result<RecordId, SqliteStoreError> {
    RecordId::from_i64(raw)
        .ok_or_else(|| SqliteStoreError::Invalid(format!("invalid record id: {raw}")))
}

/// Ensures the parent directory for the store exists.
fn ensure_parent_dir(path: &Path) -> Result<(), SqliteStoreError> {
    let Some(parent) = path.parent() else {
        return Err(SqliteStoreError::Io("store path missing parent directory".to_string()));
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(parent).map_err(|err| SqliteStoreError::Io(err.to_string()))
}

/// Validates store paths for safety limits.
fn validate_store_path(path: &Path) -> Result<(), SqliteStoreError> {
    if path.as_os_str().is_empty() {
        return Err(SqliteStoreError::Invalid("store path must not be empty".to_string()));
    }
    if path.display().to_string().len() > MAX_TOTAL_PATH_LENGTH {
        return Err(SqliteStoreError::Invalid("store path exceeds length limit".to_string()));
    }
    for component in path.components() {
        if component.as_os_str().to_string_lossy().len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(SqliteStoreError::Invalid(
                "store path contains an overlong component".to_string(),
            ));
        }
    }
    if path.is_dir() {
        return Err(SqliteStoreError::Invalid(
            "store path must be a file, not a directory".to_string(),
        ));
    }
    Ok(())
}

/// Opens an `SQLite` connection with secure defaults.
fn open_connection(config: &SqliteStoreConfig) -> Result<Connection, SqliteStoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection = Connection::open_with_flags(&config.path, flags)?;
    connection.execute_batch("PRAGMA foreign_keys = ON;")?;
    connection
        .execute_batch(&format!("PRAGMA journal_mode = {};", config.journal_mode.pragma_value()))?;
    connection
        .execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))?;
    connection.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
    Ok(connection)
}

/// Initializes the `SQLite` schema or validates the existing version.
fn initialize_schema(connection: &mut Connection) -> Result<(), SqliteStoreError> {
    let tx = connection.transaction()?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", [], |row| row.get(0))
        .optional()?;
    match version {
        None => {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])?;
            tx.execute_batch(
                "CREATE TABLE IF NOT EXISTS tenants (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    is_active INTEGER NOT NULL,
                    is_blocked INTEGER NOT NULL,
                    subscription_status TEXT NOT NULL,
                    subscription_plan TEXT NOT NULL,
                    subscription_end INTEGER,
                    trial_start INTEGER,
                    last_notification_sent INTEGER,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL
                );
                CREATE TABLE IF NOT EXISTS principals (
                    username TEXT NOT NULL PRIMARY KEY,
                    role TEXT NOT NULL,
                    tenant_id INTEGER REFERENCES tenants(id) ON DELETE CASCADE,
                    is_active INTEGER NOT NULL,
                    must_change_password INTEGER NOT NULL,
                    created_at INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_principals_tenant ON principals (tenant_id);
                CREATE TABLE IF NOT EXISTS subscriptions (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    tenant_id INTEGER NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
                    plan TEXT NOT NULL,
                    start_at INTEGER NOT NULL,
                    end_at INTEGER,
                    amount_paid_minor INTEGER NOT NULL,
                    payment_reference TEXT,
                    is_active INTEGER NOT NULL,
                    created_by TEXT NOT NULL,
                    notes TEXT,
                    created_at INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_subscriptions_tenant ON subscriptions (tenant_id);
                CREATE TABLE IF NOT EXISTS notifications (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    tenant_id INTEGER NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
                    kind TEXT NOT NULL,
                    message TEXT NOT NULL,
                    days_remaining INTEGER,
                    sent_at INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_notifications_tenant
                    ON notifications (tenant_id, sent_at);
                CREATE TABLE IF NOT EXISTS owned_records (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    kind TEXT NOT NULL,
                    tenant_id INTEGER NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
                    fields_json TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_owned_records_kind_tenant
                    ON owned_records (kind, tenant_id, id);",
            )?;
        }
        Some(value) if value == SCHEMA_VERSION => {}
        Some(value) => {
            return Err(SqliteStoreError::VersionMismatch(format!(
                "unsupported schema version: {value}"
            )));
        }
    }
    tx.commit()?;
    Ok(())
}
