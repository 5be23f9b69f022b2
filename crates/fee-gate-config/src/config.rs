// crates/fee-gate-config/src/config.rs
// ============================================================================
// Module: Fee Gate Configuration
// Description: Configuration loading and validation for the fee gate.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: fee-gate-core, fee-gate-store-sqlite, fee-gate-store-postgres, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and path limits.
//! Missing sections fall back to defaults. Invalid values fail the load
//! instead of being clamped.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use fee_gate_core::AuditSink;
use fee_gate_core::DEFAULT_EXEMPT_ROUTES;
use fee_gate_core::ExemptRoutes;
use fee_gate_core::FileAuditSink;
use fee_gate_core::LifecyclePolicy;
use fee_gate_core::NoopAuditSink;
use fee_gate_core::StderrAuditSink;
use fee_gate_store_postgres::PostgresStoreConfig;
use fee_gate_store_sqlite::SqliteStoreConfig;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
pub const DEFAULT_CONFIG_NAME: &str = "fee-gate.toml";
/// Environment variable naming the config file.
pub const CONFIG_ENV_VAR: &str = "FEE_GATE_CONFIG";
/// Maximum config file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
pub(crate) const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
pub(crate) const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Default `SQLite` database file.
pub(crate) const DEFAULT_SQLITE_PATH: &str = "fee-gate.db";
/// Default trial length in days.
pub(crate) const DEFAULT_TRIAL_DAYS: i64 = 30;
/// Default reminder window in days.
pub(crate) const DEFAULT_NOTIFICATION_WINDOW_DAYS: i64 = 7;
/// Longest accepted trial.
pub(crate) const MAX_TRIAL_DAYS: i64 = 365;
/// Longest accepted reminder window.
pub(crate) const MAX_NOTIFICATION_WINDOW_DAYS: i64 = 90;
/// Maximum number of exempt routes.
pub(crate) const MAX_EXEMPT_ROUTES: usize = 32;
/// Maximum length of one exempt endpoint name.
pub(crate) const MAX_EXEMPT_ROUTE_LENGTH: usize = 64;

// ============================================================================
// SECTION: Root Config
// ============================================================================

/// Top-level fee gate configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeeGateConfig {
    /// Storage backend configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Access gate and lifecycle configuration.
    #[serde(default)]
    pub gate: GateConfig,
    /// Audit sink configuration.
    #[serde(default)]
    pub audit: AuditConfig,
}

impl FeeGateConfig {
    /// Loads configuration from disk using the default resolution rules.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path)?;
        validate_path(&resolved)?;
        let bytes = fs::read(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        Self::from_toml_str(content)
    }

    /// Parses and validates configuration text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when parsing or validation fails.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.storage.validate()?;
        self.gate.validate()?;
        self.audit.validate()?;
        Ok(())
    }
}

// ============================================================================
// SECTION: Storage
// ============================================================================

/// Storage backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// Embedded `SQLite` file with row-level isolation.
    #[default]
    Sqlite,
    /// Postgres with one schema per school.
    Postgres,
}

/// Storage configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    /// Selected backend.
    #[serde(default)]
    pub backend: StorageBackend,
    /// `SQLite` settings; defaults to `fee-gate.db` when omitted.
    #[serde(default)]
    pub sqlite: Option<SqliteStoreConfig>,
    /// Postgres settings; required for the postgres backend.
    #[serde(default)]
    pub postgres: Option<PostgresStoreConfig>,
}

impl StorageConfig {
    /// Validates storage configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        match self.backend {
            StorageBackend::Sqlite => {
                if self.postgres.is_some() {
                    return Err(ConfigError::Invalid(
                        "sqlite storage must not set storage.postgres".to_string(),
                    ));
                }
                let sqlite = self.sqlite_config();
                validate_path_string("storage.sqlite.path", &sqlite.path.to_string_lossy())?;
                if sqlite.busy_timeout_ms == 0 {
                    return Err(ConfigError::Invalid(
                        "storage.sqlite.busy_timeout_ms must be greater than zero".to_string(),
                    ));
                }
                Ok(())
            }
            StorageBackend::Postgres => {
                if self.sqlite.is_some() {
                    return Err(ConfigError::Invalid(
                        "postgres storage must not set storage.sqlite".to_string(),
                    ));
                }
                let postgres = self.postgres.as_ref().ok_or_else(|| {
                    ConfigError::Invalid("postgres storage requires storage.postgres".to_string())
                })?;
                postgres.validate().map_err(|err| ConfigError::Invalid(err.to_string()))
            }
        }
    }

    /// Returns the effective `SQLite` settings.
    #[must_use]
    pub fn sqlite_config(&self) -> SqliteStoreConfig {
        self.sqlite
            .clone()
            .unwrap_or_else(|| SqliteStoreConfig::for_path(PathBuf::from(DEFAULT_SQLITE_PATH)))
    }
}

// ============================================================================
// SECTION: Gate
// ============================================================================

/// Access gate and lifecycle configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GateConfig {
    /// Endpoints served without a tenant check.
    #[serde(default = "default_exempt_routes")]
    pub exempt_routes: Vec<String>,
    /// Trial length for new schools.
    #[serde(default = "default_trial_days")]
    pub trial_days: i64,
    /// Days before expiry when reminders start.
    #[serde(default = "default_notification_window_days")]
    pub notification_window_days: i64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            exempt_routes: default_exempt_routes(),
            trial_days: DEFAULT_TRIAL_DAYS,
            notification_window_days: DEFAULT_NOTIFICATION_WINDOW_DAYS,
        }
    }
}

impl GateConfig {
    /// Validates gate configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_TRIAL_DAYS).contains(&self.trial_days) {
            return Err(ConfigError::Invalid(format!(
                "gate.trial_days must be between 1 and {MAX_TRIAL_DAYS}"
            )));
        }
        if !(1..=MAX_NOTIFICATION_WINDOW_DAYS).contains(&self.notification_window_days) {
            return Err(ConfigError::Invalid(format!(
                "gate.notification_window_days must be between 1 and \
                 {MAX_NOTIFICATION_WINDOW_DAYS}"
            )));
        }
        if self.exempt_routes.len() > MAX_EXEMPT_ROUTES {
            return Err(ConfigError::Invalid("gate.exempt_routes has too many entries".to_string()));
        }
        for route in &self.exempt_routes {
            if route.is_empty() || route.len() > MAX_EXEMPT_ROUTE_LENGTH {
                return Err(ConfigError::Invalid(
                    "gate.exempt_routes entries must be 1-64 characters".to_string(),
                ));
            }
            if route.contains('/') || route.chars().any(char::is_whitespace) {
                return Err(ConfigError::Invalid(format!(
                    "gate.exempt_routes entry {route} must be a bare endpoint name"
                )));
            }
        }
        Ok(())
    }

    /// Returns the entitlement policy.
    #[must_use]
    pub const fn lifecycle_policy(&self) -> LifecyclePolicy {
        LifecyclePolicy {
            trial_days: self.trial_days,
            notification_window_days: self.notification_window_days,
        }
    }

    /// Returns the exempt route allow-list.
    #[must_use]
    pub fn exempt_routes(&self) -> ExemptRoutes {
        ExemptRoutes::new(self.exempt_routes.iter().cloned())
    }
}

/// Returns the default exempt endpoints.
fn default_exempt_routes() -> Vec<String> {
    DEFAULT_EXEMPT_ROUTES.iter().map(|route| (*route).to_string()).collect()
}

/// Returns the default trial length.
const fn default_trial_days() -> i64 {
    DEFAULT_TRIAL_DAYS
}

/// Returns the default reminder window.
const fn default_notification_window_days() -> i64 {
    DEFAULT_NOTIFICATION_WINDOW_DAYS
}

// ============================================================================
// SECTION: Audit
// ============================================================================

/// Audit sink selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuditSinkKind {
    /// JSON lines on stderr.
    #[default]
    Stderr,
    /// Append-only JSON lines file.
    File,
    /// Discard audit events.
    None,
}

/// Audit configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct AuditConfig {
    /// Sink kind.
    #[serde(default)]
    pub sink: AuditSinkKind,
    /// File path for the file sink.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl AuditConfig {
    /// Validates audit configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        match (self.sink, &self.path) {
            (AuditSinkKind::File, Some(path)) => {
                validate_path_string("audit.path", &path.to_string_lossy())
            }
            (AuditSinkKind::File, None) => {
                Err(ConfigError::Invalid("file audit sink requires audit.path".to_string()))
            }
            (_, Some(_)) => Err(ConfigError::Invalid(
                "audit.path is only valid with the file sink".to_string(),
            )),
            (_, None) => Ok(()),
        }
    }

    /// Opens the configured sink.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] when the audit file cannot be opened.
    pub fn open_sink(&self) -> Result<Arc<dyn AuditSink>, ConfigError> {
        match (self.sink, &self.path) {
            (AuditSinkKind::File, Some(path)) => {
                let sink =
                    FileAuditSink::new(path).map_err(|err| ConfigError::Io(err.to_string()))?;
                Ok(Arc::new(sink))
            }
            (AuditSinkKind::File, None) => {
                Err(ConfigError::Invalid("file audit sink requires audit.path".to_string()))
            }
            (AuditSinkKind::Stderr, _) => Ok(Arc::new(StderrAuditSink)),
            (AuditSinkKind::None, _) => Ok(Arc::new(NoopAuditSink)),
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Resolves the config path from CLI or environment defaults.
fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok(PathBuf::from(env_path));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

/// Validates the resolved path against length limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    if path.to_string_lossy().len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    for component in path.components() {
        if component.as_os_str().to_string_lossy().len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("config path component too long".to_string()));
        }
    }
    Ok(())
}

/// Validates a configured path string against length constraints.
fn validate_path_string(field: &str, value: &str) -> Result<(), ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must be non-empty")));
    }
    if trimmed.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid(format!("{field} exceeds max length")));
    }
    for component in Path::new(trimmed).components() {
        if component.as_os_str().to_string_lossy().len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid(format!("{field} path component too long")));
        }
    }
    Ok(())
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::panic,
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "Test-only assertions."
    )]

    use super::*;

    #[test]
    fn explicit_path_wins_over_defaults() {
        let resolved = resolve_path(Some(Path::new("/etc/fees/custom.toml"))).unwrap();
        assert_eq!(resolved, PathBuf::from("/etc/fees/custom.toml"));
    }

    #[test]
    fn long_path_components_are_rejected() {
        let long = "a".repeat(MAX_PATH_COMPONENT_LENGTH + 1);
        let err = validate_path(&PathBuf::from(long)).unwrap_err();
        assert!(err.to_string().contains("component too long"));
    }

    #[test]
    fn blank_path_strings_are_rejected() {
        let err = validate_path_string("audit.path", "   ").unwrap_err();
        assert_eq!(err, ConfigError::Invalid("audit.path must be non-empty".to_string()));
    }
}
