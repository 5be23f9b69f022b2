// crates/fee-gate-core/src/audit.rs
// ============================================================================
// Module: Fee Gate Audit Logging
// Description: Structured audit events for access decisions and operator actions.
// Purpose: Emit JSON-line audit records without hard logging dependencies.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Every denial that matters for audit, every ownership violation and every
//! operator action is recorded as a [`GateAuditEvent`]. Sinks are deliberately
//! small so deployments can route JSON lines to their own pipeline.
//! Unauthenticated denials are routine and never recorded.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use serde::Serialize;

use crate::core::SubscriptionStatus;
use crate::core::TenantId;
use crate::core::Timestamp;
use crate::core::Username;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Audit severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditSeverity {
    /// Routine operator action.
    Info,
    /// Expected denial worth keeping (revoked or expired tenant).
    Warning,
    /// Bug, attack or infrastructure failure.
    Critical,
}

/// Audit event payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GateAuditEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: i64,
    /// Event severity.
    pub severity: AuditSeverity,
    /// Tenant involved, when known.
    pub tenant_id: Option<TenantId>,
    /// Principal involved, when known.
    pub username: Option<Username>,
    /// Route being served, when the event comes from a request.
    pub route: Option<String>,
    /// Normalized reason label.
    pub reason: Option<&'static str>,
    /// Subscription status before an auto-lock.
    pub prior_status: Option<SubscriptionStatus>,
    /// Diagnostic message (never shown to end users).
    pub message: Option<String>,
}

impl GateAuditEvent {
    /// Creates an event with only the mandatory fields set.
    #[must_use]
    pub const fn new(event: &'static str, severity: AuditSeverity, now: Timestamp) -> Self {
        Self {
            event,
            timestamp_ms: now.as_unix_millis(),
            severity,
            tenant_id: None,
            username: None,
            route: None,
            reason: None,
            prior_status: None,
            message: None,
        }
    }

    /// Sets the tenant.
    #[must_use]
    pub const fn with_tenant(mut self, tenant_id: Option<TenantId>) -> Self {
        self.tenant_id = tenant_id;
        self
    }

    /// Sets the principal.
    #[must_use]
    pub fn with_username(mut self, username: Option<&Username>) -> Self {
        self.username = username.cloned();
        self
    }

    /// Sets the route.
    #[must_use]
    pub fn with_route(mut self, route: &str) -> Self {
        self.route = Some(route.to_string());
        self
    }

    /// Sets the reason label.
    #[must_use]
    pub const fn with_reason(mut self, reason: &'static str) -> Self {
        self.reason = Some(reason);
        self
    }

    /// Sets the prior status.
    #[must_use]
    pub const fn with_prior_status(mut self, status: SubscriptionStatus) -> Self {
        self.prior_status = Some(status);
        self
    }

    /// Sets the diagnostic message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

// ============================================================================
// SECTION: Sinks
// ============================================================================

/// Audit sink for gate events.
pub trait AuditSink: Send + Sync {
    /// Record an audit event.
    fn record(&self, event: &GateAuditEvent);
}

/// Audit sink that logs JSON lines to stderr.
pub struct StderrAuditSink;

impl AuditSink for StderrAuditSink {
    fn record(&self, event: &GateAuditEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            let _ = writeln!(io::stderr(), "{payload}");
        }
    }
}

/// Audit sink that appends JSON lines to a file.
pub struct FileAuditSink {
    /// File handle used for append-only logging.
    file: Mutex<std::fs::File>,
}

impl FileAuditSink {
    /// Opens the audit log file in append mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn new(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl AuditSink for FileAuditSink {
    fn record(&self, event: &GateAuditEvent) {
        if let Ok(payload) = serde_json::to_string(event)
            && let Ok(mut file) = self.file.lock()
        {
            let _ = writeln!(file, "{payload}");
            let _ = file.flush();
        }
    }
}

/// No-op audit sink.
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _event: &GateAuditEvent) {}
}

/// Audit sink that keeps events in memory.
#[derive(Default)]
pub struct MemoryAuditSink {
    /// Recorded events in arrival order.
    events: Mutex<Vec<GateAuditEvent>>,
}

impl MemoryAuditSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<GateAuditEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: &GateAuditEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
