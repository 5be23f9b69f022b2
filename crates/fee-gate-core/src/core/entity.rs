// crates/fee-gate-core/src/core/entity.rs
// ============================================================================
// Module: Owned Entities
// Description: Tenant-owned domain records and their capability marker.
// Purpose: Make "this type is tenant scoped" a compile-time property.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Every tenant-owned record type implements [`OwnedEntity`]. Entity payloads
//! never carry a tenant id: ownership lives beside the payload on
//! [`StoredRecord`] and [`Record`], and only the scoped builder can assign it.
//! A [`Record`] can only be built inside this crate, so a caller cannot forge
//! the owner of a row it hands back for update or delete.
//!
//! Security posture: stored fields are untrusted input on decode; a malformed
//! row surfaces as a store error rather than a panic.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::core::identifiers::RecordId;
use crate::core::identifiers::TenantId;
use crate::core::tenant::UnknownLabel;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Entity Kinds
// ============================================================================

/// Kind of tenant-owned record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Enrolled student.
    Student,
    /// Fee income received.
    Payment,
    /// School expenditure.
    Expenditure,
    /// Per-term fund amounts.
    FundConfiguration,
    /// Issued receipt.
    Receipt,
}

impl EntityKind {
    /// Every owned entity kind.
    pub const ALL: [Self; 5] =
        [Self::Student, Self::Payment, Self::Expenditure, Self::FundConfiguration, Self::Receipt];

    /// Returns the stable storage label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Payment => "payment",
            Self::Expenditure => "expenditure",
            Self::FundConfiguration => "fund_configuration",
            Self::Receipt => "receipt",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = UnknownLabel;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value).ok_or_else(|| UnknownLabel {
            kind: "entity kind",
            label: value.to_string(),
        })
    }
}

// ============================================================================
// SECTION: Capability Marker
// ============================================================================

/// Marker for tenant-owned record payloads.
///
/// # Invariants
/// - Implementors never carry their own tenant id field.
pub trait OwnedEntity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Stable kind label used to partition storage.
    const KIND: EntityKind;
}

// ============================================================================
// SECTION: Stored Rows
// ============================================================================

/// Untyped row as exchanged with storage backends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    /// Entity kind.
    pub kind: EntityKind,
    /// Record identifier.
    pub id: RecordId,
    /// Owning tenant; assigned at creation and never rewritten.
    pub tenant_id: TenantId,
    /// Serialized entity payload.
    pub fields: serde_json::Value,
}

/// Untyped row to insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewStoredRecord {
    /// Entity kind.
    pub kind: EntityKind,
    /// Owning tenant stamped from the request context.
    pub tenant_id: TenantId,
    /// Serialized entity payload.
    pub fields: serde_json::Value,
}

/// Typed, ownership-carrying record handed to route handlers.
///
/// # Invariants
/// - `id` and `tenant_id` come from storage and are not caller-mutable.
#[derive(Debug, Clone, PartialEq)]
pub struct Record<E> {
    /// Record identifier.
    id: RecordId,
    /// Owning tenant.
    tenant_id: TenantId,
    /// Entity payload.
    pub data: E,
}

impl<E: OwnedEntity> Record<E> {
    /// Decodes a stored row of kind `E::KIND`.
    pub(crate) fn decode(stored: StoredRecord) -> Result<Self, serde_json::Error> {
        let data = serde_json::from_value(stored.fields)?;
        Ok(Self {
            id: stored.id,
            tenant_id: stored.tenant_id,
            data,
        })
    }

    /// Rebuilds a record after a guarded write was applied.
    pub(crate) const fn from_parts(id: RecordId, tenant_id: TenantId, data: E) -> Self {
        Self {
            id,
            tenant_id,
            data,
        }
    }

    /// Returns the record identifier.
    #[must_use]
    pub const fn id(&self) -> RecordId {
        self.id
    }

    /// Returns the owning tenant.
    #[must_use]
    pub const fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

// ============================================================================
// SECTION: Entity Types
// ============================================================================

/// Enrolled student.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    /// School-assigned admission number.
    pub admission_number: String,
    /// Full name.
    pub name: String,
    /// Sex as recorded by the school.
    pub sex: String,
    /// Form or class.
    pub form_class: String,
    /// Parent contact phone.
    #[serde(default)]
    pub parent_phone: Option<String>,
}

impl OwnedEntity for Student {
    const KIND: EntityKind = EntityKind::Student;
}

/// Fee income received from a student.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    /// Admission number of the paying student.
    pub admission_number: String,
    /// Fee type label (for example `pta`, `sdf`, `boarding`).
    pub fee_type: String,
    /// Amount in minor currency units.
    pub amount_minor: i64,
    /// Bank or deposit slip reference.
    #[serde(default)]
    pub payment_reference: Option<String>,
    /// Payment date.
    pub paid_at: Timestamp,
}

impl OwnedEntity for Payment {
    const KIND: EntityKind = EntityKind::Payment;
}

/// School expenditure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expenditure {
    /// Activity or service paid for.
    pub activity: String,
    /// Voucher number.
    pub voucher_no: String,
    /// Cheque number.
    pub cheque_no: String,
    /// Amount in minor currency units.
    pub amount_minor: i64,
    /// Fund charged.
    pub fund_type: String,
    /// Expenditure date.
    pub spent_at: Timestamp,
}

impl OwnedEntity for Expenditure {
    const KIND: EntityKind = EntityKind::Expenditure;
}

/// Required fund amounts for one term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundConfiguration {
    /// Term label.
    pub term_name: String,
    /// PTA fund amount in minor units.
    pub pta_minor: i64,
    /// SDF fund amount in minor units.
    pub sdf_minor: i64,
    /// Boarding fund amount in minor units.
    pub boarding_minor: i64,
    /// Whether this is the current term.
    pub is_active: bool,
}

impl OwnedEntity for FundConfiguration {
    const KIND: EntityKind = EntityKind::FundConfiguration;
}

/// Issued receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Receipt number as printed.
    pub receipt_no: String,
    /// Admission number of the student.
    pub admission_number: String,
    /// Fee type label.
    pub fee_type: String,
    /// Amount in minor currency units.
    pub amount_minor: i64,
    /// Deposit slip reference.
    pub deposit_slip_ref: String,
    /// Issue date.
    pub issued_at: Timestamp,
}

impl OwnedEntity for Receipt {
    const KIND: EntityKind = EntityKind::Receipt;
}
