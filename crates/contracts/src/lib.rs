//! v1 cross-boundary contracts for the funding ledger kernel, API, and persistence.

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod characteristics;

pub use characteristics::{
    Applicability, Characteristic, CharacteristicCategory, CharacteristicKind, MaxCapacityAction,
    ResetFrequency,
};

pub const SCHEMA_VERSION_V1: &str = "1.0";

/// Explicit tenant scope threaded into every ledger, aggregator, store, and
/// API call. There is no ambient organization state anywhere in the system.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrgContext {
    pub org_id: String,
}

impl OrgContext {
    pub fn new(org_id: impl Into<String>) -> Self {
        Self {
            org_id: org_id.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BucketCategory {
    DrawDown,
    FillUp,
    Hybrid,
}

impl BucketCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DrawDown => "draw_down",
            Self::FillUp => "fill_up",
            Self::Hybrid => "hybrid",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ClientStatus {
    Prospect,
    Active,
    Deactivated,
}

impl ClientStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Prospect => "prospect",
            Self::Active => "active",
            Self::Deactivated => "deactivated",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AgreementStatus {
    Draft,
    Active,
    Expired,
    Cancelled,
}

impl AgreementStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Draft,
    Active,
    Inactive,
    Archived,
}

impl ServiceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Archived => "archived",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BucketStatus {
    Active,
    Suspended,
    Closed,
}

impl BucketStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Credit,
    Debit,
    ServiceDelivery,
    InvoiceSettlement,
}

impl TransactionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Credit => "credit",
            Self::Debit => "debit",
            Self::ServiceDelivery => "service_delivery",
            Self::InvoiceSettlement => "invoice_settlement",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Posted,
    Reversed,
}

/// How an agreement's total value is derived from its funding boxes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum AllocationPolicy {
    SumOfBuckets,
    FixedAllocation { total_value_cents: i64 },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Client {
    pub schema_version: String,
    pub client_id: String,
    pub org_id: String,
    pub name: String,
    pub date_of_birth: Option<String>,
    /// Government care-recipient identifier, free text.
    pub care_recipient_id: Option<String>,
    pub status: ClientStatus,
    pub created_at: String,
    pub updated_at: String,
}

/// Static description of a funding container: its type, nominal allocation,
/// and toggleable behavioral characteristics. Immutable once referenced by a
/// live bucket, except for characteristic toggles.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BucketTemplate {
    pub schema_version: String,
    pub template_id: String,
    pub org_id: String,
    pub name: String,
    pub category: BucketCategory,
    pub funding_source: String,
    pub allocated_amount_cents: i64,
    pub characteristics: Vec<Characteristic>,
    pub created_at: String,
    pub updated_at: String,
}

/// A live funding container owned by a client, optionally attached to a
/// service agreement. Balance moves only through ledger transactions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientBucket {
    pub schema_version: String,
    pub bucket_id: String,
    pub org_id: String,
    pub client_id: String,
    pub agreement_id: Option<String>,
    pub template_id: Option<String>,
    pub name: String,
    pub category: BucketCategory,
    pub funding_source: String,
    pub current_balance_cents: i64,
    /// Upper balance bound for draw-down spending; 0 for pure fill-up boxes.
    pub credit_limit_cents: i64,
    /// Nominal allocation counted by the agreement aggregator.
    pub allocated_amount_cents: i64,
    pub period_start: Option<String>,
    pub period_end: Option<String>,
    pub status: BucketStatus,
    pub characteristics: Vec<Characteristic>,
    pub created_at: String,
    pub updated_at: String,
}

impl ClientBucket {
    /// Enabled characteristics whose applicability matches this bucket.
    pub fn enabled_kinds(&self) -> impl Iterator<Item = &CharacteristicKind> {
        let category = self.category;
        self.characteristics
            .iter()
            .filter(move |entry| entry.enabled && entry.kind.applies_to(category))
            .map(|entry| &entry.kind)
    }

    /// Overdraft allowance in cents; 0 unless `allow_overdraft` is enabled.
    pub fn overdraft_limit_cents(&self) -> i64 {
        self.enabled_kinds()
            .find_map(|kind| match kind {
                CharacteristicKind::AllowOverdraft {
                    overdraft_limit_cents,
                } => Some((*overdraft_limit_cents).max(0)),
                _ => None,
            })
            .unwrap_or(0)
    }

    /// Compliance floor in cents, when a compliance hold is enabled.
    pub fn compliance_floor_cents(&self) -> Option<i64> {
        self.enabled_kinds().find_map(|kind| match kind {
            CharacteristicKind::ComplianceHold {
                minimum_balance_cents,
            } => Some(*minimum_balance_cents),
            _ => None,
        })
    }

    pub fn over_limit_credit_allowed(&self) -> bool {
        self.enabled_kinds()
            .any(|kind| matches!(kind, CharacteristicKind::AllowOverLimitCredit))
    }

    pub fn capacity_cap(&self) -> Option<(i64, &MaxCapacityAction)> {
        self.enabled_kinds().find_map(|kind| match kind {
            CharacteristicKind::CapacityCap {
                capacity_cents,
                action,
            } => Some((*capacity_cents, action)),
            _ => None,
        })
    }

}

/// One row of the append-only per-bucket ledger. `balance_after_cents` is the
/// bucket balance immediately after this transaction's signed amount applied;
/// the stored bucket balance always equals the most recent `balance_after`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerTransaction {
    pub schema_version: String,
    pub transaction_id: String,
    pub org_id: String,
    pub client_id: String,
    pub agreement_id: Option<String>,
    pub bucket_id: String,
    pub kind: TransactionKind,
    pub amount_cents: i64,
    pub balance_after_cents: i64,
    pub description: String,
    pub recorded_at: String,
    /// Per-bucket sequence, monotonically increasing from 1.
    pub sequence: u64,
    pub status: TransactionStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceAgreement {
    pub schema_version: String,
    pub agreement_id: String,
    pub org_id: String,
    pub client_id: String,
    pub status: AgreementStatus,
    pub allocation_policy: AllocationPolicy,
    pub bucket_ids: Vec<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    /// Extended fields, saved best-effort after the core record commits.
    pub care_plan_reference: Option<String>,
    pub notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Catalog entry for a deliverable service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceItem {
    pub schema_version: String,
    pub service_id: String,
    pub org_id: String,
    pub name: String,
    pub code: String,
    pub unit_price_cents: i64,
    pub status: ServiceStatus,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    LowBalance,
    FillLevel,
}

/// Emitted when a transaction pushes utilization across a configured
/// threshold. Only the highest threshold crossed by one transaction fires.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThresholdAlert {
    pub bucket_id: String,
    pub kind: AlertKind,
    pub threshold_pct: u8,
    pub utilization_pct: f64,
}

/// Per-bucket line in an agreement summary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BucketSummary {
    pub bucket_id: String,
    pub category: BucketCategory,
    pub allocated_amount_cents: i64,
    pub current_balance_cents: i64,
    pub utilization_pct: f64,
}

/// Agreement-level figures, derived lazily on read and never stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgreementTotals {
    pub schema_version: String,
    pub agreement_id: String,
    pub total_value_cents: i64,
    pub remaining_balance_cents: i64,
    pub buckets: Vec<BucketSummary>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationFailed,
    InsufficientFunds,
    StatusPreconditionFailed,
    AgreementNotEditable,
    CharacteristicNotApplicable,
    NotFound,
    OrgScopeViolation,
    Conflict,
    TemplateInUse,
    StoreError,
    ContractVersionUnsupported,
    InternalError,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiError {
    pub schema_version: String,
    pub error_code: ErrorCode,
    pub message: String,
    pub details: Option<String>,
}

impl ApiError {
    pub fn new(error_code: ErrorCode, message: impl Into<String>, details: Option<String>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            error_code,
            message: message.into(),
            details,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.details {
            Some(details) => write!(f, "{:?}: {} ({details})", self.error_code, self.message),
            None => write!(f, "{:?}: {}", self.error_code, self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_bucket() -> ClientBucket {
        ClientBucket {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            bucket_id: "bucket:000001".to_string(),
            org_id: "org:alpha".to_string(),
            client_id: "client:000001".to_string(),
            agreement_id: None,
            template_id: None,
            name: "Home care package".to_string(),
            category: BucketCategory::DrawDown,
            funding_source: "HCP".to_string(),
            current_balance_cents: 500_00,
            credit_limit_cents: 1_000_00,
            allocated_amount_cents: 1_000_00,
            period_start: None,
            period_end: None,
            status: BucketStatus::Active,
            characteristics: Vec::new(),
            created_at: "2026-01-01T00:00:00Z".to_string(),
            updated_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn overdraft_limit_defaults_to_zero() {
        let bucket = sample_bucket();
        assert_eq!(bucket.overdraft_limit_cents(), 0);
    }

    #[test]
    fn disabled_characteristics_are_ignored() {
        let mut bucket = sample_bucket();
        bucket.characteristics.push(Characteristic {
            enabled: false,
            kind: CharacteristicKind::AllowOverdraft {
                overdraft_limit_cents: 200_00,
            },
        });
        assert_eq!(bucket.overdraft_limit_cents(), 0);

        bucket.characteristics[0].enabled = true;
        assert_eq!(bucket.overdraft_limit_cents(), 200_00);
    }

    #[test]
    fn fill_up_characteristic_does_not_apply_to_draw_down() {
        let mut bucket = sample_bucket();
        bucket.characteristics.push(Characteristic {
            enabled: true,
            kind: CharacteristicKind::CapacityCap {
                capacity_cents: 300_00,
                action: MaxCapacityAction::StopAccumulation,
            },
        });
        assert!(bucket.capacity_cap().is_none());
    }

    #[test]
    fn allocation_policy_round_trips() {
        let policy = AllocationPolicy::FixedAllocation {
            total_value_cents: 750_00,
        };
        let encoded = serde_json::to_string(&policy).expect("serialize");
        assert!(encoded.contains("fixed_allocation"));
        let decoded: AllocationPolicy = serde_json::from_str(&encoded).expect("deserialize");
        assert_eq!(policy, decoded);
    }

    #[test]
    fn error_codes_use_screaming_snake_case_on_the_wire() {
        let encoded =
            serde_json::to_string(&ErrorCode::InsufficientFunds).expect("serialize error code");
        assert_eq!(encoded, "\"INSUFFICIENT_FUNDS\"");
    }
}
