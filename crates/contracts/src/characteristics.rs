//! Bucket characteristics: independently toggleable behaviors attached to a
//! funding container. Each characteristic id carries its own typed
//! configuration, dispatched as one variant of [`CharacteristicKind`].

use serde::{Deserialize, Serialize};

use crate::BucketCategory;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Applicability {
    DrawDownOnly,
    FillUpOnly,
    Common,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CharacteristicCategory {
    Behavior,
    Alert,
    Reset,
    Compliance,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ResetFrequency {
    Weekly,
    Monthly,
    Quarterly,
    Yearly,
}

/// What happens when a credit would push a fill-up bucket past its capacity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum MaxCapacityAction {
    StopAccumulation,
    Overflow { target_bucket_id: String },
    AutoInvoice,
}

/// One characteristic id with its typed configuration. The wire encoding
/// tags each variant with its id, so `{"id": "allow_overdraft",
/// "overdraft_limit_cents": 20000}` round-trips without free-form maps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "id", rename_all = "snake_case")]
pub enum CharacteristicKind {
    AllowOverdraft {
        overdraft_limit_cents: i64,
    },
    AllowOverLimitCredit,
    LowBalanceWarning {
        /// Utilization percentages, ordered ascending.
        thresholds_pct: Vec<u8>,
    },
    FillLevelAlert {
        thresholds_pct: Vec<u8>,
    },
    CapacityCap {
        capacity_cents: i64,
        action: MaxCapacityAction,
    },
    PeriodReset {
        frequency: ResetFrequency,
    },
    ComplianceHold {
        minimum_balance_cents: i64,
    },
}

impl CharacteristicKind {
    pub fn id(&self) -> &'static str {
        match self {
            Self::AllowOverdraft { .. } => "allow_overdraft",
            Self::AllowOverLimitCredit => "allow_over_limit_credit",
            Self::LowBalanceWarning { .. } => "low_balance_warning",
            Self::FillLevelAlert { .. } => "fill_level_alert",
            Self::CapacityCap { .. } => "capacity_cap",
            Self::PeriodReset { .. } => "period_reset",
            Self::ComplianceHold { .. } => "compliance_hold",
        }
    }

    pub fn applicability(&self) -> Applicability {
        match self {
            Self::AllowOverdraft { .. }
            | Self::AllowOverLimitCredit
            | Self::LowBalanceWarning { .. }
            | Self::PeriodReset { .. } => Applicability::DrawDownOnly,
            Self::FillLevelAlert { .. } | Self::CapacityCap { .. } => Applicability::FillUpOnly,
            Self::ComplianceHold { .. } => Applicability::Common,
        }
    }

    pub fn category(&self) -> CharacteristicCategory {
        match self {
            Self::AllowOverdraft { .. }
            | Self::AllowOverLimitCredit
            | Self::CapacityCap { .. } => CharacteristicCategory::Behavior,
            Self::LowBalanceWarning { .. } | Self::FillLevelAlert { .. } => {
                CharacteristicCategory::Alert
            }
            Self::PeriodReset { .. } => CharacteristicCategory::Reset,
            Self::ComplianceHold { .. } => CharacteristicCategory::Compliance,
        }
    }

    /// A hybrid box both receives and spends funds, so one-sided
    /// characteristics attach to it from either side.
    pub fn applies_to(&self, category: BucketCategory) -> bool {
        match self.applicability() {
            Applicability::Common => true,
            Applicability::DrawDownOnly => {
                matches!(category, BucketCategory::DrawDown | BucketCategory::Hybrid)
            }
            Applicability::FillUpOnly => {
                matches!(category, BucketCategory::FillUp | BucketCategory::Hybrid)
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Characteristic {
    pub enabled: bool,
    #[serde(flatten)]
    pub kind: CharacteristicKind,
}

impl Characteristic {
    pub fn enabled(kind: CharacteristicKind) -> Self {
        Self {
            enabled: true,
            kind,
        }
    }
}
