//! The funding ledger: validates and computes one transaction against a
//! bucket snapshot. The store layer re-runs this against freshly read state
//! inside its atomic unit; nothing here mutates storage.

use std::fmt;

use contracts::{
    AgreementStatus, AlertKind, ApiError, BucketCategory, BucketStatus, CharacteristicKind,
    ClientBucket, ClientStatus, ErrorCode, LedgerTransaction, OrgContext, ThresholdAlert,
    TransactionKind, TransactionStatus, SCHEMA_VERSION_V1,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    OrgScopeViolation {
        bucket_id: String,
        expected_org: String,
    },
    InvalidAmount {
        amount_cents: i64,
    },
    BucketNotActive {
        bucket_id: String,
        status: BucketStatus,
    },
    ClientNotActive {
        client_id: String,
        status: ClientStatus,
    },
    AgreementNotActive {
        agreement_id: String,
        status: AgreementStatus,
    },
    KindNotApplicable {
        kind: TransactionKind,
        category: BucketCategory,
    },
    InsufficientFunds {
        bucket_id: String,
        requested_cents: i64,
        available_cents: i64,
        shortfall_cents: i64,
    },
    LimitReached {
        bucket_id: String,
        limit_cents: i64,
    },
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OrgScopeViolation {
                bucket_id,
                expected_org,
            } => write!(
                f,
                "bucket {bucket_id} does not belong to organization {expected_org}"
            ),
            Self::InvalidAmount { amount_cents } => {
                write!(f, "transaction amount must be positive, got {amount_cents}")
            }
            Self::BucketNotActive { bucket_id, status } => {
                write!(f, "bucket {bucket_id} is {}", status.as_str())
            }
            Self::ClientNotActive { client_id, status } => {
                write!(f, "client {client_id} is {}", status.as_str())
            }
            Self::AgreementNotActive {
                agreement_id,
                status,
            } => write!(f, "agreement {agreement_id} is {}", status.as_str()),
            Self::KindNotApplicable { kind, category } => write!(
                f,
                "{} transactions are not applicable to {} buckets",
                kind.as_str(),
                category.as_str()
            ),
            Self::InsufficientFunds {
                bucket_id,
                requested_cents,
                available_cents,
                shortfall_cents,
            } => write!(
                f,
                "insufficient funds in {bucket_id}: requested {requested_cents}, \
                 available {available_cents}, short {shortfall_cents}"
            ),
            Self::LimitReached {
                bucket_id,
                limit_cents,
            } => write!(f, "bucket {bucket_id} is already at its limit {limit_cents}"),
        }
    }
}

impl std::error::Error for LedgerError {}

impl LedgerError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::OrgScopeViolation { .. } => ErrorCode::OrgScopeViolation,
            Self::InvalidAmount { .. } | Self::KindNotApplicable { .. } => {
                ErrorCode::ValidationFailed
            }
            Self::BucketNotActive { .. }
            | Self::ClientNotActive { .. }
            | Self::AgreementNotActive { .. } => ErrorCode::StatusPreconditionFailed,
            Self::InsufficientFunds { .. } => ErrorCode::InsufficientFunds,
            Self::LimitReached { .. } => ErrorCode::ValidationFailed,
        }
    }

    pub fn to_api_error(&self) -> ApiError {
        ApiError::new(self.error_code(), self.to_string(), None)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRequest {
    pub kind: TransactionKind,
    pub amount_cents: i64,
    pub description: String,
}

/// Follow-up effect of a credit that hit a capacity cap.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum CapacityEffect {
    /// Accumulation stopped at capacity; the excess was not applied.
    Stopped { excess_cents: i64 },
    /// The excess should be credited to the configured target bucket.
    Overflow {
        target_bucket_id: String,
        overflow_cents: i64,
    },
    /// The excess should be drafted as an invoice line.
    InvoiceDraft { amount_cents: i64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LedgerOutcome {
    pub transaction: LedgerTransaction,
    pub new_balance_cents: i64,
    pub requested_cents: i64,
    /// Amount actually applied; less than requested when a limit clamped it.
    pub applied_cents: i64,
    pub capacity_effect: Option<CapacityEffect>,
    pub alerts: Vec<ThresholdAlert>,
}

/// Sign of a transaction kind for a bucket category: +1 grows the balance,
/// -1 shrinks it. Service delivery spends draw-down funds but accumulates
/// fill-up charges; invoice settlement only clears fill-up charges.
fn signed_direction(
    kind: TransactionKind,
    category: BucketCategory,
) -> Result<i64, LedgerError> {
    match (kind, category) {
        (TransactionKind::Credit, _) => Ok(1),
        (TransactionKind::Debit, _) => Ok(-1),
        (TransactionKind::ServiceDelivery, BucketCategory::FillUp) => Ok(1),
        (TransactionKind::ServiceDelivery, _) => Ok(-1),
        (TransactionKind::InvoiceSettlement, BucketCategory::FillUp) => Ok(-1),
        (TransactionKind::InvoiceSettlement, category) => {
            Err(LedgerError::KindNotApplicable { kind, category })
        }
    }
}

/// Validates and computes one transaction. Checks run in order, all before
/// any effect is computed; a rejected transaction leaves no trace.
#[allow(clippy::too_many_arguments)]
pub fn apply_transaction(
    ctx: &OrgContext,
    bucket: &ClientBucket,
    client_status: ClientStatus,
    agreement_status: Option<(&str, AgreementStatus)>,
    request: &TransactionRequest,
    recorded_at: &str,
    sequence: u64,
) -> Result<LedgerOutcome, LedgerError> {
    if bucket.org_id != ctx.org_id {
        return Err(LedgerError::OrgScopeViolation {
            bucket_id: bucket.bucket_id.clone(),
            expected_org: ctx.org_id.clone(),
        });
    }
    if request.amount_cents <= 0 {
        return Err(LedgerError::InvalidAmount {
            amount_cents: request.amount_cents,
        });
    }
    if bucket.status != BucketStatus::Active {
        return Err(LedgerError::BucketNotActive {
            bucket_id: bucket.bucket_id.clone(),
            status: bucket.status,
        });
    }
    if client_status != ClientStatus::Active {
        return Err(LedgerError::ClientNotActive {
            client_id: bucket.client_id.clone(),
            status: client_status,
        });
    }
    if let Some((agreement_id, status)) = agreement_status {
        if status != AgreementStatus::Active {
            return Err(LedgerError::AgreementNotActive {
                agreement_id: agreement_id.to_string(),
                status,
            });
        }
    }

    let direction = signed_direction(request.kind, bucket.category)?;
    let balance = bucket.current_balance_cents;

    let (applied_cents, capacity_effect) = if direction < 0 {
        (debit_amount(bucket, request.amount_cents)?, None)
    } else {
        credit_amount(bucket, request.amount_cents)?
    };

    let new_balance = balance + direction * applied_cents;
    let alerts = threshold_alerts(bucket, balance, new_balance);

    let transaction = LedgerTransaction {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        transaction_id: format!("txn:{}:{:06}", bucket.bucket_id, sequence),
        org_id: bucket.org_id.clone(),
        client_id: bucket.client_id.clone(),
        agreement_id: bucket.agreement_id.clone(),
        bucket_id: bucket.bucket_id.clone(),
        kind: request.kind,
        amount_cents: applied_cents,
        balance_after_cents: new_balance,
        description: request.description.clone(),
        recorded_at: recorded_at.to_string(),
        sequence,
        status: TransactionStatus::Posted,
    };

    Ok(LedgerOutcome {
        transaction,
        new_balance_cents: new_balance,
        requested_cents: request.amount_cents,
        applied_cents,
        capacity_effect,
        alerts,
    })
}

/// Lower balance bound for a debit. Draw-down and hybrid boxes floor at
/// `-overdraft_limit`, raised by a compliance hold; fill-up boxes have no
/// intrinsic floor below zero.
fn debit_floor(bucket: &ClientBucket) -> i64 {
    match bucket.category {
        BucketCategory::DrawDown | BucketCategory::Hybrid => {
            let base = -bucket.overdraft_limit_cents();
            match bucket.compliance_floor_cents() {
                Some(minimum) => base.max(minimum),
                None => base,
            }
        }
        BucketCategory::FillUp => bucket.compliance_floor_cents().unwrap_or(i64::MIN),
    }
}

fn debit_amount(bucket: &ClientBucket, amount_cents: i64) -> Result<i64, LedgerError> {
    let floor = debit_floor(bucket);
    let projected = bucket.current_balance_cents - amount_cents;
    if projected < floor {
        return Err(LedgerError::InsufficientFunds {
            bucket_id: bucket.bucket_id.clone(),
            requested_cents: amount_cents,
            available_cents: bucket.current_balance_cents - floor,
            shortfall_cents: floor - projected,
        });
    }
    Ok(amount_cents)
}

fn credit_amount(
    bucket: &ClientBucket,
    amount_cents: i64,
) -> Result<(i64, Option<CapacityEffect>), LedgerError> {
    match bucket.category {
        BucketCategory::DrawDown => {
            if bucket.over_limit_credit_allowed() {
                return Ok((amount_cents, None));
            }
            let headroom = bucket.credit_limit_cents - bucket.current_balance_cents;
            if headroom <= 0 {
                return Err(LedgerError::LimitReached {
                    bucket_id: bucket.bucket_id.clone(),
                    limit_cents: bucket.credit_limit_cents,
                });
            }
            if amount_cents > headroom {
                return Ok((
                    headroom,
                    Some(CapacityEffect::Stopped {
                        excess_cents: amount_cents - headroom,
                    }),
                ));
            }
            Ok((amount_cents, None))
        }
        BucketCategory::FillUp | BucketCategory::Hybrid => {
            let Some((capacity_cents, action)) = bucket.capacity_cap() else {
                return Ok((amount_cents, None));
            };
            let headroom = capacity_cents - bucket.current_balance_cents;
            if headroom <= 0 {
                return Err(LedgerError::LimitReached {
                    bucket_id: bucket.bucket_id.clone(),
                    limit_cents: capacity_cents,
                });
            }
            if amount_cents <= headroom {
                return Ok((amount_cents, None));
            }
            let excess = amount_cents - headroom;
            let effect = match action {
                contracts::MaxCapacityAction::StopAccumulation => CapacityEffect::Stopped {
                    excess_cents: excess,
                },
                contracts::MaxCapacityAction::Overflow { target_bucket_id } => {
                    CapacityEffect::Overflow {
                        target_bucket_id: target_bucket_id.clone(),
                        overflow_cents: excess,
                    }
                }
                contracts::MaxCapacityAction::AutoInvoice => CapacityEffect::InvoiceDraft {
                    amount_cents: excess,
                },
            };
            Ok((headroom, Some(effect)))
        }
    }
}

/// Utilization percentage for a bucket at its current balance.
pub fn utilization_pct(bucket: &ClientBucket) -> f64 {
    utilization_at(bucket, bucket.current_balance_cents)
}

fn utilization_at(bucket: &ClientBucket, balance_cents: i64) -> f64 {
    match bucket.category {
        BucketCategory::DrawDown => ratio_pct(
            bucket.credit_limit_cents - balance_cents,
            bucket.credit_limit_cents,
        ),
        BucketCategory::FillUp => bucket
            .capacity_cap()
            .map(|(capacity, _)| ratio_pct(balance_cents, capacity))
            .unwrap_or(0.0),
        BucketCategory::Hybrid => {
            if bucket.credit_limit_cents > 0 {
                ratio_pct(
                    bucket.credit_limit_cents - balance_cents,
                    bucket.credit_limit_cents,
                )
            } else {
                bucket
                    .capacity_cap()
                    .map(|(capacity, _)| ratio_pct(balance_cents, capacity))
                    .unwrap_or(0.0)
            }
        }
    }
}

fn ratio_pct(part_cents: i64, whole_cents: i64) -> f64 {
    if whole_cents <= 0 {
        return 0.0;
    }
    part_cents as f64 / whole_cents as f64 * 100.0
}

fn alert_config(bucket: &ClientBucket) -> Option<(AlertKind, &[u8])> {
    bucket.enabled_kinds().find_map(|kind| match kind {
        CharacteristicKind::LowBalanceWarning { thresholds_pct } => {
            Some((AlertKind::LowBalance, thresholds_pct.as_slice()))
        }
        CharacteristicKind::FillLevelAlert { thresholds_pct } => {
            Some((AlertKind::FillLevel, thresholds_pct.as_slice()))
        }
        _ => None,
    })
}

/// Compares utilization before and after one transaction and emits the
/// highest configured threshold crossed by it. A threshold already at or
/// above its mark before the transaction does not fire again.
fn threshold_alerts(
    bucket: &ClientBucket,
    balance_before: i64,
    balance_after: i64,
) -> Vec<ThresholdAlert> {
    let Some((kind, thresholds)) = alert_config(bucket) else {
        return Vec::new();
    };

    let before = utilization_at(bucket, balance_before);
    let after = utilization_at(bucket, balance_after);

    thresholds
        .iter()
        .copied()
        .filter(|threshold| {
            let mark = f64::from(*threshold);
            before < mark && after >= mark
        })
        .max()
        .map(|threshold_pct| {
            vec![ThresholdAlert {
                bucket_id: bucket.bucket_id.clone(),
                kind,
                threshold_pct,
                utilization_pct: after,
            }]
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{Characteristic, MaxCapacityAction};

    fn ctx() -> OrgContext {
        OrgContext::new("org:alpha")
    }

    fn draw_down_bucket(balance_cents: i64, credit_limit_cents: i64) -> ClientBucket {
        ClientBucket {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            bucket_id: "bucket:000001".to_string(),
            org_id: "org:alpha".to_string(),
            client_id: "client:000001".to_string(),
            agreement_id: None,
            template_id: None,
            name: "Core supports".to_string(),
            category: BucketCategory::DrawDown,
            funding_source: "HCP".to_string(),
            current_balance_cents: balance_cents,
            credit_limit_cents,
            allocated_amount_cents: credit_limit_cents,
            period_start: None,
            period_end: None,
            status: BucketStatus::Active,
            characteristics: Vec::new(),
            created_at: "2026-01-01T00:00:00Z".to_string(),
            updated_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    fn fill_up_bucket(balance_cents: i64) -> ClientBucket {
        let mut bucket = draw_down_bucket(balance_cents, 0);
        bucket.category = BucketCategory::FillUp;
        bucket.allocated_amount_cents = 0;
        bucket
    }

    fn debit(amount_cents: i64) -> TransactionRequest {
        TransactionRequest {
            kind: TransactionKind::Debit,
            amount_cents,
            description: "test debit".to_string(),
        }
    }

    fn credit(amount_cents: i64) -> TransactionRequest {
        TransactionRequest {
            kind: TransactionKind::Credit,
            amount_cents,
            description: "test credit".to_string(),
        }
    }

    fn apply(
        bucket: &ClientBucket,
        request: &TransactionRequest,
    ) -> Result<LedgerOutcome, LedgerError> {
        apply_transaction(
            &ctx(),
            bucket,
            ClientStatus::Active,
            None,
            request,
            "2026-01-02T00:00:00Z",
            1,
        )
    }

    #[test]
    fn debit_within_balance_succeeds_with_exact_balance_after() {
        let bucket = draw_down_bucket(10_000, 10_000);
        let outcome = apply(&bucket, &debit(4_000)).expect("debit should apply");

        assert_eq!(outcome.new_balance_cents, 6_000);
        assert_eq!(outcome.transaction.balance_after_cents, 6_000);
        assert_eq!(outcome.transaction.amount_cents, 4_000);
        assert_eq!(outcome.transaction.status, TransactionStatus::Posted);
    }

    #[test]
    fn overdrawing_debit_reports_shortfall_verbatim() {
        let bucket = draw_down_bucket(6_000, 10_000);
        let err = apply(&bucket, &debit(7_000)).expect_err("debit should be rejected");

        match err {
            LedgerError::InsufficientFunds {
                requested_cents,
                available_cents,
                shortfall_cents,
                ..
            } => {
                assert_eq!(requested_cents, 7_000);
                assert_eq!(available_cents, 6_000);
                assert_eq!(shortfall_cents, 1_000);
            }
            other => panic!("expected InsufficientFunds, got {other:?}"),
        }
    }

    #[test]
    fn overdraft_characteristic_lowers_the_floor() {
        let mut bucket = draw_down_bucket(1_000, 10_000);
        bucket
            .characteristics
            .push(Characteristic::enabled(CharacteristicKind::AllowOverdraft {
                overdraft_limit_cents: 2_000,
            }));

        let outcome = apply(&bucket, &debit(2_500)).expect("overdraft debit should apply");
        assert_eq!(outcome.new_balance_cents, -1_500);

        let err = apply(&bucket, &debit(3_500)).expect_err("beyond overdraft should fail");
        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
    }

    #[test]
    fn compliance_hold_raises_the_floor() {
        let mut bucket = draw_down_bucket(5_000, 10_000);
        bucket
            .characteristics
            .push(Characteristic::enabled(CharacteristicKind::ComplianceHold {
                minimum_balance_cents: 2_000,
            }));

        let err = apply(&bucket, &debit(3_500)).expect_err("below hold should fail");
        match err {
            LedgerError::InsufficientFunds {
                available_cents, ..
            } => assert_eq!(available_cents, 3_000),
            other => panic!("expected InsufficientFunds, got {other:?}"),
        }

        let outcome = apply(&bucket, &debit(3_000)).expect("at hold should apply");
        assert_eq!(outcome.new_balance_cents, 2_000);
    }

    #[test]
    fn draw_down_credit_clamps_at_the_limit() {
        let bucket = draw_down_bucket(9_500, 10_000);
        let outcome = apply(&bucket, &credit(2_000)).expect("credit should apply");

        assert_eq!(outcome.applied_cents, 500);
        assert_eq!(outcome.new_balance_cents, 10_000);
        assert_eq!(
            outcome.capacity_effect,
            Some(CapacityEffect::Stopped { excess_cents: 1_500 })
        );
    }

    #[test]
    fn over_limit_credit_characteristic_disables_the_clamp() {
        let mut bucket = draw_down_bucket(9_500, 10_000);
        bucket.characteristics.push(Characteristic::enabled(
            CharacteristicKind::AllowOverLimitCredit,
        ));

        let outcome = apply(&bucket, &credit(2_000)).expect("credit should apply");
        assert_eq!(outcome.applied_cents, 2_000);
        assert_eq!(outcome.new_balance_cents, 11_500);
    }

    #[test]
    fn credit_at_full_limit_is_rejected() {
        let bucket = draw_down_bucket(10_000, 10_000);
        let err = apply(&bucket, &credit(100)).expect_err("no headroom");
        assert!(matches!(err, LedgerError::LimitReached { .. }));
    }

    #[test]
    fn fill_up_service_delivery_accumulates_charges() {
        let bucket = fill_up_bucket(1_000);
        let request = TransactionRequest {
            kind: TransactionKind::ServiceDelivery,
            amount_cents: 750,
            description: "nursing visit".to_string(),
        };

        let outcome = apply(&bucket, &request).expect("delivery should accumulate");
        assert_eq!(outcome.new_balance_cents, 1_750);
    }

    #[test]
    fn invoice_settlement_is_rejected_on_draw_down() {
        let bucket = draw_down_bucket(5_000, 10_000);
        let request = TransactionRequest {
            kind: TransactionKind::InvoiceSettlement,
            amount_cents: 1_000,
            description: "invoice".to_string(),
        };

        let err = apply(&bucket, &request).expect_err("settlement needs a fill-up box");
        assert!(matches!(err, LedgerError::KindNotApplicable { .. }));
    }

    #[test]
    fn capacity_overflow_reports_target_and_excess() {
        let mut bucket = fill_up_bucket(800);
        bucket
            .characteristics
            .push(Characteristic::enabled(CharacteristicKind::CapacityCap {
                capacity_cents: 1_000,
                action: MaxCapacityAction::Overflow {
                    target_bucket_id: "bucket:000002".to_string(),
                },
            }));

        let outcome = apply(&bucket, &credit(500)).expect("credit should clamp");
        assert_eq!(outcome.applied_cents, 200);
        assert_eq!(outcome.new_balance_cents, 1_000);
        assert_eq!(
            outcome.capacity_effect,
            Some(CapacityEffect::Overflow {
                target_bucket_id: "bucket:000002".to_string(),
                overflow_cents: 300,
            })
        );
    }

    #[test]
    fn auto_invoice_capacity_action_drafts_the_excess() {
        let mut bucket = fill_up_bucket(900);
        bucket
            .characteristics
            .push(Characteristic::enabled(CharacteristicKind::CapacityCap {
                capacity_cents: 1_000,
                action: MaxCapacityAction::AutoInvoice,
            }));

        let outcome = apply(&bucket, &credit(400)).expect("credit should clamp");
        assert_eq!(
            outcome.capacity_effect,
            Some(CapacityEffect::InvoiceDraft { amount_cents: 300 })
        );
    }

    #[test]
    fn zero_and_negative_amounts_are_rejected_before_any_effect() {
        let bucket = draw_down_bucket(5_000, 10_000);
        assert!(matches!(
            apply(&bucket, &debit(0)),
            Err(LedgerError::InvalidAmount { amount_cents: 0 })
        ));
        assert!(matches!(
            apply(&bucket, &debit(-50)),
            Err(LedgerError::InvalidAmount { .. })
        ));
    }

    #[test]
    fn inactive_owner_blocks_the_transaction() {
        let bucket = draw_down_bucket(5_000, 10_000);
        let err = apply_transaction(
            &ctx(),
            &bucket,
            ClientStatus::Prospect,
            None,
            &debit(100),
            "2026-01-02T00:00:00Z",
            1,
        )
        .expect_err("prospect client cannot transact");
        assert!(matches!(err, LedgerError::ClientNotActive { .. }));

        let err = apply_transaction(
            &ctx(),
            &bucket,
            ClientStatus::Active,
            Some(("agreement:000001", AgreementStatus::Draft)),
            &debit(100),
            "2026-01-02T00:00:00Z",
            1,
        )
        .expect_err("draft agreement cannot transact");
        assert!(matches!(err, LedgerError::AgreementNotActive { .. }));
    }

    #[test]
    fn foreign_org_is_rejected() {
        let bucket = draw_down_bucket(5_000, 10_000);
        let err = apply_transaction(
            &OrgContext::new("org:beta"),
            &bucket,
            ClientStatus::Active,
            None,
            &debit(100),
            "2026-01-02T00:00:00Z",
            1,
        )
        .expect_err("cross-tenant apply must fail");
        assert!(matches!(err, LedgerError::OrgScopeViolation { .. }));
    }

    #[test]
    fn utilization_is_spent_share_of_the_limit() {
        let bucket = draw_down_bucket(250, 1_000);
        assert!((utilization_pct(&bucket) - 75.0).abs() < f64::EPSILON);

        let zero_limit = draw_down_bucket(0, 0);
        assert_eq!(utilization_pct(&zero_limit), 0.0);
    }

    #[test]
    fn fill_up_utilization_requires_a_capacity_cap() {
        let mut bucket = fill_up_bucket(500);
        assert_eq!(utilization_pct(&bucket), 0.0);

        bucket
            .characteristics
            .push(Characteristic::enabled(CharacteristicKind::CapacityCap {
                capacity_cents: 2_000,
                action: MaxCapacityAction::StopAccumulation,
            }));
        assert!((utilization_pct(&bucket) - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn only_the_highest_crossed_threshold_fires() {
        let mut bucket = draw_down_bucket(10_000, 10_000);
        bucket.characteristics.push(Characteristic::enabled(
            CharacteristicKind::LowBalanceWarning {
                thresholds_pct: vec![50, 75, 90],
            },
        ));

        // 0% -> 80% utilization crosses both 50 and 75; only 75 fires.
        let outcome = apply(&bucket, &debit(8_000)).expect("debit should apply");
        assert_eq!(outcome.alerts.len(), 1);
        assert_eq!(outcome.alerts[0].threshold_pct, 75);
        assert_eq!(outcome.alerts[0].kind, AlertKind::LowBalance);
    }

    #[test]
    fn a_threshold_does_not_fire_twice() {
        let mut bucket = draw_down_bucket(10_000, 10_000);
        bucket.characteristics.push(Characteristic::enabled(
            CharacteristicKind::LowBalanceWarning {
                thresholds_pct: vec![50],
            },
        ));

        let first = apply(&bucket, &debit(6_000)).expect("first debit");
        assert_eq!(first.alerts.len(), 1);

        bucket.current_balance_cents = first.new_balance_cents;
        let second = apply(&bucket, &debit(1_000)).expect("second debit");
        assert!(second.alerts.is_empty());
    }
}
