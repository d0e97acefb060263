//! Agreement-level totals, derived lazily on read from the agreement's
//! buckets. Nothing here is stored durably; callers recompute whenever
//! buckets or their transactions change.

use std::fmt;

use contracts::{
    AgreementTotals, AllocationPolicy, ApiError, BucketCategory, BucketSummary, ClientBucket,
    ErrorCode, OrgContext, ServiceAgreement, SCHEMA_VERSION_V1,
};

use crate::ledger::utilization_pct;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregatorError {
    OrgScopeViolation {
        agreement_id: String,
        expected_org: String,
    },
    ForeignBucket {
        agreement_id: String,
        bucket_id: String,
    },
}

impl fmt::Display for AggregatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OrgScopeViolation {
                agreement_id,
                expected_org,
            } => write!(
                f,
                "agreement {agreement_id} does not belong to organization {expected_org}"
            ),
            Self::ForeignBucket {
                agreement_id,
                bucket_id,
            } => write!(
                f,
                "bucket {bucket_id} is not part of agreement {agreement_id}"
            ),
        }
    }
}

impl std::error::Error for AggregatorError {}

impl AggregatorError {
    pub fn to_api_error(&self) -> ApiError {
        let code = match self {
            Self::OrgScopeViolation { .. } => ErrorCode::OrgScopeViolation,
            Self::ForeignBucket { .. } => ErrorCode::ValidationFailed,
        };
        ApiError::new(code, self.to_string(), None)
    }
}

/// Computes the agreement's total value under its allocation policy and the
/// remaining balance across its boxes.
///
/// Remaining balance is the product's definition, reproduced as given:
/// draw-down allocation minus draw-down spend, less outstanding (un-invoiced)
/// fill-up charges, plus hybrid box balances.
pub fn agreement_totals(
    ctx: &OrgContext,
    agreement: &ServiceAgreement,
    buckets: &[ClientBucket],
) -> Result<AgreementTotals, AggregatorError> {
    if agreement.org_id != ctx.org_id {
        return Err(AggregatorError::OrgScopeViolation {
            agreement_id: agreement.agreement_id.clone(),
            expected_org: ctx.org_id.clone(),
        });
    }
    for bucket in buckets {
        if bucket.org_id != ctx.org_id
            || !agreement
                .bucket_ids
                .iter()
                .any(|id| id == &bucket.bucket_id)
        {
            return Err(AggregatorError::ForeignBucket {
                agreement_id: agreement.agreement_id.clone(),
                bucket_id: bucket.bucket_id.clone(),
            });
        }
    }

    let total_value_cents = match &agreement.allocation_policy {
        AllocationPolicy::SumOfBuckets => buckets
            .iter()
            .map(|bucket| bucket.allocated_amount_cents)
            .sum(),
        AllocationPolicy::FixedAllocation { total_value_cents } => *total_value_cents,
    };

    let mut draw_down_allocated = 0_i64;
    let mut draw_down_spent = 0_i64;
    let mut fill_up_outstanding = 0_i64;
    let mut hybrid_balance = 0_i64;
    for bucket in buckets {
        match bucket.category {
            BucketCategory::DrawDown => {
                draw_down_allocated += bucket.allocated_amount_cents;
                draw_down_spent += bucket.allocated_amount_cents - bucket.current_balance_cents;
            }
            BucketCategory::FillUp => fill_up_outstanding += bucket.current_balance_cents,
            BucketCategory::Hybrid => hybrid_balance += bucket.current_balance_cents,
        }
    }
    let remaining_balance_cents =
        draw_down_allocated - draw_down_spent - fill_up_outstanding + hybrid_balance;

    let bucket_summaries = buckets
        .iter()
        .map(|bucket| BucketSummary {
            bucket_id: bucket.bucket_id.clone(),
            category: bucket.category,
            allocated_amount_cents: bucket.allocated_amount_cents,
            current_balance_cents: bucket.current_balance_cents,
            utilization_pct: utilization_pct(bucket),
        })
        .collect();

    Ok(AgreementTotals {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        agreement_id: agreement.agreement_id.clone(),
        total_value_cents,
        remaining_balance_cents,
        buckets: bucket_summaries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{AgreementStatus, BucketStatus};

    fn ctx() -> OrgContext {
        OrgContext::new("org:alpha")
    }

    fn agreement(policy: AllocationPolicy, bucket_ids: Vec<String>) -> ServiceAgreement {
        ServiceAgreement {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            agreement_id: "agreement:000001".to_string(),
            org_id: "org:alpha".to_string(),
            client_id: "client:000001".to_string(),
            status: AgreementStatus::Active,
            allocation_policy: policy,
            bucket_ids,
            start_date: None,
            end_date: None,
            care_plan_reference: None,
            notes: None,
            created_at: "2026-01-01T00:00:00Z".to_string(),
            updated_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    fn bucket(
        bucket_id: &str,
        category: BucketCategory,
        allocated_cents: i64,
        balance_cents: i64,
    ) -> ClientBucket {
        ClientBucket {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            bucket_id: bucket_id.to_string(),
            org_id: "org:alpha".to_string(),
            client_id: "client:000001".to_string(),
            agreement_id: Some("agreement:000001".to_string()),
            template_id: None,
            name: bucket_id.to_string(),
            category,
            funding_source: "HCP".to_string(),
            current_balance_cents: balance_cents,
            credit_limit_cents: if category == BucketCategory::FillUp {
                0
            } else {
                allocated_cents
            },
            allocated_amount_cents: allocated_cents,
            period_start: None,
            period_end: None,
            status: BucketStatus::Active,
            characteristics: Vec::new(),
            created_at: "2026-01-01T00:00:00Z".to_string(),
            updated_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn sum_of_buckets_counts_nominal_allocations() {
        let buckets = vec![
            bucket("bucket:a", BucketCategory::DrawDown, 100, 40),
            bucket("bucket:b", BucketCategory::FillUp, 250, 10),
            bucket("bucket:c", BucketCategory::Hybrid, 0, 5),
        ];
        let ids = buckets.iter().map(|b| b.bucket_id.clone()).collect();
        let totals =
            agreement_totals(&ctx(), &agreement(AllocationPolicy::SumOfBuckets, ids), &buckets)
                .expect("totals");

        assert_eq!(totals.total_value_cents, 350);
    }

    #[test]
    fn fixed_allocation_ignores_bucket_sums() {
        let buckets = vec![bucket("bucket:a", BucketCategory::DrawDown, 100, 100)];
        let totals = agreement_totals(
            &ctx(),
            &agreement(
                AllocationPolicy::FixedAllocation {
                    total_value_cents: 9_999,
                },
                vec!["bucket:a".to_string()],
            ),
            &buckets,
        )
        .expect("totals");

        assert_eq!(totals.total_value_cents, 9_999);
    }

    #[test]
    fn remaining_balance_mixes_box_types_per_the_product_formula() {
        let buckets = vec![
            // allocated 1000, spent 600 -> contributes 400
            bucket("bucket:dd", BucketCategory::DrawDown, 1_000, 400),
            // outstanding charges subtract
            bucket("bucket:fu", BucketCategory::FillUp, 0, 150),
            // hybrid balance adds
            bucket("bucket:hy", BucketCategory::Hybrid, 200, 75),
        ];
        let ids = buckets.iter().map(|b| b.bucket_id.clone()).collect();
        let totals =
            agreement_totals(&ctx(), &agreement(AllocationPolicy::SumOfBuckets, ids), &buckets)
                .expect("totals");

        assert_eq!(totals.remaining_balance_cents, 400 - 150 + 75);
    }

    #[test]
    fn buckets_outside_the_agreement_are_rejected() {
        let buckets = vec![bucket("bucket:stray", BucketCategory::DrawDown, 100, 100)];
        let err = agreement_totals(
            &ctx(),
            &agreement(AllocationPolicy::SumOfBuckets, Vec::new()),
            &buckets,
        )
        .expect_err("stray bucket");
        assert!(matches!(err, AggregatorError::ForeignBucket { .. }));
    }

    #[test]
    fn cross_tenant_agreement_is_rejected() {
        let err = agreement_totals(
            &OrgContext::new("org:beta"),
            &agreement(AllocationPolicy::SumOfBuckets, Vec::new()),
            &[],
        )
        .expect_err("cross-tenant read");
        assert!(matches!(err, AggregatorError::OrgScopeViolation { .. }));
    }
}
