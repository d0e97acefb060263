//! In-process provider API facade with tenant-scoped validation, atomic
//! ledger writes, and SQLite persistence.

mod server;
mod store;

use std::path::Path;

use contracts::{
    AgreementStatus, AgreementTotals, AllocationPolicy, ApiError, BucketCategory, BucketStatus,
    Characteristic, Client, ClientBucket, ClientStatus, BucketTemplate, LedgerTransaction,
    OrgContext, ServiceAgreement, ServiceItem, ServiceStatus, ThresholdAlert, TransactionKind,
    SCHEMA_VERSION_V1,
};
use ledger_core::{utilization_pct, CapacityEffect, TransactionRequest};
use serde::{Deserialize, Serialize};

pub use server::{serve, ServerError};
pub use store::{SqliteStore, StoreError};

#[derive(Debug, Clone, Deserialize)]
pub struct CreateClientRequest {
    pub client_id: Option<String>,
    pub name: String,
    pub date_of_birth: Option<String>,
    pub care_recipient_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTemplateRequest {
    pub template_id: Option<String>,
    pub name: String,
    pub category: BucketCategory,
    pub funding_source: String,
    pub allocated_amount_cents: i64,
    #[serde(default)]
    pub characteristics: Vec<Characteristic>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateBucketRequest {
    pub bucket_id: Option<String>,
    /// When set, category, name, funding source, allocation, and
    /// characteristics come from the template.
    pub template_id: Option<String>,
    pub agreement_id: Option<String>,
    pub name: Option<String>,
    pub category: Option<BucketCategory>,
    pub funding_source: Option<String>,
    pub allocated_amount_cents: Option<i64>,
    pub characteristics: Option<Vec<Characteristic>>,
    pub period_start: Option<String>,
    pub period_end: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordTransactionRequest {
    pub kind: TransactionKind,
    pub amount_cents: i64,
    pub description: String,
}

/// Everything a caller learns from one recorded transaction, including the
/// separately reported overflow follow-up when a capacity cap redirected the
/// excess to another bucket.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionReceipt {
    pub schema_version: String,
    pub transaction: LedgerTransaction,
    pub new_balance_cents: i64,
    pub requested_cents: i64,
    pub applied_cents: i64,
    pub capacity_effect: Option<CapacityEffect>,
    pub alerts: Vec<ThresholdAlert>,
    pub overflow_transaction: Option<LedgerTransaction>,
    pub overflow_error: Option<ApiError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateAgreementRequest {
    pub agreement_id: Option<String>,
    pub client_id: String,
    pub allocation_policy: AllocationPolicy,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SaveAgreementRequest {
    pub allocation_policy: AllocationPolicy,
    #[serde(default)]
    pub bucket_ids: Vec<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub care_plan_reference: Option<String>,
    pub notes: Option<String>,
}

/// Outcome of the two-step agreement save: the required fields commit first,
/// the extended fields are attempted second and their failure is reported
/// here without rolling back the first step.
#[derive(Debug, Clone, Serialize)]
pub struct AgreementSaveReport {
    pub schema_version: String,
    pub agreement: ServiceAgreement,
    pub extended_saved: bool,
    pub extended_error: Option<ApiError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateServiceRequest {
    pub service_id: Option<String>,
    pub name: String,
    pub code: String,
    pub unit_price_cents: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateServiceRequest {
    pub name: String,
    pub code: String,
    pub unit_price_cents: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BucketUtilization {
    pub schema_version: String,
    pub bucket: ClientBucket,
    pub utilization_pct: f64,
}

#[derive(Debug)]
pub struct ProviderApi {
    store: SqliteStore,
}

impl ProviderApi {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Ok(Self {
            store: SqliteStore::open(path)?,
        })
    }

    // --- clients ---

    pub fn create_client(
        &mut self,
        ctx: &OrgContext,
        request: CreateClientRequest,
    ) -> Result<Client, StoreError> {
        if request.name.trim().is_empty() {
            return Err(StoreError::Validation {
                message: "client name is required".to_string(),
            });
        }
        let client_id = match request.client_id {
            Some(id) => id,
            None => self.store.allocate_id("clients", "client")?,
        };
        let now = self.store.now()?;
        let client = Client {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            client_id,
            org_id: ctx.org_id.clone(),
            name: request.name,
            date_of_birth: request.date_of_birth,
            care_recipient_id: request.care_recipient_id,
            status: ClientStatus::Prospect,
            created_at: now.clone(),
            updated_at: now,
        };
        self.store.insert_client(&client)?;
        Ok(client)
    }

    pub fn get_client(&self, ctx: &OrgContext, client_id: &str) -> Result<Client, StoreError> {
        self.store.get_client(ctx, client_id)
    }

    pub fn list_clients(&self, ctx: &OrgContext) -> Result<Vec<Client>, StoreError> {
        self.store.list_clients(ctx)
    }

    pub fn transition_client(
        &mut self,
        ctx: &OrgContext,
        client_id: &str,
        target: ClientStatus,
    ) -> Result<Client, StoreError> {
        self.store.transition_client_status(ctx, client_id, target)
    }

    // --- bucket templates ---

    pub fn create_template(
        &mut self,
        ctx: &OrgContext,
        request: CreateTemplateRequest,
    ) -> Result<BucketTemplate, StoreError> {
        if request.allocated_amount_cents < 0 {
            return Err(StoreError::Validation {
                message: "allocated amount cannot be negative".to_string(),
            });
        }
        validate_characteristics(&request.characteristics, request.category)?;

        let template_id = match request.template_id {
            Some(id) => id,
            None => self.store.allocate_id("bucket_templates", "template")?,
        };
        let now = self.store.now()?;
        let template = BucketTemplate {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            template_id,
            org_id: ctx.org_id.clone(),
            name: request.name,
            category: request.category,
            funding_source: request.funding_source,
            allocated_amount_cents: request.allocated_amount_cents,
            characteristics: request.characteristics,
            created_at: now.clone(),
            updated_at: now,
        };
        self.store.insert_template(&template)?;
        Ok(template)
    }

    pub fn list_templates(&self, ctx: &OrgContext) -> Result<Vec<BucketTemplate>, StoreError> {
        self.store.list_templates(ctx)
    }

    pub fn toggle_characteristic(
        &mut self,
        ctx: &OrgContext,
        template_id: &str,
        index: usize,
    ) -> Result<BucketTemplate, StoreError> {
        self.store.toggle_characteristic(ctx, template_id, index)
    }

    pub fn delete_template(
        &mut self,
        ctx: &OrgContext,
        template_id: &str,
    ) -> Result<(), StoreError> {
        self.store.delete_template(ctx, template_id)
    }

    // --- buckets ---

    pub fn create_bucket(
        &mut self,
        ctx: &OrgContext,
        client_id: &str,
        request: CreateBucketRequest,
    ) -> Result<ClientBucket, StoreError> {
        let client = self.store.get_client(ctx, client_id)?;
        if client.status != ClientStatus::Active {
            return Err(StoreError::PreconditionFailed {
                message: format!(
                    "client {client_id} is {}; buckets require an active client",
                    client.status.as_str()
                ),
            });
        }

        let (name, category, funding_source, allocated_amount_cents, characteristics) =
            match request.template_id.as_deref() {
                Some(template_id) => {
                    let template = self.store.get_template(ctx, template_id)?;
                    (
                        template.name,
                        template.category,
                        template.funding_source,
                        template.allocated_amount_cents,
                        template.characteristics,
                    )
                }
                None => {
                    let name = request.name.clone().ok_or_else(|| StoreError::Validation {
                        message: "bucket name is required without a template".to_string(),
                    })?;
                    let category = request.category.ok_or_else(|| StoreError::Validation {
                        message: "bucket category is required without a template".to_string(),
                    })?;
                    let funding_source =
                        request
                            .funding_source
                            .clone()
                            .ok_or_else(|| StoreError::Validation {
                                message: "funding source is required without a template"
                                    .to_string(),
                            })?;
                    let allocated = request.allocated_amount_cents.unwrap_or(0);
                    (
                        name,
                        category,
                        funding_source,
                        allocated,
                        request.characteristics.clone().unwrap_or_default(),
                    )
                }
            };
        if allocated_amount_cents < 0 {
            return Err(StoreError::Validation {
                message: "allocated amount cannot be negative".to_string(),
            });
        }
        validate_characteristics(&characteristics, category)?;

        if let Some(agreement_id) = request.agreement_id.as_deref() {
            let agreement = self.store.get_agreement(ctx, agreement_id)?;
            if agreement.client_id != client_id {
                return Err(StoreError::Validation {
                    message: format!(
                        "agreement {agreement_id} belongs to client {}",
                        agreement.client_id
                    ),
                });
            }
            ledger_core::ensure_agreement_editable(agreement_id, agreement.status)?;
        }

        let bucket_id = match request.bucket_id {
            Some(id) => id,
            None => self.store.allocate_id("client_buckets", "bucket")?,
        };
        let now = self.store.now()?;
        let (initial_balance, credit_limit) = match category {
            BucketCategory::DrawDown | BucketCategory::Hybrid => {
                (allocated_amount_cents, allocated_amount_cents)
            }
            BucketCategory::FillUp => (0, 0),
        };
        let bucket = ClientBucket {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            bucket_id: bucket_id.clone(),
            org_id: ctx.org_id.clone(),
            client_id: client_id.to_string(),
            agreement_id: request.agreement_id.clone(),
            template_id: request.template_id.clone(),
            name,
            category,
            funding_source,
            current_balance_cents: initial_balance,
            credit_limit_cents: credit_limit,
            allocated_amount_cents,
            period_start: request.period_start,
            period_end: request.period_end,
            status: BucketStatus::Active,
            characteristics,
            created_at: now.clone(),
            updated_at: now,
        };
        self.store.insert_bucket(&bucket)?;

        if let Some(agreement_id) = request.agreement_id.as_deref() {
            self.store
                .attach_bucket_to_agreement(ctx, agreement_id, &bucket_id)?;
        }
        Ok(bucket)
    }

    pub fn get_bucket(&self, ctx: &OrgContext, bucket_id: &str) -> Result<ClientBucket, StoreError> {
        self.store.get_bucket(ctx, bucket_id)
    }

    pub fn list_buckets_for_client(
        &self,
        ctx: &OrgContext,
        client_id: &str,
    ) -> Result<Vec<ClientBucket>, StoreError> {
        self.store.list_buckets_for_client(ctx, client_id)
    }

    pub fn close_bucket(
        &mut self,
        ctx: &OrgContext,
        bucket_id: &str,
    ) -> Result<ClientBucket, StoreError> {
        self.store.close_bucket(ctx, bucket_id)
    }

    pub fn bucket_utilization(
        &self,
        ctx: &OrgContext,
        bucket_id: &str,
    ) -> Result<BucketUtilization, StoreError> {
        let bucket = self.store.get_bucket(ctx, bucket_id)?;
        let utilization = utilization_pct(&bucket);
        Ok(BucketUtilization {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            bucket,
            utilization_pct: utilization,
        })
    }

    // --- ledger ---

    pub fn record_transaction(
        &mut self,
        ctx: &OrgContext,
        bucket_id: &str,
        request: RecordTransactionRequest,
    ) -> Result<TransactionReceipt, StoreError> {
        let ledger_request = TransactionRequest {
            kind: request.kind,
            amount_cents: request.amount_cents,
            description: request.description,
        };
        let outcome = self
            .store
            .apply_transaction_atomic(ctx, bucket_id, &ledger_request)?;

        let mut receipt = TransactionReceipt {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            transaction: outcome.transaction,
            new_balance_cents: outcome.new_balance_cents,
            requested_cents: outcome.requested_cents,
            applied_cents: outcome.applied_cents,
            capacity_effect: outcome.capacity_effect,
            alerts: outcome.alerts,
            overflow_transaction: None,
            overflow_error: None,
        };

        if let Some(CapacityEffect::Overflow {
            target_bucket_id,
            overflow_cents,
        }) = receipt.capacity_effect.clone()
        {
            let follow_up = TransactionRequest {
                kind: TransactionKind::Credit,
                amount_cents: overflow_cents,
                description: format!("overflow from {bucket_id}"),
            };
            match self
                .store
                .apply_transaction_atomic(ctx, &target_bucket_id, &follow_up)
            {
                Ok(overflow_outcome) => {
                    receipt.overflow_transaction = Some(overflow_outcome.transaction);
                }
                Err(err) => receipt.overflow_error = Some(err.to_api_error()),
            }
        }

        Ok(receipt)
    }

    pub fn list_transactions(
        &self,
        ctx: &OrgContext,
        bucket_id: &str,
    ) -> Result<Vec<LedgerTransaction>, StoreError> {
        self.store.list_transactions(ctx, bucket_id)
    }

    // --- agreements ---

    pub fn create_agreement(
        &mut self,
        ctx: &OrgContext,
        request: CreateAgreementRequest,
    ) -> Result<ServiceAgreement, StoreError> {
        let client = self.store.get_client(ctx, &request.client_id)?;
        let agreement_id = match request.agreement_id {
            Some(id) => id,
            None => self.store.allocate_id("service_agreements", "agreement")?,
        };
        let now = self.store.now()?;
        let agreement = ServiceAgreement {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            agreement_id,
            org_id: ctx.org_id.clone(),
            client_id: client.client_id,
            status: AgreementStatus::Draft,
            allocation_policy: request.allocation_policy,
            bucket_ids: Vec::new(),
            start_date: request.start_date,
            end_date: request.end_date,
            care_plan_reference: None,
            notes: None,
            created_at: now.clone(),
            updated_at: now,
        };
        self.store.insert_agreement(&agreement)?;
        Ok(agreement)
    }

    pub fn get_agreement(
        &self,
        ctx: &OrgContext,
        agreement_id: &str,
    ) -> Result<ServiceAgreement, StoreError> {
        self.store.get_agreement(ctx, agreement_id)
    }

    pub fn list_agreements_for_client(
        &self,
        ctx: &OrgContext,
        client_id: &str,
    ) -> Result<Vec<ServiceAgreement>, StoreError> {
        self.store.list_agreements_for_client(ctx, client_id)
    }

    /// Two-step save: required fields commit first, extended fields are
    /// attempted second and never roll the first step back.
    pub fn save_agreement(
        &mut self,
        ctx: &OrgContext,
        agreement_id: &str,
        request: SaveAgreementRequest,
    ) -> Result<AgreementSaveReport, StoreError> {
        let existing = self.store.get_agreement(ctx, agreement_id)?;
        let mut updated = existing;
        updated.allocation_policy = request.allocation_policy;
        updated.bucket_ids = request.bucket_ids;
        updated.start_date = request.start_date;
        updated.end_date = request.end_date;
        let agreement = self.store.update_agreement_core(ctx, &updated)?;

        match self.store.update_agreement_extended(
            ctx,
            agreement_id,
            request.care_plan_reference,
            request.notes,
        ) {
            Ok(saved) => Ok(AgreementSaveReport {
                schema_version: SCHEMA_VERSION_V1.to_string(),
                agreement: saved,
                extended_saved: true,
                extended_error: None,
            }),
            Err(err) => Ok(AgreementSaveReport {
                schema_version: SCHEMA_VERSION_V1.to_string(),
                agreement,
                extended_saved: false,
                extended_error: Some(err.to_api_error()),
            }),
        }
    }

    pub fn transition_agreement(
        &mut self,
        ctx: &OrgContext,
        agreement_id: &str,
        target: AgreementStatus,
    ) -> Result<ServiceAgreement, StoreError> {
        self.store
            .transition_agreement_status(ctx, agreement_id, target)
    }

    pub fn agreement_totals(
        &self,
        ctx: &OrgContext,
        agreement_id: &str,
    ) -> Result<AgreementTotals, StoreError> {
        let agreement = self.store.get_agreement(ctx, agreement_id)?;
        let buckets = self.store.buckets_for_agreement(ctx, agreement_id)?;
        Ok(ledger_core::agreement_totals(ctx, &agreement, &buckets)?)
    }

    // --- services catalog ---

    pub fn create_service(
        &mut self,
        ctx: &OrgContext,
        request: CreateServiceRequest,
    ) -> Result<ServiceItem, StoreError> {
        if request.unit_price_cents < 0 {
            return Err(StoreError::Validation {
                message: "unit price cannot be negative".to_string(),
            });
        }
        let service_id = match request.service_id {
            Some(id) => id,
            None => self.store.allocate_id("services", "service")?,
        };
        let now = self.store.now()?;
        let service = ServiceItem {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            service_id,
            org_id: ctx.org_id.clone(),
            name: request.name,
            code: request.code,
            unit_price_cents: request.unit_price_cents,
            status: ServiceStatus::Draft,
            created_at: now.clone(),
            updated_at: now,
        };
        self.store.insert_service(&service)?;
        Ok(service)
    }

    pub fn list_services(&self, ctx: &OrgContext) -> Result<Vec<ServiceItem>, StoreError> {
        self.store.list_services(ctx)
    }

    pub fn update_service(
        &mut self,
        ctx: &OrgContext,
        service_id: &str,
        request: UpdateServiceRequest,
    ) -> Result<ServiceItem, StoreError> {
        self.store.update_service(
            ctx,
            service_id,
            request.name,
            request.code,
            request.unit_price_cents,
        )
    }

    pub fn transition_service(
        &mut self,
        ctx: &OrgContext,
        service_id: &str,
        target: ServiceStatus,
    ) -> Result<ServiceItem, StoreError> {
        self.store.transition_service_status(ctx, service_id, target)
    }

    pub fn delete_service(
        &mut self,
        ctx: &OrgContext,
        service_id: &str,
    ) -> Result<(), StoreError> {
        self.store.delete_service(ctx, service_id)
    }
}

fn validate_characteristics(
    characteristics: &[Characteristic],
    category: BucketCategory,
) -> Result<(), StoreError> {
    for entry in characteristics {
        if !entry.kind.applies_to(category) {
            return Err(StoreError::NotApplicable {
                characteristic_id: entry.kind.id().to_string(),
                category,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{CharacteristicKind, ErrorCode, MaxCapacityAction};

    fn temp_db_path(name: &str) -> std::path::PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be monotonic")
            .as_nanos();

        std::env::temp_dir().join(format!("funding_ledger_{name}_{nanos}.sqlite"))
    }

    fn org() -> OrgContext {
        OrgContext::new("org:alpha")
    }

    fn active_client(api: &mut ProviderApi, ctx: &OrgContext) -> Client {
        let client = api
            .create_client(
                ctx,
                CreateClientRequest {
                    client_id: None,
                    name: "Edna Brown".to_string(),
                    date_of_birth: Some("1941-03-18".to_string()),
                    care_recipient_id: None,
                },
            )
            .expect("create client");
        api.transition_client(ctx, &client.client_id, ClientStatus::Active)
            .expect("activate client")
    }

    fn draw_down_bucket(
        api: &mut ProviderApi,
        ctx: &OrgContext,
        client_id: &str,
        allocated_cents: i64,
    ) -> ClientBucket {
        api.create_bucket(
            ctx,
            client_id,
            CreateBucketRequest {
                name: Some("Core supports".to_string()),
                category: Some(BucketCategory::DrawDown),
                funding_source: Some("HCP".to_string()),
                allocated_amount_cents: Some(allocated_cents),
                ..CreateBucketRequest::default()
            },
        )
        .expect("create bucket")
    }

    fn cleanup(path: &std::path::Path) {
        let _ = std::fs::remove_file(path);
        let _ = std::fs::remove_file(path.with_extension("sqlite-wal"));
        let _ = std::fs::remove_file(path.with_extension("sqlite-shm"));
    }

    #[test]
    fn end_to_end_draw_down_scenario_against_sqlite() {
        let db_path = temp_db_path("scenario");
        let ctx = org();
        let mut api = ProviderApi::open(&db_path).expect("open");

        let client = active_client(&mut api, &ctx);
        let bucket = draw_down_bucket(&mut api, &ctx, &client.client_id, 10_000);
        assert_eq!(bucket.current_balance_cents, 10_000);

        let receipt = api
            .record_transaction(
                &ctx,
                &bucket.bucket_id,
                RecordTransactionRequest {
                    kind: TransactionKind::Debit,
                    amount_cents: 4_000,
                    description: "personal care".to_string(),
                },
            )
            .expect("first debit");
        assert_eq!(receipt.new_balance_cents, 6_000);
        assert_eq!(receipt.transaction.balance_after_cents, 6_000);

        let err = api
            .record_transaction(
                &ctx,
                &bucket.bucket_id,
                RecordTransactionRequest {
                    kind: TransactionKind::Debit,
                    amount_cents: 7_000,
                    description: "equipment".to_string(),
                },
            )
            .expect_err("second debit overdraws");
        let api_error = err.to_api_error();
        assert_eq!(api_error.error_code, ErrorCode::InsufficientFunds);

        let after = api.get_bucket(&ctx, &bucket.bucket_id).expect("re-read");
        assert_eq!(after.current_balance_cents, 6_000);

        let transactions = api
            .list_transactions(&ctx, &bucket.bucket_id)
            .expect("list");
        assert_eq!(transactions.len(), 1);
        assert_eq!(transactions[0].balance_after_cents, 6_000);

        cleanup(&db_path);
    }

    #[test]
    fn concurrent_debits_never_both_succeed() {
        let db_path = temp_db_path("race");
        let ctx = org();
        let bucket_id = {
            let mut api = ProviderApi::open(&db_path).expect("open");
            let client = active_client(&mut api, &ctx);
            draw_down_bucket(&mut api, &ctx, &client.client_id, 100).bucket_id
        };

        let handles: Vec<_> = (0..2)
            .map(|worker| {
                let db_path = db_path.clone();
                let bucket_id = bucket_id.clone();
                std::thread::spawn(move || {
                    let ctx = OrgContext::new("org:alpha");
                    let mut api = ProviderApi::open(&db_path).expect("open worker store");
                    api.record_transaction(
                        &ctx,
                        &bucket_id,
                        RecordTransactionRequest {
                            kind: TransactionKind::Debit,
                            amount_cents: 70,
                            description: format!("worker {worker}"),
                        },
                    )
                })
            })
            .collect();

        let results: Vec<_> = handles
            .into_iter()
            .map(|handle| handle.join().expect("worker thread"))
            .collect();
        let successes = results.iter().filter(|result| result.is_ok()).count();
        assert_eq!(successes, 1, "exactly one of two conflicting debits wins");

        let api = ProviderApi::open(&db_path).expect("reopen");
        let bucket = api.get_bucket(&ctx, &bucket_id).expect("bucket");
        assert_eq!(bucket.current_balance_cents, 30);
        assert!(bucket.current_balance_cents >= 0);

        let transactions = api.list_transactions(&ctx, &bucket_id).expect("ledger");
        assert_eq!(transactions.len(), 1);

        cleanup(&db_path);
    }

    #[test]
    fn cross_org_reads_are_not_found() {
        let db_path = temp_db_path("tenancy");
        let ctx = org();
        let mut api = ProviderApi::open(&db_path).expect("open");
        let client = active_client(&mut api, &ctx);
        let bucket = draw_down_bucket(&mut api, &ctx, &client.client_id, 5_000);

        let other = OrgContext::new("org:beta");
        let err = api
            .get_bucket(&other, &bucket.bucket_id)
            .expect_err("cross-tenant read");
        assert!(matches!(err, StoreError::NotFound { .. }));

        let err = api
            .record_transaction(
                &other,
                &bucket.bucket_id,
                RecordTransactionRequest {
                    kind: TransactionKind::Debit,
                    amount_cents: 100,
                    description: "cross-tenant debit".to_string(),
                },
            )
            .expect_err("cross-tenant write");
        assert!(matches!(err, StoreError::NotFound { .. }));

        cleanup(&db_path);
    }

    #[test]
    fn agreement_save_commits_core_fields_when_extended_fields_fail() {
        let db_path = temp_db_path("best_effort");
        let ctx = org();
        let mut api = ProviderApi::open(&db_path).expect("open");
        let client = active_client(&mut api, &ctx);

        let agreement = api
            .create_agreement(
                &ctx,
                CreateAgreementRequest {
                    agreement_id: None,
                    client_id: client.client_id.clone(),
                    allocation_policy: AllocationPolicy::SumOfBuckets,
                    start_date: None,
                    end_date: None,
                },
            )
            .expect("create agreement");

        let report = api
            .save_agreement(
                &ctx,
                &agreement.agreement_id,
                SaveAgreementRequest {
                    allocation_policy: AllocationPolicy::FixedAllocation {
                        total_value_cents: 50_000,
                    },
                    bucket_ids: Vec::new(),
                    start_date: Some("2026-07-01".to_string()),
                    end_date: None,
                    care_plan_reference: None,
                    notes: Some("x".repeat(5_000)),
                },
            )
            .expect("save reports, does not fail");

        assert!(!report.extended_saved);
        assert!(report.extended_error.is_some());

        let reread = api
            .get_agreement(&ctx, &agreement.agreement_id)
            .expect("re-read");
        assert_eq!(
            reread.allocation_policy,
            AllocationPolicy::FixedAllocation {
                total_value_cents: 50_000
            }
        );
        assert_eq!(reread.notes, None);

        cleanup(&db_path);
    }

    #[test]
    fn draft_agreement_activation_requires_active_client() {
        let db_path = temp_db_path("activation");
        let ctx = org();
        let mut api = ProviderApi::open(&db_path).expect("open");

        let client = api
            .create_client(
                &ctx,
                CreateClientRequest {
                    client_id: None,
                    name: "Harold Nguyen".to_string(),
                    date_of_birth: None,
                    care_recipient_id: None,
                },
            )
            .expect("create client");

        let agreement = api
            .create_agreement(
                &ctx,
                CreateAgreementRequest {
                    agreement_id: None,
                    client_id: client.client_id.clone(),
                    allocation_policy: AllocationPolicy::SumOfBuckets,
                    start_date: None,
                    end_date: None,
                },
            )
            .expect("create agreement");

        let err = api
            .transition_agreement(&ctx, &agreement.agreement_id, AgreementStatus::Active)
            .expect_err("prospect client blocks activation");
        assert_eq!(
            err.to_api_error().error_code,
            ErrorCode::StatusPreconditionFailed
        );

        let reread = api
            .get_agreement(&ctx, &agreement.agreement_id)
            .expect("re-read");
        assert_eq!(reread.status, AgreementStatus::Draft);

        cleanup(&db_path);
    }

    #[test]
    fn overflow_capacity_action_credits_the_target_bucket() {
        let db_path = temp_db_path("overflow");
        let ctx = org();
        let mut api = ProviderApi::open(&db_path).expect("open");
        let client = active_client(&mut api, &ctx);

        let target = api
            .create_bucket(
                &ctx,
                &client.client_id,
                CreateBucketRequest {
                    name: Some("Overflow box".to_string()),
                    category: Some(BucketCategory::FillUp),
                    funding_source: Some("CHSP".to_string()),
                    ..CreateBucketRequest::default()
                },
            )
            .expect("create target bucket");

        let source = api
            .create_bucket(
                &ctx,
                &client.client_id,
                CreateBucketRequest {
                    name: Some("Capped box".to_string()),
                    category: Some(BucketCategory::FillUp),
                    funding_source: Some("CHSP".to_string()),
                    characteristics: Some(vec![Characteristic::enabled(
                        CharacteristicKind::CapacityCap {
                            capacity_cents: 1_000,
                            action: MaxCapacityAction::Overflow {
                                target_bucket_id: target.bucket_id.clone(),
                            },
                        },
                    )]),
                    ..CreateBucketRequest::default()
                },
            )
            .expect("create capped bucket");

        let receipt = api
            .record_transaction(
                &ctx,
                &source.bucket_id,
                RecordTransactionRequest {
                    kind: TransactionKind::ServiceDelivery,
                    amount_cents: 1_300,
                    description: "respite care".to_string(),
                },
            )
            .expect("record with overflow");

        assert_eq!(receipt.applied_cents, 1_000);
        assert!(receipt.overflow_error.is_none());
        let overflow = receipt
            .overflow_transaction
            .expect("overflow transaction recorded");
        assert_eq!(overflow.amount_cents, 300);

        let target_after = api.get_bucket(&ctx, &target.bucket_id).expect("target");
        assert_eq!(target_after.current_balance_cents, 300);

        cleanup(&db_path);
    }

    #[test]
    fn referenced_template_cannot_be_deleted() {
        let db_path = temp_db_path("template");
        let ctx = org();
        let mut api = ProviderApi::open(&db_path).expect("open");
        let client = active_client(&mut api, &ctx);

        let template = api
            .create_template(
                &ctx,
                CreateTemplateRequest {
                    template_id: None,
                    name: "HCP level 2".to_string(),
                    category: BucketCategory::DrawDown,
                    funding_source: "HCP".to_string(),
                    allocated_amount_cents: 18_000_00,
                    characteristics: vec![Characteristic::enabled(
                        CharacteristicKind::LowBalanceWarning {
                            thresholds_pct: vec![75, 90],
                        },
                    )],
                },
            )
            .expect("create template");

        api.create_bucket(
            &ctx,
            &client.client_id,
            CreateBucketRequest {
                template_id: Some(template.template_id.clone()),
                ..CreateBucketRequest::default()
            },
        )
        .expect("instantiate bucket from template");

        let err = api
            .delete_template(&ctx, &template.template_id)
            .expect_err("referenced template is protected");
        assert_eq!(err.to_api_error().error_code, ErrorCode::TemplateInUse);

        let toggled = api
            .toggle_characteristic(&ctx, &template.template_id, 0)
            .expect("characteristic toggles stay allowed");
        assert!(!toggled.characteristics[0].enabled);

        cleanup(&db_path);
    }

    #[test]
    fn mismatched_characteristic_is_rejected_at_creation() {
        let db_path = temp_db_path("applicability");
        let ctx = org();
        let mut api = ProviderApi::open(&db_path).expect("open");

        let err = api
            .create_template(
                &ctx,
                CreateTemplateRequest {
                    template_id: None,
                    name: "Bad template".to_string(),
                    category: BucketCategory::FillUp,
                    funding_source: "CHSP".to_string(),
                    allocated_amount_cents: 0,
                    characteristics: vec![Characteristic::enabled(
                        CharacteristicKind::AllowOverdraft {
                            overdraft_limit_cents: 100,
                        },
                    )],
                },
            )
            .expect_err("draw-down characteristic on a fill-up template");
        assert_eq!(
            err.to_api_error().error_code,
            ErrorCode::CharacteristicNotApplicable
        );

        cleanup(&db_path);
    }
}
