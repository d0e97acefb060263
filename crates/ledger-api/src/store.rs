//! SQLite persistence for the funding ledger. Every query is scoped to the
//! caller's organization; a row under another org reads as not found. The
//! balance mutation path runs as one immediate transaction: re-read,
//! re-validate, conditionally update, insert the ledger row, commit.

use std::fmt;
use std::path::Path;

use contracts::{
    AgreementStatus, ApiError, BucketCategory, BucketStatus, BucketTemplate, Client,
    ClientBucket, ClientStatus, ErrorCode, LedgerTransaction, OrgContext, ServiceAgreement,
    ServiceItem, ServiceStatus,
};
use ledger_core::{
    apply_transaction, lifecycle, AggregatorError, LedgerError, LedgerOutcome,
    TransactionRequest, TransitionError,
};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

#[derive(Debug)]
pub enum StoreError {
    Sqlite(rusqlite::Error),
    Serde(serde_json::Error),
    NotFound {
        entity: &'static str,
        id: String,
    },
    /// A concurrent writer changed the bucket between our read and write.
    Conflict {
        detail: String,
    },
    Ledger(LedgerError),
    Transition(TransitionError),
    Aggregator(AggregatorError),
    Validation {
        message: String,
    },
    /// A status precondition on a referenced entity does not hold.
    PreconditionFailed {
        message: String,
    },
    NotApplicable {
        characteristic_id: String,
        category: BucketCategory,
    },
    TemplateInUse {
        template_id: String,
    },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "sqlite error: {err}"),
            Self::Serde(err) => write!(f, "serde error: {err}"),
            Self::NotFound { entity, id } => write!(f, "{entity} {id} not found"),
            Self::Conflict { detail } => write!(f, "conflict: {detail}"),
            Self::Ledger(err) => write!(f, "{err}"),
            Self::Transition(err) => write!(f, "{err}"),
            Self::Aggregator(err) => write!(f, "{err}"),
            Self::Validation { message } => write!(f, "{message}"),
            Self::PreconditionFailed { message } => write!(f, "{message}"),
            Self::NotApplicable {
                characteristic_id,
                category,
            } => write!(
                f,
                "characteristic {characteristic_id} is not applicable to {} buckets",
                category.as_str()
            ),
            Self::TemplateInUse { template_id } => {
                write!(f, "template {template_id} is referenced by live buckets")
            }
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serde(value)
    }
}

impl From<LedgerError> for StoreError {
    fn from(value: LedgerError) -> Self {
        Self::Ledger(value)
    }
}

impl From<TransitionError> for StoreError {
    fn from(value: TransitionError) -> Self {
        Self::Transition(value)
    }
}

impl From<AggregatorError> for StoreError {
    fn from(value: AggregatorError) -> Self {
        Self::Aggregator(value)
    }
}

impl StoreError {
    pub fn to_api_error(&self) -> ApiError {
        match self {
            Self::Sqlite(err) => ApiError::new(
                ErrorCode::StoreError,
                "datastore failure",
                Some(err.to_string()),
            ),
            Self::Serde(err) => ApiError::new(
                ErrorCode::StoreError,
                "payload decode failure",
                Some(err.to_string()),
            ),
            Self::NotFound { entity, id } => ApiError::new(
                ErrorCode::NotFound,
                format!("{entity} not found"),
                Some(format!("id={id}")),
            ),
            Self::Conflict { detail } => {
                ApiError::new(ErrorCode::Conflict, "concurrent update", Some(detail.clone()))
            }
            Self::Ledger(err) => err.to_api_error(),
            Self::Transition(err) => err.to_api_error(),
            Self::Aggregator(err) => err.to_api_error(),
            Self::Validation { message } => {
                ApiError::new(ErrorCode::ValidationFailed, message.clone(), None)
            }
            Self::PreconditionFailed { message } => {
                ApiError::new(ErrorCode::StatusPreconditionFailed, message.clone(), None)
            }
            Self::NotApplicable { .. } => {
                ApiError::new(ErrorCode::CharacteristicNotApplicable, self.to_string(), None)
            }
            Self::TemplateInUse { .. } => {
                ApiError::new(ErrorCode::TemplateInUse, self.to_string(), None)
            }
        }
    }
}

#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let mut store = Self { conn };
        store.configure()?;
        store.migrate()?;
        Ok(store)
    }

    fn configure(&mut self) -> Result<(), StoreError> {
        self.conn.pragma_update(None, "busy_timeout", 5_000)?;
        self.conn.pragma_update(None, "journal_mode", "WAL")?;
        self.conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(())
    }

    fn migrate(&mut self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS id_counters (
                scope TEXT PRIMARY KEY,
                next_value INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS clients (
                org_id TEXT NOT NULL,
                client_id TEXT NOT NULL,
                status TEXT NOT NULL,
                payload_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (org_id, client_id)
            );

            CREATE TABLE IF NOT EXISTS bucket_templates (
                org_id TEXT NOT NULL,
                template_id TEXT NOT NULL,
                payload_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (org_id, template_id)
            );

            CREATE TABLE IF NOT EXISTS client_buckets (
                org_id TEXT NOT NULL,
                bucket_id TEXT NOT NULL,
                client_id TEXT NOT NULL,
                agreement_id TEXT,
                template_id TEXT,
                category TEXT NOT NULL,
                status TEXT NOT NULL,
                current_balance_cents INTEGER NOT NULL,
                payload_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (org_id, bucket_id)
            );

            CREATE TABLE IF NOT EXISTS transactions (
                org_id TEXT NOT NULL,
                transaction_id TEXT NOT NULL,
                bucket_id TEXT NOT NULL,
                client_id TEXT NOT NULL,
                agreement_id TEXT,
                kind TEXT NOT NULL,
                amount_cents INTEGER NOT NULL,
                balance_after_cents INTEGER NOT NULL,
                sequence INTEGER NOT NULL,
                payload_json TEXT NOT NULL,
                recorded_at TEXT NOT NULL,
                PRIMARY KEY (org_id, transaction_id),
                UNIQUE (org_id, bucket_id, sequence)
            );

            CREATE TABLE IF NOT EXISTS service_agreements (
                org_id TEXT NOT NULL,
                agreement_id TEXT NOT NULL,
                client_id TEXT NOT NULL,
                status TEXT NOT NULL,
                payload_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (org_id, agreement_id)
            );

            CREATE TABLE IF NOT EXISTS agreement_buckets (
                org_id TEXT NOT NULL,
                agreement_id TEXT NOT NULL,
                bucket_id TEXT NOT NULL,
                PRIMARY KEY (org_id, agreement_id, bucket_id)
            );

            CREATE TABLE IF NOT EXISTS services (
                org_id TEXT NOT NULL,
                service_id TEXT NOT NULL,
                status TEXT NOT NULL,
                payload_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (org_id, service_id)
            );

            CREATE INDEX IF NOT EXISTS idx_buckets_org_client
                ON client_buckets(org_id, client_id);
            CREATE INDEX IF NOT EXISTS idx_buckets_org_template
                ON client_buckets(org_id, template_id);
            CREATE INDEX IF NOT EXISTS idx_transactions_org_bucket_seq
                ON transactions(org_id, bucket_id, sequence);
            CREATE INDEX IF NOT EXISTS idx_agreements_org_client
                ON service_agreements(org_id, client_id);
            ",
        )?;

        self.conn.execute(
            "INSERT OR IGNORE INTO schema_migrations(version, name, applied_at)
             VALUES(1, 'initial_v1', strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))",
            [],
        )?;

        Ok(())
    }

    pub fn now(&self) -> Result<String, StoreError> {
        let stamp = self.conn.query_row(
            "SELECT strftime('%Y-%m-%dT%H:%M:%SZ', 'now')",
            [],
            |row| row.get::<_, String>(0),
        )?;
        Ok(stamp)
    }

    /// Allocates the next id for a scope, e.g. `client:000007`.
    pub fn allocate_id(&mut self, scope: &str, prefix: &str) -> Result<String, StoreError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO id_counters(scope, next_value) VALUES(?1, 1)
             ON CONFLICT(scope) DO UPDATE SET next_value = next_value + 1",
            params![scope],
        )?;
        let value: i64 = tx.query_row(
            "SELECT next_value FROM id_counters WHERE scope = ?1",
            params![scope],
            |row| row.get(0),
        )?;
        tx.commit()?;
        Ok(format!("{prefix}:{value:06}"))
    }

    // --- clients ---

    pub fn insert_client(&mut self, client: &Client) -> Result<(), StoreError> {
        let payload = serde_json::to_string(client)?;
        self.conn.execute(
            "INSERT INTO clients (org_id, client_id, status, payload_json, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                client.org_id.as_str(),
                client.client_id.as_str(),
                client.status.as_str(),
                payload,
                client.created_at.as_str(),
                client.updated_at.as_str(),
            ],
        )?;
        Ok(())
    }

    pub fn get_client(&self, ctx: &OrgContext, client_id: &str) -> Result<Client, StoreError> {
        read_client(&self.conn, ctx, client_id)
    }

    pub fn list_clients(&self, ctx: &OrgContext) -> Result<Vec<Client>, StoreError> {
        list_payloads(
            &self.conn,
            "SELECT payload_json FROM clients WHERE org_id = ?1 ORDER BY client_id",
            ctx,
        )
    }

    pub fn transition_client_status(
        &mut self,
        ctx: &OrgContext,
        client_id: &str,
        target: ClientStatus,
    ) -> Result<Client, StoreError> {
        let tx = self.conn.transaction()?;
        let mut client = read_client(&tx, ctx, client_id)?;
        lifecycle::transition_client(client_id, client.status, target)?;
        client.status = target;
        client.updated_at = tx.query_row(
            "SELECT strftime('%Y-%m-%dT%H:%M:%SZ', 'now')",
            [],
            |row| row.get::<_, String>(0),
        )?;
        write_client(&tx, &client)?;
        tx.commit()?;
        Ok(client)
    }

    // --- bucket templates ---

    pub fn insert_template(&mut self, template: &BucketTemplate) -> Result<(), StoreError> {
        let payload = serde_json::to_string(template)?;
        self.conn.execute(
            "INSERT INTO bucket_templates
                (org_id, template_id, payload_json, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                template.org_id.as_str(),
                template.template_id.as_str(),
                payload,
                template.created_at.as_str(),
                template.updated_at.as_str(),
            ],
        )?;
        Ok(())
    }

    pub fn get_template(
        &self,
        ctx: &OrgContext,
        template_id: &str,
    ) -> Result<BucketTemplate, StoreError> {
        let payload: Option<String> = self
            .conn
            .query_row(
                "SELECT payload_json FROM bucket_templates
                 WHERE org_id = ?1 AND template_id = ?2",
                params![ctx.org_id.as_str(), template_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(raw) = payload else {
            return Err(StoreError::NotFound {
                entity: "template",
                id: template_id.to_string(),
            });
        };
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn list_templates(&self, ctx: &OrgContext) -> Result<Vec<BucketTemplate>, StoreError> {
        list_payloads(
            &self.conn,
            "SELECT payload_json FROM bucket_templates WHERE org_id = ?1 ORDER BY template_id",
            ctx,
        )
    }

    pub fn template_in_use(&self, ctx: &OrgContext, template_id: &str) -> Result<bool, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM client_buckets WHERE org_id = ?1 AND template_id = ?2",
            params![ctx.org_id.as_str(), template_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// The only permitted mutation of a referenced template.
    pub fn toggle_characteristic(
        &mut self,
        ctx: &OrgContext,
        template_id: &str,
        index: usize,
    ) -> Result<BucketTemplate, StoreError> {
        let tx = self.conn.transaction()?;
        let payload: Option<String> = tx
            .query_row(
                "SELECT payload_json FROM bucket_templates
                 WHERE org_id = ?1 AND template_id = ?2",
                params![ctx.org_id.as_str(), template_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(raw) = payload else {
            return Err(StoreError::NotFound {
                entity: "template",
                id: template_id.to_string(),
            });
        };
        let mut template: BucketTemplate = serde_json::from_str(&raw)?;
        let Some(entry) = template.characteristics.get_mut(index) else {
            return Err(StoreError::Validation {
                message: format!(
                    "template {template_id} has no characteristic at index {index}"
                ),
            });
        };
        entry.enabled = !entry.enabled;
        template.updated_at = tx.query_row(
            "SELECT strftime('%Y-%m-%dT%H:%M:%SZ', 'now')",
            [],
            |row| row.get::<_, String>(0),
        )?;

        let updated = serde_json::to_string(&template)?;
        tx.execute(
            "UPDATE bucket_templates SET payload_json = ?1, updated_at = ?2
             WHERE org_id = ?3 AND template_id = ?4",
            params![
                updated,
                template.updated_at.as_str(),
                ctx.org_id.as_str(),
                template_id
            ],
        )?;
        tx.commit()?;
        Ok(template)
    }

    pub fn delete_template(&mut self, ctx: &OrgContext, template_id: &str) -> Result<(), StoreError> {
        if self.template_in_use(ctx, template_id)? {
            return Err(StoreError::TemplateInUse {
                template_id: template_id.to_string(),
            });
        }
        let deleted = self.conn.execute(
            "DELETE FROM bucket_templates WHERE org_id = ?1 AND template_id = ?2",
            params![ctx.org_id.as_str(), template_id],
        )?;
        if deleted == 0 {
            return Err(StoreError::NotFound {
                entity: "template",
                id: template_id.to_string(),
            });
        }
        Ok(())
    }

    // --- client buckets ---

    pub fn insert_bucket(&mut self, bucket: &ClientBucket) -> Result<(), StoreError> {
        let payload = serde_json::to_string(bucket)?;
        self.conn.execute(
            "INSERT INTO client_buckets
                (org_id, bucket_id, client_id, agreement_id, template_id, category, status,
                 current_balance_cents, payload_json, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                bucket.org_id.as_str(),
                bucket.bucket_id.as_str(),
                bucket.client_id.as_str(),
                bucket.agreement_id.as_deref(),
                bucket.template_id.as_deref(),
                bucket.category.as_str(),
                bucket.status.as_str(),
                bucket.current_balance_cents,
                payload,
                bucket.created_at.as_str(),
                bucket.updated_at.as_str(),
            ],
        )?;
        Ok(())
    }

    pub fn get_bucket(&self, ctx: &OrgContext, bucket_id: &str) -> Result<ClientBucket, StoreError> {
        read_bucket(&self.conn, ctx, bucket_id)
    }

    pub fn list_buckets_for_client(
        &self,
        ctx: &OrgContext,
        client_id: &str,
    ) -> Result<Vec<ClientBucket>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT payload_json, current_balance_cents FROM client_buckets
             WHERE org_id = ?1 AND client_id = ?2
             ORDER BY bucket_id",
        )?;
        let rows = stmt.query_map(params![ctx.org_id.as_str(), client_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        collect_buckets(rows)
    }

    pub fn buckets_for_agreement(
        &self,
        ctx: &OrgContext,
        agreement_id: &str,
    ) -> Result<Vec<ClientBucket>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT b.payload_json, b.current_balance_cents
             FROM client_buckets b
             JOIN agreement_buckets ab
               ON ab.org_id = b.org_id AND ab.bucket_id = b.bucket_id
             WHERE b.org_id = ?1 AND ab.agreement_id = ?2
             ORDER BY b.bucket_id",
        )?;
        let rows = stmt.query_map(params![ctx.org_id.as_str(), agreement_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        collect_buckets(rows)
    }

    /// Soft close; transactions keep referencing the bucket forever.
    pub fn close_bucket(
        &mut self,
        ctx: &OrgContext,
        bucket_id: &str,
    ) -> Result<ClientBucket, StoreError> {
        let tx = self.conn.transaction()?;
        let mut bucket = read_bucket(&tx, ctx, bucket_id)?;
        bucket.status = BucketStatus::Closed;
        bucket.updated_at = tx.query_row(
            "SELECT strftime('%Y-%m-%dT%H:%M:%SZ', 'now')",
            [],
            |row| row.get::<_, String>(0),
        )?;
        let payload = serde_json::to_string(&bucket)?;
        tx.execute(
            "UPDATE client_buckets SET status = ?1, payload_json = ?2, updated_at = ?3
             WHERE org_id = ?4 AND bucket_id = ?5",
            params![
                bucket.status.as_str(),
                payload,
                bucket.updated_at.as_str(),
                ctx.org_id.as_str(),
                bucket_id
            ],
        )?;
        tx.commit()?;
        Ok(bucket)
    }

    // --- ledger ---

    /// The single write path for balances. Runs as one immediate SQLite
    /// transaction: re-read the bucket and its owners, re-run the ledger
    /// validation against the persisted balance, then write the new balance
    /// with a conditional update guarded on the balance observed in this
    /// transaction, and append the ledger row. Zero affected rows means a
    /// concurrent writer won and the whole unit rolls back as a conflict.
    pub fn apply_transaction_atomic(
        &mut self,
        ctx: &OrgContext,
        bucket_id: &str,
        request: &TransactionRequest,
    ) -> Result<LedgerOutcome, StoreError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let bucket = read_bucket(&tx, ctx, bucket_id)?;
        let observed_balance = bucket.current_balance_cents;
        let client = read_client(&tx, ctx, &bucket.client_id)?;
        let agreement = match bucket.agreement_id.as_deref() {
            Some(agreement_id) => Some((
                agreement_id.to_string(),
                read_agreement(&tx, ctx, agreement_id)?.status,
            )),
            None => None,
        };

        let sequence: u64 = tx
            .query_row(
                "SELECT COALESCE(MAX(sequence), 0) + 1 FROM transactions
                 WHERE org_id = ?1 AND bucket_id = ?2",
                params![ctx.org_id.as_str(), bucket_id],
                |row| row.get::<_, i64>(0),
            )?
            .try_into()
            .unwrap_or(u64::MAX);
        let recorded_at = tx.query_row(
            "SELECT strftime('%Y-%m-%dT%H:%M:%SZ', 'now')",
            [],
            |row| row.get::<_, String>(0),
        )?;

        let outcome = apply_transaction(
            ctx,
            &bucket,
            client.status,
            agreement
                .as_ref()
                .map(|(agreement_id, status)| (agreement_id.as_str(), *status)),
            request,
            &recorded_at,
            sequence,
        )?;

        let mut updated_bucket = bucket.clone();
        updated_bucket.current_balance_cents = outcome.new_balance_cents;
        updated_bucket.updated_at = recorded_at.clone();
        let payload = serde_json::to_string(&updated_bucket)?;

        let affected = tx.execute(
            "UPDATE client_buckets
             SET current_balance_cents = ?1, payload_json = ?2, updated_at = ?3
             WHERE org_id = ?4 AND bucket_id = ?5 AND current_balance_cents = ?6",
            params![
                outcome.new_balance_cents,
                payload,
                recorded_at,
                ctx.org_id.as_str(),
                bucket_id,
                observed_balance,
            ],
        )?;
        if affected != 1 {
            return Err(StoreError::Conflict {
                detail: format!("bucket {bucket_id} balance changed concurrently"),
            });
        }

        insert_transaction(&tx, &outcome.transaction)?;
        tx.commit()?;
        Ok(outcome)
    }

    pub fn list_transactions(
        &self,
        ctx: &OrgContext,
        bucket_id: &str,
    ) -> Result<Vec<LedgerTransaction>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT payload_json FROM transactions
             WHERE org_id = ?1 AND bucket_id = ?2
             ORDER BY sequence ASC",
        )?;
        let rows = stmt.query_map(params![ctx.org_id.as_str(), bucket_id], |row| {
            row.get::<_, String>(0)
        })?;

        let mut transactions = Vec::new();
        for row in rows {
            transactions.push(serde_json::from_str(&row?)?);
        }
        Ok(transactions)
    }

    // --- service agreements ---

    pub fn insert_agreement(&mut self, agreement: &ServiceAgreement) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        write_agreement(&tx, agreement, true)?;
        tx.commit()?;
        Ok(())
    }

    pub fn get_agreement(
        &self,
        ctx: &OrgContext,
        agreement_id: &str,
    ) -> Result<ServiceAgreement, StoreError> {
        read_agreement(&self.conn, ctx, agreement_id)
    }

    pub fn list_agreements_for_client(
        &self,
        ctx: &OrgContext,
        client_id: &str,
    ) -> Result<Vec<ServiceAgreement>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT payload_json FROM service_agreements
             WHERE org_id = ?1 AND client_id = ?2
             ORDER BY agreement_id",
        )?;
        let rows = stmt.query_map(params![ctx.org_id.as_str(), client_id], |row| {
            row.get::<_, String>(0)
        })?;
        let mut agreements = Vec::new();
        for row in rows {
            agreements.push(serde_json::from_str(&row?)?);
        }
        Ok(agreements)
    }

    /// Commits the agreement's required fields. Draft-only; bucket links are
    /// rewritten to match and each linked bucket is stamped with the
    /// agreement id.
    pub fn update_agreement_core(
        &mut self,
        ctx: &OrgContext,
        updated: &ServiceAgreement,
    ) -> Result<ServiceAgreement, StoreError> {
        let tx = self.conn.transaction()?;
        let existing = read_agreement(&tx, ctx, &updated.agreement_id)?;
        lifecycle::ensure_agreement_editable(&existing.agreement_id, existing.status)?;

        // Buckets dropped from the draft lose their agreement link.
        for bucket_id in &existing.bucket_ids {
            if updated.bucket_ids.contains(bucket_id) {
                continue;
            }
            let mut bucket = read_bucket(&tx, ctx, bucket_id)?;
            bucket.agreement_id = None;
            let payload = serde_json::to_string(&bucket)?;
            tx.execute(
                "UPDATE client_buckets SET agreement_id = NULL, payload_json = ?1
                 WHERE org_id = ?2 AND bucket_id = ?3",
                params![payload, ctx.org_id.as_str(), bucket_id],
            )?;
        }

        for bucket_id in &updated.bucket_ids {
            let mut bucket = read_bucket(&tx, ctx, bucket_id)?;
            if bucket.client_id != updated.client_id {
                return Err(StoreError::Validation {
                    message: format!(
                        "bucket {bucket_id} belongs to client {}, not {}",
                        bucket.client_id, updated.client_id
                    ),
                });
            }
            if let Some(other) = bucket
                .agreement_id
                .as_deref()
                .filter(|id| *id != updated.agreement_id)
            {
                return Err(StoreError::Validation {
                    message: format!("bucket {bucket_id} is already attached to {other}"),
                });
            }
            if bucket.agreement_id.is_none() {
                bucket.agreement_id = Some(updated.agreement_id.clone());
                let payload = serde_json::to_string(&bucket)?;
                tx.execute(
                    "UPDATE client_buckets SET agreement_id = ?1, payload_json = ?2
                     WHERE org_id = ?3 AND bucket_id = ?4",
                    params![
                        updated.agreement_id.as_str(),
                        payload,
                        ctx.org_id.as_str(),
                        bucket_id
                    ],
                )?;
            }
        }

        let mut record = updated.clone();
        // Extended fields are written by the separate best-effort step.
        record.care_plan_reference = existing.care_plan_reference;
        record.notes = existing.notes;
        record.status = existing.status;
        record.created_at = existing.created_at;
        record.updated_at = tx.query_row(
            "SELECT strftime('%Y-%m-%dT%H:%M:%SZ', 'now')",
            [],
            |row| row.get::<_, String>(0),
        )?;
        write_agreement(&tx, &record, false)?;
        tx.commit()?;
        Ok(record)
    }

    /// Adds one bucket to a draft agreement's box list.
    pub fn attach_bucket_to_agreement(
        &mut self,
        ctx: &OrgContext,
        agreement_id: &str,
        bucket_id: &str,
    ) -> Result<ServiceAgreement, StoreError> {
        let tx = self.conn.transaction()?;
        let mut agreement = read_agreement(&tx, ctx, agreement_id)?;
        lifecycle::ensure_agreement_editable(agreement_id, agreement.status)?;
        if !agreement.bucket_ids.iter().any(|id| id == bucket_id) {
            agreement.bucket_ids.push(bucket_id.to_string());
        }
        agreement.updated_at = tx.query_row(
            "SELECT strftime('%Y-%m-%dT%H:%M:%SZ', 'now')",
            [],
            |row| row.get::<_, String>(0),
        )?;
        write_agreement(&tx, &agreement, false)?;
        tx.commit()?;
        Ok(agreement)
    }

    /// The second, optional half of an agreement save. Intentionally a
    /// separate write: its failure is reported to the caller and never rolls
    /// back the committed required fields.
    pub fn update_agreement_extended(
        &mut self,
        ctx: &OrgContext,
        agreement_id: &str,
        care_plan_reference: Option<String>,
        notes: Option<String>,
    ) -> Result<ServiceAgreement, StoreError> {
        if let Some(reference) = care_plan_reference.as_deref() {
            if reference.len() > 256 {
                return Err(StoreError::Validation {
                    message: "care_plan_reference exceeds 256 characters".to_string(),
                });
            }
        }
        if let Some(text) = notes.as_deref() {
            if text.len() > 4_000 {
                return Err(StoreError::Validation {
                    message: "notes exceed 4000 characters".to_string(),
                });
            }
        }

        let tx = self.conn.transaction()?;
        let mut agreement = read_agreement(&tx, ctx, agreement_id)?;
        agreement.care_plan_reference = care_plan_reference;
        agreement.notes = notes;
        agreement.updated_at = tx.query_row(
            "SELECT strftime('%Y-%m-%dT%H:%M:%SZ', 'now')",
            [],
            |row| row.get::<_, String>(0),
        )?;
        write_agreement(&tx, &agreement, false)?;
        tx.commit()?;
        Ok(agreement)
    }

    /// Activation re-reads the owning client inside the same transaction, so
    /// the precondition is evaluated against current state.
    pub fn transition_agreement_status(
        &mut self,
        ctx: &OrgContext,
        agreement_id: &str,
        target: AgreementStatus,
    ) -> Result<ServiceAgreement, StoreError> {
        let tx = self.conn.transaction()?;
        let mut agreement = read_agreement(&tx, ctx, agreement_id)?;
        let client = read_client(&tx, ctx, &agreement.client_id)?;
        lifecycle::transition_agreement(
            agreement_id,
            &agreement.client_id,
            agreement.status,
            target,
            client.status,
        )?;
        agreement.status = target;
        agreement.updated_at = tx.query_row(
            "SELECT strftime('%Y-%m-%dT%H:%M:%SZ', 'now')",
            [],
            |row| row.get::<_, String>(0),
        )?;
        write_agreement(&tx, &agreement, false)?;
        tx.commit()?;
        Ok(agreement)
    }

    // --- services catalog ---

    pub fn insert_service(&mut self, service: &ServiceItem) -> Result<(), StoreError> {
        let payload = serde_json::to_string(service)?;
        self.conn.execute(
            "INSERT INTO services (org_id, service_id, status, payload_json, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                service.org_id.as_str(),
                service.service_id.as_str(),
                service.status.as_str(),
                payload,
                service.created_at.as_str(),
                service.updated_at.as_str(),
            ],
        )?;
        Ok(())
    }

    pub fn get_service(&self, ctx: &OrgContext, service_id: &str) -> Result<ServiceItem, StoreError> {
        read_service(&self.conn, ctx, service_id)
    }

    pub fn list_services(&self, ctx: &OrgContext) -> Result<Vec<ServiceItem>, StoreError> {
        list_payloads(
            &self.conn,
            "SELECT payload_json FROM services WHERE org_id = ?1 ORDER BY service_id",
            ctx,
        )
    }

    pub fn update_service(
        &mut self,
        ctx: &OrgContext,
        service_id: &str,
        name: String,
        code: String,
        unit_price_cents: i64,
    ) -> Result<ServiceItem, StoreError> {
        let tx = self.conn.transaction()?;
        let mut service = read_service(&tx, ctx, service_id)?;
        service.name = name;
        service.code = code;
        service.unit_price_cents = unit_price_cents;
        service.updated_at = tx.query_row(
            "SELECT strftime('%Y-%m-%dT%H:%M:%SZ', 'now')",
            [],
            |row| row.get::<_, String>(0),
        )?;
        write_service(&tx, &service)?;
        tx.commit()?;
        Ok(service)
    }

    pub fn transition_service_status(
        &mut self,
        ctx: &OrgContext,
        service_id: &str,
        target: ServiceStatus,
    ) -> Result<ServiceItem, StoreError> {
        let tx = self.conn.transaction()?;
        let mut service = read_service(&tx, ctx, service_id)?;
        lifecycle::transition_service(service_id, service.status, target)?;
        service.status = target;
        service.updated_at = tx.query_row(
            "SELECT strftime('%Y-%m-%dT%H:%M:%SZ', 'now')",
            [],
            |row| row.get::<_, String>(0),
        )?;
        write_service(&tx, &service)?;
        tx.commit()?;
        Ok(service)
    }

    pub fn delete_service(&mut self, ctx: &OrgContext, service_id: &str) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        let service = read_service(&tx, ctx, service_id)?;
        lifecycle::ensure_service_deletable(service_id, service.status)?;
        tx.execute(
            "DELETE FROM services WHERE org_id = ?1 AND service_id = ?2",
            params![ctx.org_id.as_str(), service_id],
        )?;
        tx.commit()?;
        Ok(())
    }
}

fn read_client(conn: &Connection, ctx: &OrgContext, client_id: &str) -> Result<Client, StoreError> {
    let payload: Option<String> = conn
        .query_row(
            "SELECT payload_json FROM clients WHERE org_id = ?1 AND client_id = ?2",
            params![ctx.org_id.as_str(), client_id],
            |row| row.get(0),
        )
        .optional()?;
    let Some(raw) = payload else {
        return Err(StoreError::NotFound {
            entity: "client",
            id: client_id.to_string(),
        });
    };
    Ok(serde_json::from_str(&raw)?)
}

fn write_client(conn: &Connection, client: &Client) -> Result<(), StoreError> {
    let payload = serde_json::to_string(client)?;
    conn.execute(
        "UPDATE clients SET status = ?1, payload_json = ?2, updated_at = ?3
         WHERE org_id = ?4 AND client_id = ?5",
        params![
            client.status.as_str(),
            payload,
            client.updated_at.as_str(),
            client.org_id.as_str(),
            client.client_id.as_str(),
        ],
    )?;
    Ok(())
}

/// The balance column is authoritative; the payload is refreshed alongside
/// it but stale copies must never win.
fn read_bucket(
    conn: &Connection,
    ctx: &OrgContext,
    bucket_id: &str,
) -> Result<ClientBucket, StoreError> {
    let row: Option<(String, i64)> = conn
        .query_row(
            "SELECT payload_json, current_balance_cents FROM client_buckets
             WHERE org_id = ?1 AND bucket_id = ?2",
            params![ctx.org_id.as_str(), bucket_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    let Some((raw, balance)) = row else {
        return Err(StoreError::NotFound {
            entity: "bucket",
            id: bucket_id.to_string(),
        });
    };
    let mut bucket: ClientBucket = serde_json::from_str(&raw)?;
    bucket.current_balance_cents = balance;
    Ok(bucket)
}

fn collect_buckets(
    rows: impl Iterator<Item = rusqlite::Result<(String, i64)>>,
) -> Result<Vec<ClientBucket>, StoreError> {
    let mut buckets = Vec::new();
    for row in rows {
        let (raw, balance) = row?;
        let mut bucket: ClientBucket = serde_json::from_str(&raw)?;
        bucket.current_balance_cents = balance;
        buckets.push(bucket);
    }
    Ok(buckets)
}

fn read_agreement(
    conn: &Connection,
    ctx: &OrgContext,
    agreement_id: &str,
) -> Result<ServiceAgreement, StoreError> {
    let payload: Option<String> = conn
        .query_row(
            "SELECT payload_json FROM service_agreements
             WHERE org_id = ?1 AND agreement_id = ?2",
            params![ctx.org_id.as_str(), agreement_id],
            |row| row.get(0),
        )
        .optional()?;
    let Some(raw) = payload else {
        return Err(StoreError::NotFound {
            entity: "agreement",
            id: agreement_id.to_string(),
        });
    };
    Ok(serde_json::from_str(&raw)?)
}

fn write_agreement(
    conn: &Connection,
    agreement: &ServiceAgreement,
    insert: bool,
) -> Result<(), StoreError> {
    let payload = serde_json::to_string(agreement)?;
    if insert {
        conn.execute(
            "INSERT INTO service_agreements
                (org_id, agreement_id, client_id, status, payload_json, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                agreement.org_id.as_str(),
                agreement.agreement_id.as_str(),
                agreement.client_id.as_str(),
                agreement.status.as_str(),
                payload,
                agreement.created_at.as_str(),
                agreement.updated_at.as_str(),
            ],
        )?;
    } else {
        conn.execute(
            "UPDATE service_agreements SET status = ?1, payload_json = ?2, updated_at = ?3
             WHERE org_id = ?4 AND agreement_id = ?5",
            params![
                agreement.status.as_str(),
                payload,
                agreement.updated_at.as_str(),
                agreement.org_id.as_str(),
                agreement.agreement_id.as_str(),
            ],
        )?;
    }

    conn.execute(
        "DELETE FROM agreement_buckets WHERE org_id = ?1 AND agreement_id = ?2",
        params![agreement.org_id.as_str(), agreement.agreement_id.as_str()],
    )?;
    for bucket_id in &agreement.bucket_ids {
        conn.execute(
            "INSERT OR IGNORE INTO agreement_buckets (org_id, agreement_id, bucket_id)
             VALUES (?1, ?2, ?3)",
            params![
                agreement.org_id.as_str(),
                agreement.agreement_id.as_str(),
                bucket_id
            ],
        )?;
    }
    Ok(())
}

fn read_service(
    conn: &Connection,
    ctx: &OrgContext,
    service_id: &str,
) -> Result<ServiceItem, StoreError> {
    let payload: Option<String> = conn
        .query_row(
            "SELECT payload_json FROM services WHERE org_id = ?1 AND service_id = ?2",
            params![ctx.org_id.as_str(), service_id],
            |row| row.get(0),
        )
        .optional()?;
    let Some(raw) = payload else {
        return Err(StoreError::NotFound {
            entity: "service",
            id: service_id.to_string(),
        });
    };
    Ok(serde_json::from_str(&raw)?)
}

fn write_service(conn: &Connection, service: &ServiceItem) -> Result<(), StoreError> {
    let payload = serde_json::to_string(service)?;
    conn.execute(
        "UPDATE services SET status = ?1, payload_json = ?2, updated_at = ?3
         WHERE org_id = ?4 AND service_id = ?5",
        params![
            service.status.as_str(),
            payload,
            service.updated_at.as_str(),
            service.org_id.as_str(),
            service.service_id.as_str(),
        ],
    )?;
    Ok(())
}

fn insert_transaction(
    conn: &Connection,
    transaction: &LedgerTransaction,
) -> Result<(), StoreError> {
    let payload = serde_json::to_string(transaction)?;
    conn.execute(
        "INSERT INTO transactions
            (org_id, transaction_id, bucket_id, client_id, agreement_id, kind,
             amount_cents, balance_after_cents, sequence, payload_json, recorded_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            transaction.org_id.as_str(),
            transaction.transaction_id.as_str(),
            transaction.bucket_id.as_str(),
            transaction.client_id.as_str(),
            transaction.agreement_id.as_deref(),
            transaction.kind.as_str(),
            transaction.amount_cents,
            transaction.balance_after_cents,
            i64::try_from(transaction.sequence).unwrap_or(i64::MAX),
            payload,
            transaction.recorded_at.as_str(),
        ],
    )?;
    Ok(())
}

fn list_payloads<T: serde::de::DeserializeOwned>(
    conn: &Connection,
    sql: &str,
    ctx: &OrgContext,
) -> Result<Vec<T>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params![ctx.org_id.as_str()], |row| row.get::<_, String>(0))?;
    let mut records = Vec::new();
    for row in rows {
        records.push(serde_json::from_str(&row?)?);
    }
    Ok(records)
}
