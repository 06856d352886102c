//! PostgreSQL implementation of the reconciliation store
//!
//! Every state transition commits inside a single SQL transaction. The
//! status change itself is a compare-and-set (`UPDATE ... WHERE status =
//! 'pending'`); a racing caller blocks on the row lock, re-evaluates the
//! predicate after the winner commits, matches zero rows, and surfaces an
//! invalid-state error.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use core_kernel::{AccountId, DateRange, LedgerRecordId, Money, TransactionId};
use domain_ledger::{LedgerKind, LedgerRecord};
use domain_reconciliation::{
    Allocation, BankTransaction, Classification, InvalidStateError, LedgerTarget,
    PersistenceError, RawTransaction, ReconcileCommand, ReconciliationError, ReconciliationStore,
    TransactionStatus, TransitionKind, UpsertOutcome,
};

use crate::error::DatabaseError;

const TRANSACTION_COLUMNS: &str = "id, account_id, external_id, occurred_at, credit, debit, \
     currency, counterpart_name, description, status, settled_record, ignore_reason, \
     category, sector, created_at, updated_at";

const LEDGER_COLUMNS: &str = "id, kind, description, favored_party, amount, currency, due_date, \
     cost_center_id, category, sector, status, settled_by, created_at, updated_at";

/// Store backed by a PostgreSQL pool
#[derive(Debug, Clone)]
pub struct PgReconciliationStore {
    pool: PgPool,
}

impl PgReconciliationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_transaction_row(
        &self,
        id: TransactionId,
    ) -> Result<TransactionRow, PersistenceError> {
        let sql = format!("SELECT {TRANSACTION_COLUMNS} FROM bank_transactions WHERE id = $1");
        sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(Uuid::from(id))
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or_else(|| PersistenceError::not_found("bank transaction", id))
    }

    async fn load_allocations(
        &self,
        transaction_id: Uuid,
    ) -> Result<Vec<Allocation>, PersistenceError> {
        let rows: Vec<AllocationRow> = sqlx::query_as(
            "SELECT id, cost_center_id, percentage, value, currency \
             FROM allocations WHERE transaction_id = $1 ORDER BY position",
        )
        .bind(transaction_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter()
            .map(|row| row.into_domain().map_err(PersistenceError::from))
            .collect()
    }

    /// Allocations for many transactions at once, grouped by transaction
    async fn load_allocations_for(
        &self,
        transaction_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Vec<Allocation>>, PersistenceError> {
        if transaction_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows: Vec<(Uuid, AllocationRow)> = sqlx::query_as::<_, GroupedAllocationRow>(
            "SELECT transaction_id, id, cost_center_id, percentage, value, currency \
             FROM allocations WHERE transaction_id = ANY($1) ORDER BY transaction_id, position",
        )
        .bind(transaction_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?
        .into_iter()
        .map(|row| (row.transaction_id, row.allocation))
        .collect();

        let mut grouped: HashMap<Uuid, Vec<Allocation>> = HashMap::new();
        for (transaction_id, row) in rows {
            grouped
                .entry(transaction_id)
                .or_default()
                .push(row.into_domain().map_err(PersistenceError::from)?);
        }
        Ok(grouped)
    }
}

#[async_trait]
impl ReconciliationStore for PgReconciliationStore {
    async fn get_transaction(
        &self,
        id: TransactionId,
    ) -> Result<BankTransaction, PersistenceError> {
        let row = self.fetch_transaction_row(id).await?;
        let allocations = self.load_allocations(row.id).await?;
        Ok(row.into_domain(allocations)?)
    }

    async fn find_by_external_id(
        &self,
        account_id: AccountId,
        external_id: &str,
    ) -> Result<Option<BankTransaction>, PersistenceError> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM bank_transactions \
             WHERE account_id = $1 AND external_id = $2"
        );
        let row = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(Uuid::from(account_id))
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        match row {
            None => Ok(None),
            Some(row) => {
                let allocations = self.load_allocations(row.id).await?;
                Ok(Some(row.into_domain(allocations)?))
            }
        }
    }

    async fn upsert_pending(
        &self,
        account_id: AccountId,
        raw: RawTransaction,
    ) -> Result<UpsertOutcome, PersistenceError> {
        let account_uuid = Uuid::from(account_id);
        let mut db_tx = self.pool.begin().await.map_err(db_err)?;

        let existing: Option<(Uuid, String)> = sqlx::query_as(
            "SELECT id, status FROM bank_transactions \
             WHERE account_id = $1 AND external_id = $2 FOR UPDATE",
        )
        .bind(account_uuid)
        .bind(&raw.external_id)
        .fetch_optional(&mut *db_tx)
        .await
        .map_err(db_err)?;

        let outcome = match existing {
            None => {
                let tx = BankTransaction::from_raw(account_id, raw)
                    .map_err(|e| PersistenceError::backend(e.to_string()))?;
                sqlx::query(
                    "INSERT INTO bank_transactions \
                     (id, account_id, external_id, occurred_at, credit, debit, currency, \
                      counterpart_name, description, status, created_at, updated_at) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'pending', $10, $11)",
                )
                .bind(Uuid::from(tx.id))
                .bind(account_uuid)
                .bind(&tx.external_id)
                .bind(tx.occurred_at)
                .bind(tx.credit.amount())
                .bind(tx.debit.amount())
                .bind(tx.credit.currency().code())
                .bind(&tx.counterpart_name)
                .bind(&tx.description)
                .bind(tx.created_at)
                .bind(tx.updated_at)
                .execute(&mut *db_tx)
                .await
                .map_err(db_err)?;
                UpsertOutcome::Created
            }
            Some((id, status)) if status == "pending" => {
                sqlx::query(
                    "UPDATE bank_transactions SET occurred_at = $2, credit = $3, debit = $4, \
                     currency = $5, counterpart_name = $6, description = $7, updated_at = NOW() \
                     WHERE id = $1",
                )
                .bind(id)
                .bind(raw.occurred_at)
                .bind(raw.credit.amount())
                .bind(raw.debit.amount())
                .bind(raw.credit.currency().code())
                .bind(&raw.counterpart_name)
                .bind(&raw.description)
                .execute(&mut *db_tx)
                .await
                .map_err(db_err)?;
                UpsertOutcome::Updated
            }
            Some(_) => UpsertOutcome::Skipped,
        };

        db_tx.commit().await.map_err(db_err)?;
        Ok(outcome)
    }

    async fn list_transactions(
        &self,
        account_id: AccountId,
        range: DateRange,
    ) -> Result<Vec<BankTransaction>, PersistenceError> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM bank_transactions \
             WHERE account_id = $1 \
               AND (occurred_at AT TIME ZONE 'UTC')::date BETWEEN $2 AND $3 \
             ORDER BY occurred_at, id"
        );
        let rows: Vec<TransactionRow> = sqlx::query_as(&sql)
            .bind(Uuid::from(account_id))
            .bind(range.start())
            .bind(range.end())
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        let reconciled_ids: Vec<Uuid> = rows
            .iter()
            .filter(|row| row.status == "reconciled")
            .map(|row| row.id)
            .collect();
        let mut grouped = self.load_allocations_for(&reconciled_ids).await?;

        rows.into_iter()
            .map(|row| {
                let allocations = grouped.remove(&row.id).unwrap_or_default();
                row.into_domain(allocations).map_err(PersistenceError::from)
            })
            .collect()
    }

    async fn get_ledger_record(
        &self,
        id: LedgerRecordId,
    ) -> Result<LedgerRecord, PersistenceError> {
        let sql = format!("SELECT {LEDGER_COLUMNS} FROM ledger_records WHERE id = $1");
        let row = sqlx::query_as::<_, LedgerRecordRow>(&sql)
            .bind(Uuid::from(id))
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or_else(|| PersistenceError::not_found("ledger record", id))?;
        Ok(row.into_domain()?)
    }

    async fn find_settleable_records(
        &self,
        kind: LedgerKind,
    ) -> Result<Vec<LedgerRecord>, PersistenceError> {
        let sql = format!(
            "SELECT {LEDGER_COLUMNS} FROM ledger_records \
             WHERE kind = $1 AND status IN ('open', 'overdue') \
             ORDER BY due_date, created_at"
        );
        let rows: Vec<LedgerRecordRow> = sqlx::query_as(&sql)
            .bind(codec::ledger_kind_str(kind))
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        rows.into_iter()
            .map(|row| row.into_domain().map_err(PersistenceError::from))
            .collect()
    }

    async fn commit_reconcile(
        &self,
        command: ReconcileCommand,
    ) -> Result<BankTransaction, ReconciliationError> {
        let tx_uuid = Uuid::from(command.transaction_id);
        let mut db_tx = self.pool.begin().await.map_err(db_err)?;

        // Claim the transaction; losing a race matches zero rows. The
        // amounts are part of the predicate so allocations computed from a
        // read that a sync has since overwritten can never be persisted.
        let claimed = sqlx::query(
            "UPDATE bank_transactions SET status = 'reconciled', updated_at = NOW() \
             WHERE id = $1 AND status = 'pending' AND credit = $2 AND debit = $3",
        )
        .bind(tx_uuid)
        .bind(command.expected_credit.amount())
        .bind(command.expected_debit.amount())
        .execute(&mut *db_tx)
        .await
        .map_err(db_err)?;

        if claimed.rows_affected() == 0 {
            let current = self.get_transaction(command.transaction_id).await?;
            return Err(if current.status != TransactionStatus::Pending {
                InvalidStateError::Transition {
                    transaction: command.transaction_id,
                    from: current.status,
                    attempted: TransitionKind::Reconcile,
                }
            } else {
                InvalidStateError::AmountChanged {
                    transaction: command.transaction_id,
                    expected: expected_amount(&command),
                    actual: current.amount(),
                }
            }
            .into());
        }

        let record_id = match command.target {
            LedgerTarget::Existing(record_id) => {
                let settled = sqlx::query(
                    "UPDATE ledger_records SET status = 'paid', settled_by = $2, \
                     updated_at = NOW() \
                     WHERE id = $1 AND settled_by IS NULL AND status IN ('open', 'overdue')",
                )
                .bind(Uuid::from(record_id))
                .bind(tx_uuid)
                .execute(&mut *db_tx)
                .await
                .map_err(db_err)?;

                if settled.rows_affected() == 0 {
                    let record = self.get_ledger_record(record_id).await?;
                    return Err(match record.settled_by {
                        Some(settled_by) => InvalidStateError::AlreadySettled {
                            record: record_id,
                            settled_by,
                        },
                        None => InvalidStateError::RecordNotSettleable {
                            record: record_id,
                            reason: format!("status is {:?}", record.status),
                        },
                    }
                    .into());
                }
                record_id
            }
            LedgerTarget::Create(record) => {
                sqlx::query(
                    "INSERT INTO ledger_records \
                     (id, kind, description, favored_party, amount, currency, due_date, \
                      cost_center_id, category, sector, status, settled_by, created_at, \
                      updated_at) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'paid', $11, $12, $13)",
                )
                .bind(Uuid::from(record.id))
                .bind(codec::ledger_kind_str(record.kind))
                .bind(&record.description)
                .bind(&record.favored_party)
                .bind(record.amount.amount())
                .bind(record.amount.currency().code())
                .bind(record.due_date)
                .bind(Uuid::from(record.cost_center_id))
                .bind(codec::category_str(record.category))
                .bind(codec::sector_str(record.sector))
                .bind(tx_uuid)
                .bind(record.created_at)
                .bind(record.updated_at)
                .execute(&mut *db_tx)
                .await
                .map_err(db_err)?;
                record.id
            }
        };

        let (category, sector) = match command.classification {
            Some(Classification { category, sector }) => (
                Some(codec::category_str(category)),
                Some(codec::sector_str(sector)),
            ),
            None => (None, None),
        };
        sqlx::query(
            "UPDATE bank_transactions SET settled_record = $2, category = $3, sector = $4 \
             WHERE id = $1",
        )
        .bind(tx_uuid)
        .bind(Uuid::from(record_id))
        .bind(category)
        .bind(sector)
        .execute(&mut *db_tx)
        .await
        .map_err(db_err)?;

        for (position, allocation) in command.allocations.iter().enumerate() {
            sqlx::query(
                "INSERT INTO allocations \
                 (id, transaction_id, cost_center_id, percentage, value, currency, position) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(Uuid::from(allocation.id))
            .bind(tx_uuid)
            .bind(Uuid::from(allocation.cost_center_id))
            .bind(allocation.percentage)
            .bind(allocation.value.amount())
            .bind(allocation.value.currency().code())
            .bind(position as i32)
            .execute(&mut *db_tx)
            .await
            .map_err(db_err)?;
        }

        db_tx.commit().await.map_err(db_err)?;
        debug!(transaction = %command.transaction_id, record = %record_id, "reconcile committed");
        Ok(self.get_transaction(command.transaction_id).await?)
    }

    async fn commit_ignore(
        &self,
        transaction_id: TransactionId,
        reason: String,
    ) -> Result<BankTransaction, ReconciliationError> {
        let updated = sqlx::query(
            "UPDATE bank_transactions SET status = 'ignored', ignore_reason = $2, \
             updated_at = NOW() \
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(Uuid::from(transaction_id))
        .bind(&reason)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if updated.rows_affected() == 0 {
            let current = self.get_transaction(transaction_id).await?;
            return Err(InvalidStateError::Transition {
                transaction: transaction_id,
                from: current.status,
                attempted: TransitionKind::Ignore,
            }
            .into());
        }
        Ok(self.get_transaction(transaction_id).await?)
    }

    async fn commit_reopen(
        &self,
        transaction_id: TransactionId,
    ) -> Result<BankTransaction, ReconciliationError> {
        let tx_uuid = Uuid::from(transaction_id);
        let mut db_tx = self.pool.begin().await.map_err(db_err)?;

        let row: Option<(String, Option<Uuid>)> = sqlx::query_as(
            "SELECT status, settled_record FROM bank_transactions WHERE id = $1 FOR UPDATE",
        )
        .bind(tx_uuid)
        .fetch_optional(&mut *db_tx)
        .await
        .map_err(db_err)?;

        let (status, settled_record) = row.ok_or_else(|| {
            PersistenceError::not_found("bank transaction", transaction_id)
        })?;
        let status = codec::parse_tx_status(&status).map_err(PersistenceError::from)?;
        if !status.is_terminal() {
            return Err(InvalidStateError::Transition {
                transaction: transaction_id,
                from: status,
                attempted: TransitionKind::Reopen,
            }
            .into());
        }

        sqlx::query(
            "UPDATE bank_transactions SET status = 'pending', settled_record = NULL, \
             ignore_reason = NULL, category = NULL, sector = NULL, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(tx_uuid)
        .execute(&mut *db_tx)
        .await
        .map_err(db_err)?;

        sqlx::query("DELETE FROM allocations WHERE transaction_id = $1")
            .bind(tx_uuid)
            .execute(&mut *db_tx)
            .await
            .map_err(db_err)?;

        if let Some(record_uuid) = settled_record {
            sqlx::query(
                "UPDATE ledger_records SET status = 'open', settled_by = NULL, \
                 updated_at = NOW() \
                 WHERE id = $1 AND settled_by = $2",
            )
            .bind(record_uuid)
            .bind(tx_uuid)
            .execute(&mut *db_tx)
            .await
            .map_err(db_err)?;
        }

        db_tx.commit().await.map_err(db_err)?;
        debug!(transaction = %transaction_id, "reopen committed");
        Ok(self.get_transaction(transaction_id).await?)
    }
}

fn db_err(error: sqlx::Error) -> PersistenceError {
    DatabaseError::from(&error).into()
}

/// The non-zero magnitude the caller computed its allocations from
fn expected_amount(command: &ReconcileCommand) -> core_kernel::Money {
    if command.expected_credit.is_positive() {
        command.expected_credit
    } else {
        command.expected_debit
    }
}

#[derive(sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    account_id: Uuid,
    external_id: String,
    occurred_at: DateTime<Utc>,
    credit: Decimal,
    debit: Decimal,
    currency: String,
    counterpart_name: String,
    description: String,
    status: String,
    settled_record: Option<Uuid>,
    ignore_reason: Option<String>,
    category: Option<String>,
    sector: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TransactionRow {
    fn into_domain(self, allocations: Vec<Allocation>) -> Result<BankTransaction, DatabaseError> {
        let currency = codec::parse_currency(&self.currency)?;
        let classification = match (self.category.as_deref(), self.sector.as_deref()) {
            (Some(category), Some(sector)) => Some(Classification {
                category: codec::parse_category(category)?,
                sector: codec::parse_sector(sector)?,
            }),
            _ => None,
        };

        Ok(BankTransaction {
            id: self.id.into(),
            account_id: self.account_id.into(),
            external_id: self.external_id,
            occurred_at: self.occurred_at,
            credit: Money::new(self.credit, currency),
            debit: Money::new(self.debit, currency),
            counterpart_name: self.counterpart_name,
            description: self.description,
            status: codec::parse_tx_status(&self.status)?,
            allocations,
            settled_record: self.settled_record.map(Into::into),
            ignore_reason: self.ignore_reason,
            classification,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct LedgerRecordRow {
    id: Uuid,
    kind: String,
    description: String,
    favored_party: String,
    amount: Decimal,
    currency: String,
    due_date: chrono::NaiveDate,
    cost_center_id: Uuid,
    category: String,
    sector: String,
    status: String,
    settled_by: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl LedgerRecordRow {
    fn into_domain(self) -> Result<LedgerRecord, DatabaseError> {
        let currency = codec::parse_currency(&self.currency)?;
        Ok(LedgerRecord {
            id: self.id.into(),
            kind: codec::parse_ledger_kind(&self.kind)?,
            description: self.description,
            favored_party: self.favored_party,
            amount: Money::new(self.amount, currency),
            due_date: self.due_date,
            cost_center_id: self.cost_center_id.into(),
            category: codec::parse_category(&self.category)?,
            sector: codec::parse_sector(&self.sector)?,
            status: codec::parse_ledger_status(&self.status)?,
            settled_by: self.settled_by.map(Into::into),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AllocationRow {
    id: Uuid,
    cost_center_id: Uuid,
    percentage: Decimal,
    value: Decimal,
    currency: String,
}

impl AllocationRow {
    fn into_domain(self) -> Result<Allocation, DatabaseError> {
        let currency = codec::parse_currency(&self.currency)?;
        Ok(Allocation {
            id: self.id.into(),
            cost_center_id: self.cost_center_id.into(),
            percentage: self.percentage,
            value: Money::new(self.value, currency),
        })
    }
}

#[derive(sqlx::FromRow)]
struct GroupedAllocationRow {
    transaction_id: Uuid,
    #[sqlx(flatten)]
    allocation: AllocationRow,
}

/// Text encodings for the status and classification enums
mod codec {
    use core_kernel::Currency;
    use domain_ledger::{CostCategory, LedgerKind, LedgerStatus, Sector};
    use domain_reconciliation::TransactionStatus;

    use crate::error::DatabaseError;

    pub fn parse_currency(s: &str) -> Result<Currency, DatabaseError> {
        match s {
            "BRL" => Ok(Currency::Brl),
            "USD" => Ok(Currency::Usd),
            "EUR" => Ok(Currency::Eur),
            other => Err(DatabaseError::Decode(format!("currency '{other}'"))),
        }
    }

    pub fn parse_tx_status(s: &str) -> Result<TransactionStatus, DatabaseError> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "reconciled" => Ok(TransactionStatus::Reconciled),
            "ignored" => Ok(TransactionStatus::Ignored),
            other => Err(DatabaseError::Decode(format!(
                "transaction status '{other}'"
            ))),
        }
    }

    pub fn ledger_kind_str(kind: LedgerKind) -> &'static str {
        match kind {
            LedgerKind::Payable => "payable",
            LedgerKind::Receivable => "receivable",
        }
    }

    pub fn parse_ledger_kind(s: &str) -> Result<LedgerKind, DatabaseError> {
        match s {
            "payable" => Ok(LedgerKind::Payable),
            "receivable" => Ok(LedgerKind::Receivable),
            other => Err(DatabaseError::Decode(format!("ledger kind '{other}'"))),
        }
    }

    pub fn parse_ledger_status(s: &str) -> Result<LedgerStatus, DatabaseError> {
        match s {
            "open" => Ok(LedgerStatus::Open),
            "paid" => Ok(LedgerStatus::Paid),
            "overdue" => Ok(LedgerStatus::Overdue),
            "cancelled" => Ok(LedgerStatus::Cancelled),
            other => Err(DatabaseError::Decode(format!("ledger status '{other}'"))),
        }
    }

    pub fn category_str(category: CostCategory) -> &'static str {
        match category {
            CostCategory::Labor => "labor",
            CostCategory::Material => "material",
            CostCategory::Equipment => "equipment",
            CostCategory::Application => "application",
            CostCategory::Office => "office",
            CostCategory::Taxes => "taxes",
            CostCategory::Other => "other",
        }
    }

    pub fn parse_category(s: &str) -> Result<CostCategory, DatabaseError> {
        match s {
            "labor" => Ok(CostCategory::Labor),
            "material" => Ok(CostCategory::Material),
            "equipment" => Ok(CostCategory::Equipment),
            "application" => Ok(CostCategory::Application),
            "office" => Ok(CostCategory::Office),
            "taxes" => Ok(CostCategory::Taxes),
            "other" => Ok(CostCategory::Other),
            other => Err(DatabaseError::Decode(format!("cost category '{other}'"))),
        }
    }

    pub fn sector_str(sector: Sector) -> &'static str {
        match sector {
            Sector::Administrative => "administrative",
            Sector::Works => "works",
            Sector::TechnicalAdvisory => "technical_advisory",
        }
    }

    pub fn parse_sector(s: &str) -> Result<Sector, DatabaseError> {
        match s {
            "administrative" => Ok(Sector::Administrative),
            "works" => Ok(Sector::Works),
            "technical_advisory" => Ok(Sector::TechnicalAdvisory),
            other => Err(DatabaseError::Decode(format!("sector '{other}'"))),
        }
    }

}
