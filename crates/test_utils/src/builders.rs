//! Test data builders
//!
//! Builders with sensible defaults so tests only spell out the fields they
//! care about. Defaults describe a R$ 1.000,00 PIX debit to ACME LTDA on
//! 2024-03-10 and a matching open payable.

use chrono::{DateTime, NaiveDate, Utc};

use core_kernel::{CostCenterId, Currency, Money};
use domain_ledger::{CostCategory, LedgerKind, LedgerRecord, Sector};
use domain_reconciliation::RawTransaction;

use crate::fixtures::{brl, march, march_at_noon};

/// Builder for raw bank-feed transactions
pub struct RawTransactionBuilder {
    external_id: String,
    occurred_at: DateTime<Utc>,
    credit: Money,
    debit: Money,
    counterpart_name: String,
    description: String,
}

impl Default for RawTransactionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RawTransactionBuilder {
    /// A debit of R$ 1.000,00 to ACME LTDA on 2024-03-10
    pub fn new() -> Self {
        Self {
            external_id: "ext-1".to_string(),
            occurred_at: march_at_noon(10),
            credit: Money::zero(Currency::Brl),
            debit: brl(100_000),
            counterpart_name: "ACME LTDA".to_string(),
            description: "PIX ENVIADO ACME LTDA".to_string(),
        }
    }

    pub fn external_id(mut self, id: impl Into<String>) -> Self {
        self.external_id = id.into();
        self
    }

    pub fn occurred_at(mut self, at: DateTime<Utc>) -> Self {
        self.occurred_at = at;
        self
    }

    /// Makes this a debit of `minor` centavos, zeroing the credit
    pub fn debit(mut self, minor: i64) -> Self {
        self.debit = brl(minor);
        self.credit = Money::zero(Currency::Brl);
        self
    }

    /// Makes this a credit of `minor` centavos, zeroing the debit
    pub fn credit(mut self, minor: i64) -> Self {
        self.credit = brl(minor);
        self.debit = Money::zero(Currency::Brl);
        self
    }

    pub fn counterpart(mut self, name: impl Into<String>) -> Self {
        self.counterpart_name = name.into();
        self
    }

    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = text.into();
        self
    }

    pub fn build(self) -> RawTransaction {
        RawTransaction {
            external_id: self.external_id,
            occurred_at: self.occurred_at,
            credit: self.credit,
            debit: self.debit,
            counterpart_name: self.counterpart_name,
            description: self.description,
        }
    }
}

/// Builder for ledger records
pub struct LedgerRecordBuilder {
    kind: LedgerKind,
    description: String,
    favored_party: String,
    amount: Money,
    due_date: NaiveDate,
    cost_center_id: CostCenterId,
    category: CostCategory,
    sector: Sector,
}

impl Default for LedgerRecordBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LedgerRecordBuilder {
    /// An open payable of R$ 1.000,00 to ACME LTDA due 2024-03-10
    pub fn new() -> Self {
        Self {
            kind: LedgerKind::Payable,
            description: "Compra de materiais".to_string(),
            favored_party: "ACME LTDA".to_string(),
            amount: brl(100_000),
            due_date: march(10),
            cost_center_id: CostCenterId::new(),
            category: CostCategory::Material,
            sector: Sector::Works,
        }
    }

    pub fn kind(mut self, kind: LedgerKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = text.into();
        self
    }

    pub fn favored_party(mut self, name: impl Into<String>) -> Self {
        self.favored_party = name.into();
        self
    }

    pub fn amount(mut self, amount: Money) -> Self {
        self.amount = amount;
        self
    }

    pub fn due_date(mut self, date: NaiveDate) -> Self {
        self.due_date = date;
        self
    }

    pub fn cost_center(mut self, id: CostCenterId) -> Self {
        self.cost_center_id = id;
        self
    }

    pub fn category(mut self, category: CostCategory) -> Self {
        self.category = category;
        self
    }

    pub fn sector(mut self, sector: Sector) -> Self {
        self.sector = sector;
        self
    }

    pub fn build(self) -> LedgerRecord {
        LedgerRecord::new(
            self.kind,
            self.description,
            self.favored_party,
            self.amount,
            self.due_date,
            self.cost_center_id,
            self.category,
            self.sector,
        )
    }
}
