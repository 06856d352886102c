//! Bank transaction aggregate and its state machine
//!
//! A `BankTransaction` is a local copy of a movement reported by the bank.
//! The sync orchestrator creates it on first sight of an external id; from
//! then on only the reconciliation state machine may change its status.
//!
//! States: `Pending` (initial), `Reconciled`, `Ignored`. The terminal
//! states admit exactly one transition, an explicit reopen back to
//! `Pending`. Re-issuing a terminal transition is rejected, never absorbed.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use core_kernel::{AccountId, LedgerRecordId, Money, TransactionId};
use domain_ledger::{CostCategory, LedgerKind, Sector};

use crate::allocation::Allocation;
use crate::error::{InvalidStateError, ValidationError};

/// A movement as reported by the bank feed provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTransaction {
    /// Provider-assigned id, unique within an account
    pub external_id: String,
    pub occurred_at: DateTime<Utc>,
    /// Non-negative inflow magnitude
    pub credit: Money,
    /// Non-negative outflow magnitude
    pub debit: Money,
    pub counterpart_name: String,
    pub description: String,
}

impl RawTransaction {
    /// Checks the credit/debit invariant: exactly one non-zero magnitude
    pub fn validate(&self) -> Result<(), ValidationError> {
        let credit_set = self.credit.is_positive();
        let debit_set = self.debit.is_positive();
        if credit_set == debit_set || self.credit.is_negative() || self.debit.is_negative() {
            return Err(ValidationError::InconsistentAmounts {
                credit: self.credit,
                debit: self.debit,
            });
        }
        Ok(())
    }
}

/// Direction of the movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionSign {
    Credit,
    Debit,
}

impl TransactionSign {
    /// The ledger side this sign settles against
    pub fn ledger_kind(&self) -> LedgerKind {
        match self {
            TransactionSign::Credit => LedgerKind::Receivable,
            TransactionSign::Debit => LedgerKind::Payable,
        }
    }
}

/// Transaction lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Reconciled,
    Ignored,
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionStatus::Reconciled | TransactionStatus::Ignored)
    }
}

/// The transitions the state machine knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    Reconcile,
    Ignore,
    Reopen,
}

/// Operator-supplied classification applied when reconciling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub category: CostCategory,
    pub sector: Sector,
}

/// A bank transaction under reconciliation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankTransaction {
    pub id: TransactionId,
    pub account_id: AccountId,
    pub external_id: String,
    pub occurred_at: DateTime<Utc>,
    pub credit: Money,
    pub debit: Money,
    pub counterpart_name: String,
    pub description: String,
    pub status: TransactionStatus,
    /// Cost-center split; present only while `Reconciled`
    pub allocations: Vec<Allocation>,
    /// The ledger record this transaction settled, if any
    pub settled_record: Option<LedgerRecordId>,
    /// Audit reason recorded when the transaction was ignored
    pub ignore_reason: Option<String>,
    pub classification: Option<Classification>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BankTransaction {
    /// Creates a pending local record from a validated raw transaction
    pub fn from_raw(account_id: AccountId, raw: RawTransaction) -> Result<Self, ValidationError> {
        raw.validate()?;
        let now = Utc::now();
        Ok(Self {
            id: TransactionId::new_v7(),
            account_id,
            external_id: raw.external_id,
            occurred_at: raw.occurred_at,
            credit: raw.credit,
            debit: raw.debit,
            counterpart_name: raw.counterpart_name,
            description: raw.description,
            status: TransactionStatus::Pending,
            allocations: Vec::new(),
            settled_record: None,
            ignore_reason: None,
            classification: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn sign(&self) -> TransactionSign {
        if self.credit.is_positive() {
            TransactionSign::Credit
        } else {
            TransactionSign::Debit
        }
    }

    /// The non-zero magnitude of the movement
    pub fn amount(&self) -> Money {
        match self.sign() {
            TransactionSign::Credit => self.credit,
            TransactionSign::Debit => self.debit,
        }
    }

    /// Calendar date of the movement
    pub fn occurred_on(&self) -> NaiveDate {
        self.occurred_at.date_naive()
    }

    /// Fails unless the transaction is still `Pending`
    pub fn ensure_pending(&self, attempted: TransitionKind) -> Result<(), InvalidStateError> {
        if self.status != TransactionStatus::Pending {
            return Err(InvalidStateError::Transition {
                transaction: self.id,
                from: self.status,
                attempted,
            });
        }
        Ok(())
    }

    /// Overwrites provider-mutable fields from a corrected raw transaction.
    ///
    /// Callers must hold the pending check; terminal records are immune to
    /// sync updates.
    pub fn absorb_raw(&mut self, raw: RawTransaction) -> Result<(), InvalidStateError> {
        if self.status != TransactionStatus::Pending {
            return Err(InvalidStateError::Transition {
                transaction: self.id,
                from: self.status,
                attempted: TransitionKind::Reconcile,
            });
        }
        self.occurred_at = raw.occurred_at;
        self.credit = raw.credit;
        self.debit = raw.debit;
        self.counterpart_name = raw.counterpart_name;
        self.description = raw.description;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// `pending -> reconciled`: records the settled ledger record, the
    /// allocation set, and an optional classification
    pub fn apply_reconcile(
        &mut self,
        record: LedgerRecordId,
        allocations: Vec<Allocation>,
        classification: Option<Classification>,
    ) -> Result<(), InvalidStateError> {
        self.ensure_pending(TransitionKind::Reconcile)?;
        self.status = TransactionStatus::Reconciled;
        self.settled_record = Some(record);
        self.allocations = allocations;
        self.classification = classification;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// `pending -> ignored`: status change only, with an audit reason
    pub fn apply_ignore(&mut self, reason: String) -> Result<(), InvalidStateError> {
        self.ensure_pending(TransitionKind::Ignore)?;
        self.status = TransactionStatus::Ignored;
        self.ignore_reason = Some(reason);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// `{reconciled, ignored} -> pending`: clears allocations, the ledger
    /// link, and any ignore reason
    pub fn apply_reopen(&mut self) -> Result<Option<LedgerRecordId>, InvalidStateError> {
        if !self.status.is_terminal() {
            return Err(InvalidStateError::Transition {
                transaction: self.id,
                from: self.status,
                attempted: TransitionKind::Reopen,
            });
        }
        let unlinked = self.settled_record.take();
        self.status = TransactionStatus::Pending;
        self.allocations.clear();
        self.ignore_reason = None;
        self.classification = None;
        self.updated_at = Utc::now();
        Ok(unlinked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_kernel::Currency;

    fn raw_debit(minor: i64) -> RawTransaction {
        RawTransaction {
            external_id: "ext-1".to_string(),
            occurred_at: Utc::now(),
            credit: Money::zero(Currency::Brl),
            debit: Money::from_minor(minor, Currency::Brl),
            counterpart_name: "ACME LTDA".to_string(),
            description: "PIX ENVIADO".to_string(),
        }
    }

    fn pending(minor: i64) -> BankTransaction {
        BankTransaction::from_raw(AccountId::new(), raw_debit(minor)).unwrap()
    }

    #[test]
    fn test_raw_requires_exactly_one_magnitude() {
        let mut raw = raw_debit(1000);
        assert!(raw.validate().is_ok());

        raw.credit = Money::from_minor(500, Currency::Brl);
        assert!(matches!(
            raw.validate(),
            Err(ValidationError::InconsistentAmounts { .. })
        ));

        raw.credit = Money::zero(Currency::Brl);
        raw.debit = Money::zero(Currency::Brl);
        assert!(raw.validate().is_err());
    }

    #[test]
    fn test_sign_and_amount() {
        let tx = pending(1000);
        assert_eq!(tx.sign(), TransactionSign::Debit);
        assert_eq!(tx.sign().ledger_kind(), LedgerKind::Payable);
        assert_eq!(tx.amount().to_minor(), 1000);
    }

    #[test]
    fn test_reconcile_then_reopen_clears_links() {
        let mut tx = pending(1000);
        let record = LedgerRecordId::new();
        tx.apply_reconcile(record, Vec::new(), None).unwrap();
        assert_eq!(tx.status, TransactionStatus::Reconciled);
        assert_eq!(tx.settled_record, Some(record));

        let unlinked = tx.apply_reopen().unwrap();
        assert_eq!(unlinked, Some(record));
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert!(tx.allocations.is_empty());
        assert!(tx.settled_record.is_none());
    }

    #[test]
    fn test_terminal_transitions_are_single_fire() {
        let mut tx = pending(1000);
        tx.apply_ignore("duplicate entry".to_string()).unwrap();

        // Re-ignoring is rejected, not absorbed
        let err = tx.apply_ignore("again".to_string()).unwrap_err();
        assert_eq!(
            err,
            InvalidStateError::Transition {
                transaction: tx.id,
                from: TransactionStatus::Ignored,
                attempted: TransitionKind::Ignore,
            }
        );

        // As is reconciling an ignored transaction
        assert!(tx
            .apply_reconcile(LedgerRecordId::new(), Vec::new(), None)
            .is_err());
    }

    #[test]
    fn test_reopen_from_pending_is_rejected() {
        let mut tx = pending(1000);
        assert!(matches!(
            tx.apply_reopen(),
            Err(InvalidStateError::Transition {
                attempted: TransitionKind::Reopen,
                ..
            })
        ));
    }

    #[test]
    fn test_absorb_raw_refused_on_terminal() {
        let mut tx = pending(1000);
        tx.apply_ignore("noise".to_string()).unwrap();
        assert!(tx.absorb_raw(raw_debit(2000)).is_err());
        assert_eq!(tx.amount().to_minor(), 1000);
    }

    #[test]
    fn test_absorb_raw_overwrites_pending_fields() {
        let mut tx = pending(1000);
        let mut corrected = raw_debit(2500);
        corrected.description = "PIX ENVIADO - CORRIGIDO".to_string();
        tx.absorb_raw(corrected).unwrap();

        assert_eq!(tx.amount().to_minor(), 2500);
        assert_eq!(tx.description, "PIX ENVIADO - CORRIGIDO");
        assert_eq!(tx.status, TransactionStatus::Pending);
    }
}
