//! Match suggestion engine
//!
//! Given a pending bank transaction and the settleable ledger records on
//! the matching side, proposes candidates ranked by a weighted confidence
//! score over three signals: amount proximity, date proximity, and text
//! similarity between the bank's counterpart text and the record's
//! favored-party name.
//!
//! Scoring is pure in-memory computation; suggestions are never persisted
//! and are recomputed on demand.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use core_kernel::Money;
use domain_ledger::LedgerRecord;

use crate::transaction::BankTransaction;

/// Relative weight of each signal; normalized before use
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchWeights {
    pub amount: Decimal,
    pub date: Decimal,
    pub text: Decimal,
}

impl Default for MatchWeights {
    fn default() -> Self {
        Self {
            amount: dec!(0.5),
            date: dec!(0.3),
            text: dec!(0.2),
        }
    }
}

/// Tunable thresholds for the matching engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchConfig {
    pub weights: MatchWeights,
    /// Amount tolerance as a percentage of the transaction amount
    pub amount_tolerance_percent: Decimal,
    /// Absolute tolerance floor, in minor units
    pub amount_tolerance_floor_minor: i64,
    /// Days around the due date that still score 1.0
    pub date_window_days: i64,
    /// Days at which the date score decays to 0
    pub date_max_days: i64,
    /// Maximum number of suggestions returned
    pub max_suggestions: usize,
    /// Suggestions below this confidence are dropped
    pub min_confidence: Decimal,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            weights: MatchWeights::default(),
            amount_tolerance_percent: dec!(5),
            amount_tolerance_floor_minor: 100,
            date_window_days: 5,
            date_max_days: 30,
            max_suggestions: 5,
            min_confidence: dec!(0.3),
        }
    }
}

/// Per-signal scores behind a suggestion, each in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchSignals {
    pub amount: Decimal,
    pub date: Decimal,
    pub text: Decimal,
}

/// A candidate ledger record with its confidence score
///
/// Transient: recomputed on demand, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchSuggestion {
    pub record: LedgerRecord,
    pub confidence: Decimal,
    pub signals: MatchSignals,
}

/// Scores candidate ledger records for pending transactions
#[derive(Debug, Clone, Default)]
pub struct MatchingEngine {
    config: MatchConfig,
}

impl MatchingEngine {
    pub fn new(config: MatchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    /// Proposes candidates for `transaction`, most confident first.
    ///
    /// Candidates on the wrong side (payable vs receivable) or no longer
    /// settleable are skipped. Ties break by earliest due date, then by
    /// creation order, so the ranking is deterministic.
    pub fn suggest(
        &self,
        transaction: &BankTransaction,
        candidates: &[LedgerRecord],
    ) -> Vec<MatchSuggestion> {
        let wanted_kind = transaction.sign().ledger_kind();

        let mut suggestions: Vec<MatchSuggestion> = candidates
            .iter()
            .filter(|record| record.kind == wanted_kind && record.is_settleable())
            .map(|record| self.score(transaction, record))
            .filter(|s| s.confidence >= self.config.min_confidence)
            .collect();

        suggestions.sort_by(|a, b| {
            b.confidence
                .cmp(&a.confidence)
                .then(a.record.due_date.cmp(&b.record.due_date))
                .then(a.record.created_at.cmp(&b.record.created_at))
        });
        suggestions.truncate(self.config.max_suggestions);
        suggestions
    }

    fn score(&self, transaction: &BankTransaction, record: &LedgerRecord) -> MatchSuggestion {
        let signals = MatchSignals {
            amount: self.amount_score(transaction.amount(), record.amount),
            date: self.date_score(transaction, record),
            text: text_similarity(
                &format!("{} {}", transaction.counterpart_name, transaction.description),
                &record.favored_party,
            ),
        };

        let w = &self.config.weights;
        let total_weight = w.amount + w.date + w.text;
        let confidence = if total_weight.is_zero() {
            Decimal::ZERO
        } else {
            (signals.amount * w.amount + signals.date * w.date + signals.text * w.text)
                / total_weight
        };

        MatchSuggestion {
            record: record.clone(),
            confidence,
            signals,
        }
    }

    /// 1.0 on exact match, decaying linearly to 0 at the tolerance bound.
    /// The bound is the larger of a percentage of the amount and an
    /// absolute minor-unit floor.
    fn amount_score(&self, transaction_amount: Money, record_amount: Money) -> Decimal {
        let tx_minor = transaction_amount.to_minor();
        let rec_minor = record_amount.to_minor();
        let diff = Decimal::from((tx_minor - rec_minor).abs());

        let percent_bound =
            Decimal::from(tx_minor.abs()) * self.config.amount_tolerance_percent / dec!(100);
        let tolerance = percent_bound.max(Decimal::from(self.config.amount_tolerance_floor_minor));

        if diff.is_zero() {
            dec!(1)
        } else if tolerance.is_zero() || diff >= tolerance {
            Decimal::ZERO
        } else {
            dec!(1) - diff / tolerance
        }
    }

    /// 1.0 within the due-date window, decaying linearly to 0 at the
    /// maximum distance.
    fn date_score(&self, transaction: &BankTransaction, record: &LedgerRecord) -> Decimal {
        let days = (transaction.occurred_on() - record.due_date).num_days().abs();
        let window = self.config.date_window_days;
        let max = self.config.date_max_days;

        if days <= window {
            dec!(1)
        } else if days >= max || max <= window {
            Decimal::ZERO
        } else {
            dec!(1) - Decimal::from(days - window) / Decimal::from(max - window)
        }
    }
}

/// Token containment of the favored-party name within the bank text:
/// the fraction of the name's tokens that appear in the bank's
/// counterpart/description text. 1.0 when every token is present.
fn text_similarity(bank_text: &str, favored_party: &str) -> Decimal {
    let bank_tokens = tokenize(bank_text);
    let party_tokens = tokenize(favored_party);

    if party_tokens.is_empty() {
        return Decimal::ZERO;
    }

    let present = party_tokens.intersection(&bank_tokens).count();
    Decimal::from(present as u64) / Decimal::from(party_tokens.len() as u64)
}

fn tokenize(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 2)
        .map(|t| t.to_uppercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};
    use core_kernel::{AccountId, CostCenterId, Currency};
    use domain_ledger::{CostCategory, LedgerKind, Sector};

    use crate::transaction::RawTransaction;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn debit_transaction(minor: i64, on: NaiveDate, counterpart: &str) -> BankTransaction {
        let raw = RawTransaction {
            external_id: "ext-1".to_string(),
            occurred_at: Utc
                .from_utc_datetime(&on.and_hms_opt(12, 0, 0).unwrap()),
            credit: Money::zero(Currency::Brl),
            debit: Money::from_minor(minor, Currency::Brl),
            counterpart_name: counterpart.to_string(),
            description: "PIX ENVIADO".to_string(),
        };
        BankTransaction::from_raw(AccountId::new(), raw).unwrap()
    }

    fn payable(minor: i64, due: NaiveDate, party: &str) -> LedgerRecord {
        LedgerRecord::new(
            LedgerKind::Payable,
            "Compra de materiais",
            party,
            Money::from_minor(minor, Currency::Brl),
            due,
            CostCenterId::new(),
            CostCategory::Material,
            Sector::Works,
        )
    }

    #[test]
    fn test_exact_match_scores_first_with_high_confidence() {
        let tx = debit_transaction(100_000, date(2024, 3, 10), "ACME LTDA");
        let exact = payable(100_000, date(2024, 3, 10), "ACME LTDA");
        let near = payable(98_000, date(2024, 3, 20), "OUTRA EMPRESA SA");

        let engine = MatchingEngine::default();
        let suggestions = engine.suggest(&tx, &[near, exact.clone()]);

        assert!(!suggestions.is_empty());
        assert_eq!(suggestions[0].record.id, exact.id);
        assert!(suggestions[0].confidence >= dec!(0.95));
    }

    #[test]
    fn test_wrong_sign_candidates_are_skipped() {
        let tx = debit_transaction(100_000, date(2024, 3, 10), "ACME LTDA");
        let receivable = LedgerRecord::new(
            LedgerKind::Receivable,
            "Assessoria mensal",
            "ACME LTDA",
            Money::from_minor(100_000, Currency::Brl),
            date(2024, 3, 10),
            CostCenterId::new(),
            CostCategory::Other,
            Sector::TechnicalAdvisory,
        );

        let engine = MatchingEngine::default();
        assert!(engine.suggest(&tx, &[receivable]).is_empty());
    }

    #[test]
    fn test_no_candidates_is_empty_not_error() {
        let tx = debit_transaction(100_000, date(2024, 3, 10), "ACME LTDA");
        let engine = MatchingEngine::default();
        assert!(engine.suggest(&tx, &[]).is_empty());
    }

    #[test]
    fn test_confidence_floor_drops_weak_candidates() {
        let tx = debit_transaction(100_000, date(2024, 3, 10), "ACME LTDA");
        // Far off in amount, date, and name
        let weak = payable(500_000, date(2024, 6, 1), "FORNECEDOR XYZ");

        let engine = MatchingEngine::default();
        assert!(engine.suggest(&tx, &[weak]).is_empty());
    }

    #[test]
    fn test_ties_break_by_earliest_due_date() {
        let tx = debit_transaction(100_000, date(2024, 3, 10), "ACME LTDA");
        let later = payable(100_000, date(2024, 3, 12), "ACME LTDA");
        let earlier = payable(100_000, date(2024, 3, 9), "ACME LTDA");

        let engine = MatchingEngine::default();
        let suggestions = engine.suggest(&tx, &[later.clone(), earlier.clone()]);

        assert_eq!(suggestions.len(), 2);
        assert_eq!(suggestions[0].record.id, earlier.id);
        assert_eq!(suggestions[1].record.id, later.id);
    }

    #[test]
    fn test_max_suggestions_truncates() {
        let tx = debit_transaction(100_000, date(2024, 3, 10), "ACME LTDA");
        let candidates: Vec<LedgerRecord> = (0..8)
            .map(|i| payable(100_000, date(2024, 3, 8 + i), "ACME LTDA"))
            .collect();

        let engine = MatchingEngine::default();
        let suggestions = engine.suggest(&tx, &candidates);
        assert_eq!(suggestions.len(), engine.config().max_suggestions);
    }

    #[test]
    fn test_amount_decay_is_linear_to_tolerance() {
        let engine = MatchingEngine::default();
        let exact = engine.amount_score(
            Money::from_minor(100_000, Currency::Brl),
            Money::from_minor(100_000, Currency::Brl),
        );
        assert_eq!(exact, dec!(1));

        // 5% tolerance of 100000 is 5000; half-way out scores 0.5
        let half = engine.amount_score(
            Money::from_minor(100_000, Currency::Brl),
            Money::from_minor(97_500, Currency::Brl),
        );
        assert_eq!(half, dec!(0.5));

        let outside = engine.amount_score(
            Money::from_minor(100_000, Currency::Brl),
            Money::from_minor(90_000, Currency::Brl),
        );
        assert_eq!(outside, Decimal::ZERO);
    }

    #[test]
    fn test_small_amounts_use_floor_tolerance() {
        let engine = MatchingEngine::default();
        // 5% of 100 centavos is 5; the floor of 100 applies instead
        let score = engine.amount_score(
            Money::from_minor(100, Currency::Brl),
            Money::from_minor(150, Currency::Brl),
        );
        assert_eq!(score, dec!(0.5));
    }

    #[test]
    fn test_text_similarity_containment() {
        assert_eq!(
            text_similarity("PIX ENVIADO - ACME LTDA", "ACME LTDA"),
            dec!(1)
        );
        assert_eq!(
            text_similarity("TED RECEBIDO - SILVA CONSTRUCOES", "ACME LTDA"),
            Decimal::ZERO
        );
        assert_eq!(text_similarity("qualquer texto", ""), Decimal::ZERO);
    }
}
