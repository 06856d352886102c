//! End-to-end reconciliation flows over the in-memory fakes
//!
//! Exercises the service facade the way an operator session would:
//! sync, suggest, reconcile, ignore, reopen.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use rust_decimal_macros::dec;

use core_kernel::{AccountId, CostCenterId, Currency, DateRange, Money};
use domain_ledger::{CostCategory, LedgerKind, LedgerStatus, Sector};
use domain_reconciliation::{
    AccountBalance, AdapterError, Classification, LedgerTarget, ReconcileCommand,
    ReconciliationError, ReconciliationService, ReconciliationStore, SplitRequest, SplitSet,
    SyncConfig, TransactionStatus,
};
use test_utils::{
    allocation_total, brl, march, march_at_noon, march_range, InMemoryStore, LedgerRecordBuilder,
    RawTransactionBuilder, StaticBankFeed,
};

struct Harness {
    store: Arc<InMemoryStore>,
    feed: Arc<StaticBankFeed>,
    service: ReconciliationService,
    account: AccountId,
}

fn harness() -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let feed = Arc::new(StaticBankFeed::new());
    let service = ReconciliationService::new(store.clone(), feed.clone());
    Harness {
        store,
        feed,
        service,
        account: AccountId::new(),
    }
}

fn full_split() -> Vec<SplitRequest> {
    vec![SplitRequest::new(CostCenterId::new(), dec!(100))]
}

#[tokio::test]
async fn sync_is_idempotent_per_external_id() {
    let h = harness();
    h.feed
        .push_transaction(RawTransactionBuilder::new().external_id("ext-1").build());
    h.feed.push_transaction(
        RawTransactionBuilder::new()
            .external_id("ext-2")
            .credit(50_000)
            .occurred_at(march_at_noon(12))
            .build(),
    );

    let first = h.service.sync(h.account, march_range()).await.unwrap();
    assert_eq!(first.fetched, 2);
    assert_eq!(first.created, 2);
    assert!(first.is_clean());

    let second = h.service.sync(h.account, march_range()).await.unwrap();
    assert_eq!(second.created, 0);
    assert_eq!(second.updated, 2);
    assert_eq!(h.store.transaction_count(), 2);
}

#[tokio::test]
async fn sync_overwrites_mutable_fields_of_pending_records() {
    let h = harness();
    h.feed
        .push_transaction(RawTransactionBuilder::new().external_id("ext-1").build());
    h.service.sync(h.account, march_range()).await.unwrap();

    h.feed.replace_transaction(
        RawTransactionBuilder::new()
            .external_id("ext-1")
            .debit(120_000)
            .description("PIX ENVIADO ACME LTDA - CORRIGIDO")
            .build(),
    );
    let report = h.service.sync(h.account, march_range()).await.unwrap();
    assert_eq!(report.updated, 1);

    let tx = h
        .store
        .find_by_external_id(h.account, "ext-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tx.amount(), brl(120_000));
    assert_eq!(tx.status, TransactionStatus::Pending);
}

#[tokio::test]
async fn sync_never_touches_terminal_transactions() {
    let h = harness();
    h.feed
        .push_transaction(RawTransactionBuilder::new().external_id("ext-1").build());
    h.service.sync(h.account, march_range()).await.unwrap();

    let tx = h
        .store
        .find_by_external_id(h.account, "ext-1")
        .await
        .unwrap()
        .unwrap();
    h.service
        .reconcile(tx.id, None, full_split(), None)
        .await
        .unwrap();

    // The provider now reports a different amount for the same movement
    h.feed.replace_transaction(
        RawTransactionBuilder::new()
            .external_id("ext-1")
            .debit(999_999)
            .build(),
    );
    let report = h.service.sync(h.account, march_range()).await.unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(report.updated, 0);

    let after = h.store.snapshot_transaction(tx.id).unwrap();
    assert_eq!(after.status, TransactionStatus::Reconciled);
    assert_eq!(after.amount(), brl(100_000));
}

#[tokio::test]
async fn page_failure_keeps_earlier_pages_and_stops() {
    let h = harness();
    // Two 30-day pages
    let range = DateRange::new(
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        NaiveDate::from_ymd_opt(2024, 2, 29).unwrap(),
    )
    .unwrap();

    h.feed.push_transaction(
        RawTransactionBuilder::new()
            .external_id("jan")
            .occurred_at(march_at_noon(10) - chrono::Duration::days(65))
            .build(),
    );
    h.feed.push_transaction(
        RawTransactionBuilder::new()
            .external_id("feb")
            .occurred_at(march_at_noon(10) - chrono::Duration::days(30))
            .build(),
    );
    h.feed
        .fail_on_call(1, AdapterError::connection("connection reset"));

    let report = h.service.sync(h.account, range).await.unwrap();
    assert_eq!(report.created, 1);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].window.is_some());
    assert_eq!(h.feed.fetch_calls(), 2);
    assert_eq!(h.store.transaction_count(), 1);
}

#[tokio::test]
async fn page_timeout_is_reported_and_keeps_earlier_pages() {
    let h = harness();
    let service = h.service.clone().with_sync_config(SyncConfig {
        page_days: 30,
        page_timeout: Duration::from_millis(20),
    });
    // Two 30-day pages
    let range = DateRange::new(
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        NaiveDate::from_ymd_opt(2024, 2, 29).unwrap(),
    )
    .unwrap();

    h.feed.push_transaction(
        RawTransactionBuilder::new()
            .external_id("jan")
            .occurred_at(march_at_noon(10) - chrono::Duration::days(65))
            .build(),
    );
    h.feed.push_transaction(
        RawTransactionBuilder::new()
            .external_id("feb")
            .occurred_at(march_at_noon(10) - chrono::Duration::days(30))
            .build(),
    );
    // The second page hangs well past the configured timeout
    h.feed.delay_on_call(1, Duration::from_millis(500));

    let report = service.sync(h.account, range).await.unwrap();
    assert_eq!(report.created, 1);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].window.is_some());
    assert!(report.errors[0].message.contains("timed out"));
    assert_eq!(h.store.transaction_count(), 1);
}

#[tokio::test]
async fn malformed_record_is_reported_without_aborting_the_page() {
    let h = harness();
    let mut invalid = RawTransactionBuilder::new().external_id("bad").build();
    invalid.credit = brl(10); // both sides positive now
    h.feed.push_transaction(invalid);
    h.feed
        .push_transaction(RawTransactionBuilder::new().external_id("good").build());

    let report = h.service.sync(h.account, march_range()).await.unwrap();
    assert_eq!(report.created, 1);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].external_id.as_deref(), Some("bad"));
}

#[tokio::test]
async fn reconcile_settles_record_and_allocates() {
    let h = harness();
    let record = LedgerRecordBuilder::new().build();
    h.store.insert_ledger_record(record.clone());

    h.feed
        .push_transaction(RawTransactionBuilder::new().external_id("ext-1").build());
    h.service.sync(h.account, march_range()).await.unwrap();
    let tx = h
        .store
        .find_by_external_id(h.account, "ext-1")
        .await
        .unwrap()
        .unwrap();

    let splits = vec![
        SplitRequest::new(CostCenterId::new(), dec!(60)),
        SplitRequest::new(CostCenterId::new(), dec!(40)),
    ];
    let classification = Classification {
        category: CostCategory::Material,
        sector: Sector::Works,
    };
    let reconciled = h
        .service
        .reconcile(tx.id, Some(record.id), splits, Some(classification))
        .await
        .unwrap();

    assert_eq!(reconciled.status, TransactionStatus::Reconciled);
    assert_eq!(reconciled.settled_record, Some(record.id));
    assert_eq!(reconciled.allocations.len(), 2);
    assert_eq!(allocation_total(&reconciled.allocations), 100_000);
    assert_eq!(reconciled.classification, Some(classification));

    let settled = h.store.snapshot_record(record.id).unwrap();
    assert_eq!(settled.status, LedgerStatus::Paid);
    assert_eq!(settled.settled_by, Some(tx.id));
}

#[tokio::test]
async fn reconcile_without_target_creates_a_paid_record() {
    let h = harness();
    h.feed.push_transaction(
        RawTransactionBuilder::new()
            .external_id("ext-1")
            .credit(75_000)
            .counterpart("CLIENTE SILVA")
            .build(),
    );
    h.service.sync(h.account, march_range()).await.unwrap();
    let tx = h
        .store
        .find_by_external_id(h.account, "ext-1")
        .await
        .unwrap()
        .unwrap();

    let reconciled = h
        .service
        .reconcile(tx.id, None, full_split(), None)
        .await
        .unwrap();

    let record_id = reconciled.settled_record.expect("record should be linked");
    let record = h.store.snapshot_record(record_id).unwrap();
    assert_eq!(h.store.ledger_record_count(), 1);
    assert_eq!(record.kind, LedgerKind::Receivable);
    assert_eq!(record.status, LedgerStatus::Paid);
    assert_eq!(record.settled_by, Some(tx.id));
    assert_eq!(record.favored_party, "CLIENTE SILVA");
    assert_eq!(record.amount, brl(75_000));
}

#[tokio::test]
async fn allocation_residual_lands_on_the_last_split() {
    let h = harness();
    h.feed.push_transaction(
        RawTransactionBuilder::new()
            .external_id("ext-1")
            .debit(1000)
            .build(),
    );
    h.service.sync(h.account, march_range()).await.unwrap();
    let tx = h
        .store
        .find_by_external_id(h.account, "ext-1")
        .await
        .unwrap()
        .unwrap();

    let splits = vec![
        SplitRequest::new(CostCenterId::new(), dec!(33.33)),
        SplitRequest::new(CostCenterId::new(), dec!(33.33)),
        SplitRequest::new(CostCenterId::new(), dec!(33.34)),
    ];
    let reconciled = h.service.reconcile(tx.id, None, splits, None).await.unwrap();

    let minors: Vec<i64> = reconciled
        .allocations
        .iter()
        .map(|a| a.value.to_minor())
        .collect();
    assert_eq!(minors, vec![333, 333, 334]);
}

#[tokio::test]
async fn a_record_is_settled_by_at_most_one_transaction() {
    let h = harness();
    let record = LedgerRecordBuilder::new().build();
    h.store.insert_ledger_record(record.clone());

    h.feed
        .push_transaction(RawTransactionBuilder::new().external_id("ext-1").build());
    h.feed.push_transaction(
        RawTransactionBuilder::new()
            .external_id("ext-2")
            .occurred_at(march_at_noon(11))
            .build(),
    );
    h.service.sync(h.account, march_range()).await.unwrap();

    let first = h
        .store
        .find_by_external_id(h.account, "ext-1")
        .await
        .unwrap()
        .unwrap();
    let second = h
        .store
        .find_by_external_id(h.account, "ext-2")
        .await
        .unwrap()
        .unwrap();

    h.service
        .reconcile(first.id, Some(record.id), full_split(), None)
        .await
        .unwrap();

    let err = h
        .service
        .reconcile(second.id, Some(record.id), full_split(), None)
        .await
        .unwrap_err();
    assert!(err.is_invalid_state());

    let settled = h.store.snapshot_record(record.id).unwrap();
    assert_eq!(settled.settled_by, Some(first.id));
}

#[tokio::test]
async fn reconcile_with_amounts_from_a_stale_read_is_rejected() {
    let h = harness();
    let record = LedgerRecordBuilder::new().build();
    h.store.insert_ledger_record(record.clone());

    h.feed.push_transaction(
        RawTransactionBuilder::new()
            .external_id("ext-1")
            .debit(1000)
            .build(),
    );
    h.service.sync(h.account, march_range()).await.unwrap();
    let tx = h
        .store
        .find_by_external_id(h.account, "ext-1")
        .await
        .unwrap()
        .unwrap();

    // Allocations computed against the first reported amount
    let splits = SplitSet::new(full_split()).unwrap();
    let allocations = splits.allocate(tx.amount()).unwrap();

    // The provider corrects the amount before the commit lands
    h.feed.replace_transaction(
        RawTransactionBuilder::new()
            .external_id("ext-1")
            .debit(2000)
            .build(),
    );
    h.service.sync(h.account, march_range()).await.unwrap();

    let err = h
        .store
        .commit_reconcile(ReconcileCommand {
            transaction_id: tx.id,
            expected_credit: tx.credit,
            expected_debit: tx.debit,
            target: LedgerTarget::Existing(record.id),
            allocations,
            classification: None,
        })
        .await
        .unwrap_err();
    assert!(err.is_invalid_state());

    let unchanged = h.store.snapshot_transaction(tx.id).unwrap();
    assert_eq!(unchanged.status, TransactionStatus::Pending);
    assert!(unchanged.allocations.is_empty());
    assert_eq!(
        h.store.snapshot_record(record.id).unwrap().status,
        LedgerStatus::Open
    );

    // A fresh read reconciles against the corrected amount
    let reconciled = h
        .service
        .reconcile(tx.id, Some(record.id), full_split(), None)
        .await
        .unwrap();
    assert_eq!(allocation_total(&reconciled.allocations), 2000);
}

#[tokio::test]
async fn reopen_reverts_record_and_allows_a_new_split() {
    let h = harness();
    let record = LedgerRecordBuilder::new().build();
    h.store.insert_ledger_record(record.clone());

    h.feed
        .push_transaction(RawTransactionBuilder::new().external_id("ext-1").build());
    h.service.sync(h.account, march_range()).await.unwrap();
    let tx = h
        .store
        .find_by_external_id(h.account, "ext-1")
        .await
        .unwrap()
        .unwrap();

    h.service
        .reconcile(tx.id, Some(record.id), full_split(), None)
        .await
        .unwrap();

    let reopened = h.service.reopen(tx.id).await.unwrap();
    assert_eq!(reopened.status, TransactionStatus::Pending);
    assert!(reopened.allocations.is_empty());
    assert!(reopened.settled_record.is_none());

    let reverted = h.store.snapshot_record(record.id).unwrap();
    assert_eq!(reverted.status, LedgerStatus::Open);
    assert!(reverted.settled_by.is_none());

    // Only the second split survives
    let splits = vec![
        SplitRequest::new(CostCenterId::new(), dec!(50)),
        SplitRequest::new(CostCenterId::new(), dec!(50)),
    ];
    let again = h
        .service
        .reconcile(tx.id, Some(record.id), splits, None)
        .await
        .unwrap();
    assert_eq!(again.allocations.len(), 2);
    assert_eq!(allocation_total(&again.allocations), 100_000);
}

#[tokio::test]
async fn reopen_of_ignored_transaction_clears_the_reason() {
    let h = harness();
    h.feed
        .push_transaction(RawTransactionBuilder::new().external_id("ext-1").build());
    h.service.sync(h.account, march_range()).await.unwrap();
    let tx = h
        .store
        .find_by_external_id(h.account, "ext-1")
        .await
        .unwrap()
        .unwrap();

    let ignored = h
        .service
        .ignore(tx.id, "tarifa bancaria duplicada".to_string())
        .await
        .unwrap();
    assert_eq!(ignored.status, TransactionStatus::Ignored);
    assert_eq!(
        ignored.ignore_reason.as_deref(),
        Some("tarifa bancaria duplicada")
    );

    let reopened = h.service.reopen(tx.id).await.unwrap();
    assert_eq!(reopened.status, TransactionStatus::Pending);
    assert!(reopened.ignore_reason.is_none());
}

#[tokio::test]
async fn ignore_requires_a_reason() {
    let h = harness();
    h.feed
        .push_transaction(RawTransactionBuilder::new().external_id("ext-1").build());
    h.service.sync(h.account, march_range()).await.unwrap();
    let tx = h
        .store
        .find_by_external_id(h.account, "ext-1")
        .await
        .unwrap()
        .unwrap();

    let err = h.service.ignore(tx.id, "   ".to_string()).await.unwrap_err();
    assert!(err.is_validation());

    let unchanged = h.store.snapshot_transaction(tx.id).unwrap();
    assert_eq!(unchanged.status, TransactionStatus::Pending);
}

#[tokio::test]
async fn exact_match_is_ranked_first_with_high_confidence() {
    let h = harness();
    let exact = LedgerRecordBuilder::new().build();
    let near = LedgerRecordBuilder::new()
        .amount(brl(98_000))
        .due_date(march(20))
        .favored_party("OUTRA EMPRESA SA")
        .build();
    h.store.insert_ledger_record(exact.clone());
    h.store.insert_ledger_record(near);

    h.feed
        .push_transaction(RawTransactionBuilder::new().external_id("ext-1").build());
    h.service.sync(h.account, march_range()).await.unwrap();
    let tx = h
        .store
        .find_by_external_id(h.account, "ext-1")
        .await
        .unwrap()
        .unwrap();

    let suggestions = h.service.suggest(tx.id).await.unwrap();
    assert!(!suggestions.is_empty());
    assert_eq!(suggestions[0].record.id, exact.id);
    assert!(suggestions[0].confidence >= dec!(0.95));
}

#[tokio::test]
async fn suggestions_are_empty_for_terminal_transactions() {
    let h = harness();
    h.store.insert_ledger_record(LedgerRecordBuilder::new().build());

    h.feed
        .push_transaction(RawTransactionBuilder::new().external_id("ext-1").build());
    h.service.sync(h.account, march_range()).await.unwrap();
    let tx = h
        .store
        .find_by_external_id(h.account, "ext-1")
        .await
        .unwrap()
        .unwrap();

    h.service
        .ignore(tx.id, "nao aplicavel".to_string())
        .await
        .unwrap();
    assert!(h.service.suggest(tx.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn concurrent_reconciles_have_exactly_one_winner() {
    let h = harness();
    let record_a = LedgerRecordBuilder::new().build();
    let record_b = LedgerRecordBuilder::new().due_date(march(11)).build();
    h.store.insert_ledger_record(record_a.clone());
    h.store.insert_ledger_record(record_b.clone());

    h.feed
        .push_transaction(RawTransactionBuilder::new().external_id("ext-1").build());
    h.service.sync(h.account, march_range()).await.unwrap();
    let tx = h
        .store
        .find_by_external_id(h.account, "ext-1")
        .await
        .unwrap()
        .unwrap();

    let service_a = h.service.clone();
    let service_b = h.service.clone();
    let (a, b) = tokio::join!(
        service_a.reconcile(tx.id, Some(record_a.id), full_split(), None),
        service_b.reconcile(tx.id, Some(record_b.id), full_split(), None),
    );

    let winners = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
    assert_eq!(winners, 1);
    let loser_err = if a.is_ok() { b.unwrap_err() } else { a.unwrap_err() };
    assert!(loser_err.is_invalid_state());

    // Exactly one record settled, and the winner's allocations persisted
    let settled_count = [record_a.id, record_b.id]
        .iter()
        .filter(|id| h.store.snapshot_record(**id).unwrap().settled_by.is_some())
        .count();
    assert_eq!(settled_count, 1);

    let final_tx = h.store.snapshot_transaction(tx.id).unwrap();
    assert_eq!(final_tx.status, TransactionStatus::Reconciled);
    assert_eq!(final_tx.allocations.len(), 1);
}

#[tokio::test]
async fn period_summary_excludes_ignored_transactions() {
    let h = harness();
    h.feed.push_transaction(
        RawTransactionBuilder::new()
            .external_id("in")
            .credit(50_000)
            .build(),
    );
    h.feed.push_transaction(
        RawTransactionBuilder::new()
            .external_id("out")
            .debit(20_000)
            .occurred_at(march_at_noon(12))
            .build(),
    );
    h.feed.push_transaction(
        RawTransactionBuilder::new()
            .external_id("noise")
            .debit(10_000)
            .occurred_at(march_at_noon(15))
            .build(),
    );
    h.service.sync(h.account, march_range()).await.unwrap();

    let noise = h
        .store
        .find_by_external_id(h.account, "noise")
        .await
        .unwrap()
        .unwrap();
    h.service
        .ignore(noise.id, "tarifa".to_string())
        .await
        .unwrap();

    let summary = h
        .service
        .period_summary(h.account, march_range())
        .await
        .unwrap();
    assert_eq!(summary.credits, brl(50_000));
    assert_eq!(summary.debits, brl(20_000));
    assert_eq!(summary.net, brl(30_000));
    assert_eq!(summary.transaction_count, 2);
}

#[tokio::test]
async fn period_summary_rejects_mixed_currencies_without_panicking() {
    let h = harness();
    h.feed.push_transaction(
        RawTransactionBuilder::new()
            .external_id("real")
            .credit(50_000)
            .build(),
    );
    let mut dollar = RawTransactionBuilder::new()
        .external_id("dollar")
        .occurred_at(march_at_noon(12))
        .build();
    dollar.credit = Money::from_minor(10_000, Currency::Usd);
    dollar.debit = Money::zero(Currency::Usd);
    h.feed.push_transaction(dollar);
    h.service.sync(h.account, march_range()).await.unwrap();

    let err = h
        .service
        .period_summary(h.account, march_range())
        .await
        .unwrap_err();
    assert!(matches!(err, ReconciliationError::Persistence(_)));
}

#[tokio::test]
async fn balance_is_served_from_the_provider() {
    let h = harness();
    h.feed.set_balance(AccountBalance {
        available: brl(1_234_56),
        blocked: brl(100_00),
    });

    let balance = h.service.balance(h.account).await.unwrap();
    assert_eq!(balance.available, brl(1_234_56));
    assert_eq!(balance.blocked, brl(100_00));
}
