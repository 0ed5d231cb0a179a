//! End-to-end ledger scenarios against the in-memory store.

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::future::join_all;
use rust_decimal::Decimal;

use payledger::config::LedgerConfig;
use payledger::notify::Notifier;
use payledger::withdrawal::BankDetails;
use payledger::{
    AccountId, Actor, Destination, LedgerEngine, LedgerError, MemorySettings, MemoryStore,
    Transaction, TransactionStatus, Withdrawal, WithdrawalStatus, WithdrawalUpdate,
};

fn d(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

const OPERATOR: Actor = Actor::Admin(1);

fn engine() -> LedgerEngine {
    LedgerEngine::in_memory(&LedgerConfig::default())
}

async fn funded(engine: &LedgerEngine, balance: &str) -> AccountId {
    let acc = engine.ledger().open_account("USD").await.unwrap();
    let amount = d(balance);
    if !amount.is_zero() {
        engine
            .payments()
            .admin_credit(OPERATOR, acc.account_id, amount, Some("opening balance"))
            .await
            .unwrap();
    }
    acc.account_id
}

async fn balance(engine: &LedgerEngine, id: AccountId) -> Decimal {
    engine.ledger().get_account(id).await.unwrap().balance()
}

fn bank() -> Destination {
    Destination::BankTransfer(BankDetails {
        bank_name: "First Bank".into(),
        account_number: "000123456789".into(),
        routing_number: None,
        account_holder_name: "Grace Hopper".into(),
        bank_country: Some("US".into()),
    })
}

async fn pending_withdrawal(engine: &LedgerEngine, account: AccountId, amount: &str) -> Withdrawal {
    engine
        .withdrawals()
        .request_withdrawal(Actor::User(account), account, d(amount), bank())
        .await
        .unwrap()
}

// ============================================================
// Scenarios
// ============================================================

#[tokio::test]
async fn scenario_transfer_with_fee() {
    let engine = engine();
    let sender = funded(&engine, "100.00").await;
    let receiver = funded(&engine, "0").await;

    let receipt = engine
        .payments()
        .send_payment(Actor::User(sender), sender, receiver, d("30.00"), Some("concert tickets"))
        .await
        .unwrap();

    let txn = &receipt.transaction;
    assert_eq!(txn.status, TransactionStatus::Completed);
    assert_eq!(txn.amount, d("30.00"));
    assert_eq!(txn.fee, d("1.17"));
    assert_eq!(txn.net_amount, d("28.83"));
    assert_eq!(balance(&engine, sender).await, d("70.00"));
    assert_eq!(balance(&engine, receiver).await, d("28.83"));
}

#[tokio::test]
async fn scenario_withdrawal_happy_path() {
    let engine = engine();
    let acc = funded(&engine, "500.00").await;

    let w = pending_withdrawal(&engine, acc, "200.00").await;
    assert_eq!(balance(&engine, acc).await, d("300.00"));

    let done = engine
        .withdrawals()
        .update_withdrawal(
            OPERATOR,
            w.id,
            WithdrawalUpdate {
                status: Some(WithdrawalStatus::Completed),
                fee: Some(d("5.00")),
                clearance_fee: Some(d("2.00")),
                admin_notes: None,
            },
        )
        .await
        .unwrap();

    assert_eq!(done.status, WithdrawalStatus::Completed);
    assert_eq!(done.net_amount, d("193.00"));
    assert_eq!(done.admin_id, Some(1));
    assert!(done.completed_at.is_some());
    assert_eq!(balance(&engine, acc).await, d("300.00"));

    let mirror = engine.payments().get_transaction(&w.reference_id).await.unwrap();
    assert_eq!(mirror.status, TransactionStatus::Completed);
    assert_eq!(mirror.fee, d("7.00"));
    assert_eq!(mirror.net_amount, d("193.00"));
}

#[tokio::test]
async fn scenario_withdrawal_cancellation_refunds_full_amount() {
    let engine = engine();
    let acc = funded(&engine, "500.00").await;
    let w = pending_withdrawal(&engine, acc, "200.00").await;

    engine
        .withdrawals()
        .update_withdrawal_fees(OPERATOR, w.id, d("5.00"), d("2.00"))
        .await
        .unwrap();
    let cancelled = engine
        .withdrawals()
        .update_withdrawal_status(OPERATOR, w.id, WithdrawalStatus::Cancelled)
        .await
        .unwrap();

    assert_eq!(cancelled.status, WithdrawalStatus::Cancelled);
    assert_eq!(balance(&engine, acc).await, d("500.00"));
    let mirror = engine.payments().get_transaction(&w.reference_id).await.unwrap();
    assert_eq!(mirror.status, TransactionStatus::Cancelled);
}

#[tokio::test]
async fn scenario_fee_update_exceeding_amount_rejected() {
    let engine = engine();
    let acc = funded(&engine, "100.00").await;
    let w = pending_withdrawal(&engine, acc, "50.00").await;

    let err = engine
        .withdrawals()
        .update_withdrawal_fees(OPERATOR, w.id, d("30.00"), d("25.00"))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::FeeConfiguration(_)));

    let unchanged = engine.withdrawals().get_withdrawal(w.id).await.unwrap();
    assert_eq!(unchanged, w);
}

#[tokio::test]
async fn scenario_insufficient_funds_creates_nothing() {
    let engine = engine();
    let sender = funded(&engine, "10.00").await;
    let receiver = funded(&engine, "0").await;
    let before = engine
        .payments()
        .list_account_transactions(sender, 100)
        .await
        .unwrap();

    let err = engine
        .payments()
        .send_payment(Actor::User(sender), sender, receiver, d("50.00"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientFunds { .. }));

    let after = engine
        .payments()
        .list_account_transactions(sender, 100)
        .await
        .unwrap();
    assert_eq!(before.len(), after.len());
    assert_eq!(balance(&engine, sender).await, d("10.00"));
    assert_eq!(balance(&engine, receiver).await, Decimal::ZERO);
}

// ============================================================
// Properties
// ============================================================

#[tokio::test]
async fn refund_happens_once() {
    let engine = engine();
    let acc = funded(&engine, "500.00").await;
    let w = pending_withdrawal(&engine, acc, "200.00").await;
    let withdrawals = engine.withdrawals();

    withdrawals
        .update_withdrawal_status(OPERATOR, w.id, WithdrawalStatus::Cancelled)
        .await
        .unwrap();
    // second cancel is a no-op
    withdrawals
        .update_withdrawal_status(OPERATOR, w.id, WithdrawalStatus::Cancelled)
        .await
        .unwrap();
    let err = withdrawals
        .update_withdrawal_status(OPERATOR, w.id, WithdrawalStatus::Failed)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_STATE_TRANSITION");

    assert_eq!(balance(&engine, acc).await, d("500.00"));
}

#[tokio::test]
async fn transfers_conserve_money() {
    let engine = engine();
    let a = funded(&engine, "250.00").await;
    let b = funded(&engine, "75.50").await;
    let initial = d("325.50");

    let mut fees = Decimal::ZERO;
    for (from, to, amount) in [(a, b, "12.34"), (b, a, "40.00"), (a, b, "99.99"), (b, a, "0.99")] {
        let before_from = balance(&engine, from).await;
        let before_to = balance(&engine, to).await;

        let receipt = engine
            .payments()
            .send_payment(Actor::User(from), from, to, d(amount), None)
            .await
            .unwrap();
        let txn = &receipt.transaction;

        assert_eq!(txn.fee + txn.net_amount, txn.amount);
        assert_eq!(balance(&engine, from).await, before_from - txn.amount);
        assert_eq!(balance(&engine, to).await, before_to + txn.net_amount);
        fees += txn.fee;
    }

    let total = balance(&engine, a).await + balance(&engine, b).await;
    assert_eq!(total + fees, initial);
}

#[tokio::test]
async fn withdrawal_net_amount_never_negative() {
    let engine = engine();
    let acc = funded(&engine, "100.00").await;
    let w = pending_withdrawal(&engine, acc, "20.00").await;

    let exact = engine
        .withdrawals()
        .update_withdrawal_fees(OPERATOR, w.id, d("15.00"), d("5.00"))
        .await
        .unwrap();
    assert_eq!(exact.net_amount, Decimal::ZERO);

    assert!(
        engine
            .withdrawals()
            .update_withdrawal_fees(OPERATOR, w.id, d("15.00"), d("5.01"))
            .await
            .is_err()
    );
    let stored = engine.withdrawals().get_withdrawal(w.id).await.unwrap();
    assert_eq!(stored.net_amount, Decimal::ZERO);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_debits_are_linearizable() {
    let engine = engine();
    let acc = funded(&engine, "100.00").await;
    let amount = d("7.00");

    let attempts = (0..40).map(|_| {
        let engine = engine.clone();
        tokio::spawn(async move { engine.ledger().debit(acc, amount).await })
    });
    let results = join_all(attempts).await;

    let succeeded = results
        .into_iter()
        .map(|joined| joined.unwrap())
        .filter(|r| r.is_ok())
        .count();

    // floor(100 / 7)
    assert_eq!(succeeded, 14);
    assert_eq!(balance(&engine, acc).await, d("2.00"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn opposite_transfers_do_not_deadlock() {
    let engine = engine();
    let a = funded(&engine, "1000.00").await;
    let b = funded(&engine, "1000.00").await;

    let tasks = (0..20).map(|i| {
        let engine = engine.clone();
        let (from, to) = if i % 2 == 0 { (a, b) } else { (b, a) };
        tokio::spawn(async move {
            engine
                .payments()
                .send_payment(Actor::User(from), from, to, Decimal::from(10), None)
                .await
        })
    });
    let receipts: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    let fees: Decimal = receipts.iter().map(|r| r.transaction.fee).sum();
    let total = balance(&engine, a).await + balance(&engine, b).await;
    assert_eq!(total + fees, d("2000.00"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_refunds_credit_once() {
    let engine = engine();
    let acc = funded(&engine, "500.00").await;
    let w = pending_withdrawal(&engine, acc, "200.00").await;

    let tasks = (0..16).map(|i| {
        let engine = engine.clone();
        let target = if i % 2 == 0 {
            WithdrawalStatus::Cancelled
        } else {
            WithdrawalStatus::Failed
        };
        tokio::spawn(async move {
            engine
                .withdrawals()
                .update_withdrawal_status(OPERATOR, w.id, target)
                .await
        })
    });
    let results: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let final_state = engine.withdrawals().get_withdrawal(w.id).await.unwrap();
    assert!(final_state.status.is_terminal());
    for result in &results {
        match result {
            Ok(updated) => assert_eq!(updated.status, final_state.status),
            Err(err) => assert_eq!(err.code(), "INVALID_STATE_TRANSITION"),
        }
    }
    assert!(results.iter().any(|r| r.is_ok()));

    assert_eq!(balance(&engine, acc).await, d("500.00"));
    let mirror = engine.payments().get_transaction(&w.reference_id).await.unwrap();
    assert_eq!(mirror.status, final_state.status.mirror_status());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_withdrawal_requests_reserve_at_most_balance() {
    let engine = engine();
    let acc = funded(&engine, "100.00").await;

    let attempts = (0..20).map(|_| {
        let engine = engine.clone();
        tokio::spawn(async move {
            engine
                .withdrawals()
                .request_withdrawal(Actor::User(acc), acc, Decimal::from(15), bank())
                .await
        })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let reserved = results.iter().filter(|r| r.is_ok()).count();
    // floor(100 / 15)
    assert_eq!(reserved, 6);
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
    }

    assert_eq!(balance(&engine, acc).await, d("10.00"));
    let stats = engine.withdrawals().withdrawal_stats().await.unwrap();
    assert_eq!(stats.pending_withdrawals, 6);
    assert_eq!(stats.total_withdrawal_amount, d("90.00"));
}

// ============================================================
// Configuration
// ============================================================

#[tokio::test]
async fn negative_fee_setting_never_creates_money() {
    let store = Arc::new(MemoryStore::default());
    let settings = Arc::new(MemorySettings::with(&[("transfer_fee_fixed", "-1.00")]));
    let engine = LedgerEngine::new(
        store.clone(),
        settings.clone(),
        Arc::new(payledger::LogNotifier),
        &LedgerConfig::default(),
    );
    let a = funded(&engine, "100.00").await;
    let b = funded(&engine, "0").await;

    let err = engine
        .payments()
        .send_payment(Actor::User(a), a, b, d("30.00"), None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "FEE_CONFIGURATION_ERROR");
    assert_eq!(store.total_balance().unwrap(), d("100.00"));

    settings.set("transfer_fee_fixed", "0.30");
    settings.set("withdrawal_clearance_fee_percentage", "-5");
    let err = engine
        .withdrawals()
        .calculate_clearance_fee(d("100.00"), payledger::WithdrawalMethod::BankTransfer)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "FEE_CONFIGURATION_ERROR");
    assert!(err.to_string().contains("withdrawal_clearance_fee_percentage"));
}

#[tokio::test]
async fn default_account_currency_comes_from_config() {
    let config = LedgerConfig {
        currency: "EUR".into(),
        ..LedgerConfig::default()
    };
    let engine = LedgerEngine::in_memory(&config);
    let acc = engine.ledger().open_default_account().await.unwrap();
    assert_eq!(acc.currency, "EUR");
}

// ============================================================
// Notifications
// ============================================================

#[derive(Default)]
struct FailingNotifier {
    calls: AtomicUsize,
}

#[async_trait]
impl Notifier for FailingNotifier {
    async fn payment_sent(&self, _txn: &Transaction) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("smtp down")
    }

    async fn payment_received(&self, _txn: &Transaction) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("smtp down")
    }

    async fn withdrawal_fees_updated(&self, _w: &Withdrawal) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("smtp down")
    }

    async fn withdrawal_status_changed(
        &self,
        _w: &Withdrawal,
        _previous: WithdrawalStatus,
    ) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("smtp down")
    }
}

#[tokio::test]
async fn notifier_failure_keeps_committed_changes() {
    let notifier = Arc::new(FailingNotifier::default());
    let engine = LedgerEngine::new(
        Arc::new(MemoryStore::default()),
        Arc::new(MemorySettings::new()),
        notifier.clone(),
        &LedgerConfig::default(),
    );
    let sender = funded(&engine, "100.00").await;
    let receiver = funded(&engine, "0").await;

    engine
        .payments()
        .send_payment(Actor::User(sender), sender, receiver, d("30.00"), None)
        .await
        .unwrap();
    let w = pending_withdrawal(&engine, sender, "20.00").await;
    engine
        .withdrawals()
        .update_withdrawal_fees(OPERATOR, w.id, d("1.00"), d("0.50"))
        .await
        .unwrap();

    assert_eq!(notifier.calls.load(Ordering::SeqCst), 3);
    assert_eq!(balance(&engine, sender).await, d("50.00"));
    assert_eq!(balance(&engine, receiver).await, d("28.83"));
    let stored = engine.withdrawals().get_withdrawal(w.id).await.unwrap();
    assert_eq!(stored.net_amount, d("18.50"));
}
