//! End-to-end reconciliation pipeline tests: callback in, credit and
//! notifications out.

mod common;

use chipvault::currency::Currency;
use chipvault::reconcile::CallbackEvent;
use chipvault::store::WithdrawalRecord;
use common::{Harness, OPS_CHANNEL};
use rust_decimal::Decimal;

fn event(address: &str, tx_hash: &str, confirmations: u32, sats: u64) -> CallbackEvent {
    CallbackEvent {
        tx_hash: tx_hash.to_string(),
        confirmations,
        address: address.to_string(),
        value: Decimal::from(sats),
        currency: Currency::Btc,
    }
}

/// Half a BTC at $60,000 credits exactly $30,000.
#[tokio::test]
async fn confirmed_deposit_credits_usd_value() {
    let h = Harness::new(60_000);
    let address = h.bind_address("U1", Currency::Btc).await;

    h.reconciler
        .process(event(&address, "tx1", 1, 50_000_000))
        .await;

    assert_eq!(
        h.ledger.balance("U1").await.unwrap(),
        Decimal::from(30_000)
    );

    let history = h.deposits.history("U1").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].amount, Decimal::from(30_000));
    assert_eq!(history[0].tx_hash, "tx1");

    // Operations channel got exactly one broadcast.
    let posts = h.notifier.posts_to(OPS_CHANNEL);
    assert_eq!(posts.len(), 1);
    assert!(posts[0].contains("U1"));
    assert!(posts[0].contains("30000.00"));
}

/// Redelivered confirmation callbacks must not double-credit.
#[tokio::test]
async fn redelivered_confirmation_credits_once() {
    let h = Harness::new(60_000);
    let address = h.bind_address("U1", Currency::Btc).await;

    h.reconciler
        .process(event(&address, "tx1", 1, 50_000_000))
        .await;
    h.reconciler
        .process(event(&address, "tx1", 1, 50_000_000))
        .await;

    assert_eq!(
        h.ledger.balance("U1").await.unwrap(),
        Decimal::from(30_000)
    );
    assert_eq!(h.deposits.history("U1").await.unwrap().len(), 1);
    assert_eq!(h.notifier.posts_to(OPS_CHANNEL).len(), 1);
}

/// Confirmations 0 then 1: one pending notice, one confirmed notice, in
/// that order, and one credit.
#[tokio::test]
async fn pending_then_confirmed_notifies_in_order() {
    let h = Harness::new(60_000);
    let address = h.bind_address("U1", Currency::Btc).await;

    h.reconciler
        .process(event(&address, "tx1", 0, 50_000_000))
        .await;
    assert_eq!(h.ledger.balance("U1").await.unwrap(), Decimal::ZERO);

    h.reconciler
        .process(event(&address, "tx1", 1, 50_000_000))
        .await;

    let dms = h.notifier.dms.lock().unwrap();
    assert_eq!(dms.len(), 2);
    assert!(dms[0].1.is_pending());
    assert_eq!(dms[0].1.confirmations, 0);
    assert!(!dms[1].1.is_pending());
    assert_eq!(dms[1].1.confirmations, 1);
    drop(dms);

    assert_eq!(
        h.ledger.balance("U1").await.unwrap(),
        Decimal::from(30_000)
    );
}

/// Confirmation counts above 1 are silent: no notice, no credit.
#[tokio::test]
async fn high_confirmation_counts_are_silent() {
    let h = Harness::new(60_000);
    let address = h.bind_address("U1", Currency::Btc).await;

    h.reconciler
        .process(event(&address, "tx9", 2, 50_000_000))
        .await;

    assert_eq!(h.notifier.dm_count(), 0);
    assert_eq!(h.ledger.balance("U1").await.unwrap(), Decimal::ZERO);
}

/// A callback for an address nobody owns is a logged no-op.
#[tokio::test]
async fn unbound_address_is_a_no_op() {
    let h = Harness::new(60_000);
    h.bind_address("U1", Currency::Btc).await;

    h.reconciler
        .process(event("someone-elses-address", "tx1", 1, 50_000_000))
        .await;

    assert_eq!(h.notifier.dm_count(), 0);
    assert_eq!(h.ledger.balance("U1").await.unwrap(), Decimal::ZERO);
    assert!(h.deposits.history("U1").await.unwrap().is_empty());
}

/// Same hash in a different currency is a distinct credit.
#[tokio::test]
async fn same_hash_different_currency_credits_separately() {
    let h = Harness::new(100);
    let btc_addr = h.bind_address("U1", Currency::Btc).await;
    let ltc_addr = h.bind_address("U1", Currency::Ltc).await;

    h.reconciler
        .process(event(&btc_addr, "txX", 1, 100_000_000))
        .await;
    let mut ltc_event = event(&ltc_addr, "txX", 1, 100_000_000);
    ltc_event.currency = Currency::Ltc;
    h.reconciler.process(ltc_event).await;

    assert_eq!(h.ledger.balance("U1").await.unwrap(), Decimal::from(200));
    assert_eq!(h.deposits.history("U1").await.unwrap().len(), 2);
}

/// Outbound payments reuse the deposit callback shape; a matching
/// withdrawal message binding gets patched with the tx link.
#[tokio::test]
async fn payment_callback_patches_processing_message() {
    let h = Harness::new(60_000);

    h.withdrawals
        .record(
            "U2",
            WithdrawalRecord::new(Currency::Btc, Decimal::from(100), "pending", "dest-addr")
                .with_message(77, 1234),
        )
        .await
        .unwrap();

    h.reconciler
        .process(event("dest-addr", "tx-out", 3, 1_000_000))
        .await;

    let patches = h.notifier.patches.lock().unwrap();
    assert_eq!(patches.len(), 1);
    assert_eq!((patches[0].0, patches[0].1), (77, 1234));
    assert!(
        patches[0]
            .2
            .contains("blockchair.com/bitcoin/transaction/tx-out")
    );
}
