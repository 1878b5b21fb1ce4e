//! Concurrency tests for the resource guard on a real SQLite ledger.

mod common;

use common::{TestLedger, ALICE, BOB};
use coop_events::items::codes::{EMPTY_GIFTBOX, WOOD};
use coop_events::items::{ResourceGuard, TransferOutcome};
use coop_events::ledger::ItemManifest;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Barrier;
use tokio::time::Instant;

/// Run `attempt` on `tasks` tasks released at the same instant.
async fn race<F, Fut>(tasks: usize, attempt: F) -> Vec<bool>
where
    F: Fn(usize) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = bool> + Send + 'static,
{
    let barrier = Arc::new(Barrier::new(tasks));
    let attempt = Arc::new(attempt);
    let handles: Vec<_> = (0..tasks)
        .map(|i| {
            let barrier = barrier.clone();
            let attempt = attempt.clone();
            tokio::spawn(async move {
                barrier.wait().await;
                attempt(i).await
            })
        })
        .collect();

    let mut results = Vec::with_capacity(tasks);
    for handle in handles {
        results.push(handle.await.unwrap());
    }
    results
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_last_item_is_used_exactly_once() {
    let ledger = TestLedger::new();
    let guard = ledger.guard();
    guard.add(ALICE, WOOD, 1, "Seed").await.unwrap();

    let results = race(8, move |_| {
        let guard = guard.clone();
        async move { guard.use_item(ALICE, WOOD, 1, "Race").await.unwrap() }
    })
    .await;

    assert_eq!(results.iter().filter(|ok| **ok).count(), 1);
    assert_eq!(ledger.guard().quantity(ALICE, WOOD).await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_separate_connections_cannot_double_spend() {
    let ledger = TestLedger::new();
    ledger.guard().add(ALICE, WOOD, 3, "Seed").await.unwrap();

    let guards: Vec<ResourceGuard> = (0..6)
        .map(|_| ResourceGuard::new(ledger.reopen()))
        .collect();
    let guards = Arc::new(guards);
    let results = race(6, move |i| {
        let guard = guards[i].clone();
        async move { guard.use_item(ALICE, WOOD, 1, "Race").await.unwrap() }
    })
    .await;

    assert_eq!(results.iter().filter(|ok| **ok).count(), 3);
    assert_eq!(ledger.guard().quantity(ALICE, WOOD).await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_gifts_never_overdraw() {
    let ledger = TestLedger::new();
    let guard = ledger.guard();
    guard.add(ALICE, EMPTY_GIFTBOX, 2, "Seed").await.unwrap();
    guard.add(ALICE, WOOD, 5, "Seed").await.unwrap();

    let results = race(10, move |_| {
        let guard = guard.clone();
        async move {
            let consume = ItemManifest::single(EMPTY_GIFTBOX, 1).with(WOOD, 1);
            let grant = ItemManifest::single(WOOD, 1);
            match guard
                .transfer_or_nothing(ALICE, &consume, BOB, &grant, "Gift")
                .await
                .unwrap()
            {
                TransferOutcome::Completed { .. } => true,
                TransferOutcome::Insufficient => false,
            }
        }
    })
    .await;

    let guard = ledger.guard();
    assert_eq!(results.iter().filter(|ok| **ok).count(), 2);
    assert_eq!(guard.quantity(ALICE, EMPTY_GIFTBOX).await.unwrap(), 0);
    assert_eq!(guard.quantity(ALICE, WOOD).await.unwrap(), 3);
    assert_eq!(guard.quantity(BOB, WOOD).await.unwrap(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_grants_are_not_lost() {
    let ledger = TestLedger::new();
    let guard = ledger.guard();

    race(16, move |_| {
        let guard = guard.clone();
        async move {
            guard.add(ALICE, WOOD, 2, "Chop").await.unwrap();
            true
        }
    })
    .await;

    let guard = ledger.guard();
    assert_eq!(guard.quantity(ALICE, WOOD).await.unwrap(), 32);
    let grants = guard.transactions_since(0).await.unwrap();
    assert_eq!(grants.len(), 16);
    assert!(grants.iter().all(|r| r.delta == 2 && r.item_code == WOOD));
}

// Single-threaded runtime: a guard call that blocked its worker would also
// stall the sleep below until the busy timeout ran out.
#[tokio::test]
async fn test_locked_database_does_not_stall_other_tasks() {
    let ledger = TestLedger::new();
    let holder = rusqlite::Connection::open(ledger.db_path()).unwrap();
    holder.execute_batch("BEGIN IMMEDIATE").unwrap();

    let guard = ledger.guard();
    let add = tokio::spawn(async move { guard.add(ALICE, WOOD, 1, "Chop").await });

    let started = Instant::now();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(!add.is_finished());

    holder.execute_batch("COMMIT").unwrap();
    assert_eq!(add.await.unwrap().unwrap(), 1);
    assert_eq!(ledger.guard().quantity(ALICE, WOOD).await.unwrap(), 1);
}
