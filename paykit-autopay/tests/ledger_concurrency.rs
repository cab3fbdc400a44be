//! Concurrency stress tests for LimitLedger
//!
//! These tests verify that concurrent reservations never lose updates on
//! either the per-peer or the global counter.

mod common;

use std::sync::Arc;

use common::engine_with;
use paykit_autopay::{AutoPayError, GlobalSettings, LimitScope, SpendingPeriod};
use tokio::task::JoinSet;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reserves_on_one_peer_fit_exactly() {
    let engine = engine_with(GlobalSettings::default().with_global_daily_limit(1_000_000)).await;
    let ledger = Arc::clone(engine.ledger());
    ledger
        .set_peer_limit("pk:bob", 10_000, SpendingPeriod::Daily)
        .await
        .unwrap();

    let mut tasks = JoinSet::new();
    for _ in 0..20 {
        let ledger = Arc::clone(&ledger);
        tasks.spawn(async move { ledger.reserve("pk:bob", 1_000).await });
    }

    let mut reservations = Vec::new();
    let mut refused = 0;
    while let Some(result) = tasks.join_next().await {
        match result.unwrap() {
            Ok(reservation) => reservations.push(reservation),
            Err(AutoPayError::LimitExceeded { scope, .. }) => {
                assert_eq!(scope, LimitScope::Peer);
                refused += 1;
            }
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(reservations.len(), 10, "exactly the amounts that fit are reserved");
    assert_eq!(refused, 10);
    assert_eq!(ledger.peer_limit("pk:bob").await.unwrap().spent_sats, 10_000);
    assert_eq!(ledger.global_spend().await.unwrap().spent_sats, 10_000);
    assert_eq!(ledger.pending_reservations().await.unwrap().len(), 10);

    for reservation in reservations {
        ledger.commit(reservation).await.unwrap();
    }
    assert!(ledger.pending_reservations().await.unwrap().is_empty());
    assert_eq!(ledger.peer_limit("pk:bob").await.unwrap().spent_sats, 10_000);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_global_limit_holds_across_peers() {
    let engine = engine_with(GlobalSettings::default().with_global_daily_limit(5_000)).await;
    let ledger = Arc::clone(engine.ledger());

    let mut tasks = JoinSet::new();
    for i in 0..10 {
        let ledger = Arc::clone(&ledger);
        tasks.spawn(async move { ledger.reserve(&format!("pk:peer{i}"), 1_000).await });
    }

    let mut approved = 0;
    while let Some(result) = tasks.join_next().await {
        match result.unwrap() {
            Ok(_reservation) => approved += 1,
            Err(AutoPayError::LimitExceeded { scope, .. }) => {
                assert_eq!(scope, LimitScope::Global)
            }
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(approved, 5);
    assert_eq!(ledger.global_spend().await.unwrap().spent_sats, 5_000);

    // Every refused peer was left untouched
    let total: u64 = ledger
        .list_peer_limits()
        .await
        .unwrap()
        .iter()
        .map(|limit| limit.spent_sats)
        .sum();
    assert_eq!(total, 5_000);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_interleaved_reserve_and_rollback_return_to_zero() {
    let engine = engine_with(GlobalSettings::default().with_global_daily_limit(1_000_000)).await;
    let ledger = Arc::clone(engine.ledger());

    let mut tasks = JoinSet::new();
    for i in 0..50u64 {
        let ledger = Arc::clone(&ledger);
        let peer = format!("pk:peer{}", i % 3);
        tasks.spawn(async move {
            let reservation = ledger.reserve(&peer, 100 + i).await?;
            tokio::task::yield_now().await;
            ledger.rollback(reservation).await
        });
    }
    while let Some(result) = tasks.join_next().await {
        result.unwrap().unwrap();
    }

    assert_eq!(ledger.global_spend().await.unwrap().spent_sats, 0);
    for limit in ledger.list_peer_limits().await.unwrap() {
        assert_eq!(limit.spent_sats, 0, "peer {} not restored", limit.peer_id);
    }
    assert!(ledger.pending_reservations().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_record_payment_counts_like_reserve_and_commit() {
    let engine = engine_with(GlobalSettings::default()).await;
    let ledger = engine.ledger();
    ledger
        .set_peer_limit("pk:bob", 2_000, SpendingPeriod::Weekly)
        .await
        .unwrap();

    ledger.record_payment("pk:bob", 1_500).await.unwrap();
    assert!(ledger.pending_reservations().await.unwrap().is_empty());

    let err = ledger.record_payment("pk:bob", 600).await.unwrap_err();
    assert!(matches!(
        err,
        AutoPayError::LimitExceeded {
            scope: LimitScope::Peer,
            requested_sats: 600,
            remaining_sats: 500,
        }
    ));
    assert_eq!(ledger.peer_limit("pk:bob").await.unwrap().spent_sats, 1_500);
}
