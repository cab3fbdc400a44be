//! Rotation state under concurrency and across restarts

mod common;

use std::sync::Arc;

use common::{allow_up_to, incoming, MockExecutor, MockPublisher};
use paykit_autopay::{
    AutoPayConfig, AutoPayEngine, ExecutionBudget, MemoryStore, RotationConfig, RotationPolicy,
    RotationReason, SpendingPeriod,
};
use tempfile::tempdir;
use tokio::task::JoinSet;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_uses_are_all_counted() {
    let engine = AutoPayEngine::in_memory(AutoPayConfig::new("me")).unwrap();
    let rotation = Arc::clone(engine.rotation());
    rotation
        .update_method_settings("lightning", RotationPolicy::Manual, 1)
        .await
        .unwrap();

    let mut tasks = JoinSet::new();
    for _ in 0..50 {
        let rotation = Arc::clone(&rotation);
        tasks.spawn(async move { rotation.record_use("lightning").await });
    }
    while let Some(result) = tasks.join_next().await {
        assert!(!result.unwrap().unwrap());
    }

    assert_eq!(
        rotation.method_settings("lightning").await.unwrap().use_count,
        50
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_threshold_is_reported_exactly_once_per_cycle() {
    let engine = AutoPayEngine::in_memory(AutoPayConfig::new("me")).unwrap();
    let rotation = Arc::clone(engine.rotation());
    rotation
        .update_method_settings("onchain", RotationPolicy::AfterUses, 5)
        .await
        .unwrap();

    let mut tasks = JoinSet::new();
    for _ in 0..5 {
        let rotation = Arc::clone(&rotation);
        tasks.spawn(async move { rotation.record_use("onchain").await });
    }
    let mut due = 0;
    while let Some(result) = tasks.join_next().await {
        if result.unwrap().unwrap() {
            due += 1;
        }
    }
    assert_eq!(due, 1, "only the fifth use crosses the threshold");
}

#[tokio::test]
async fn test_rotation_state_survives_restart() {
    let dir = tempdir().unwrap();

    {
        let engine = AutoPayEngine::open(dir.path(), AutoPayConfig::new("me")).unwrap();
        let rotation = engine.rotation();
        rotation
            .set_config(&RotationConfig {
                default_threshold: 3,
                ..Default::default()
            })
            .await
            .unwrap();
        rotation
            .update_method_settings("onchain", RotationPolicy::AfterUses, 2)
            .await
            .unwrap();
        rotation.record_use("onchain").await.unwrap();
        rotation
            .record_rotation("lightning", RotationReason::Manual)
            .await
            .unwrap();
        engine
            .ledger()
            .set_peer_limit("pk:bob", 7_000, SpendingPeriod::Weekly)
            .await
            .unwrap();
    }

    let engine = AutoPayEngine::open(dir.path(), AutoPayConfig::new("me")).unwrap();
    let rotation = engine.rotation();
    assert_eq!(rotation.config().await.unwrap().default_threshold, 3);

    let onchain = rotation.method_settings("onchain").await.unwrap();
    assert_eq!(onchain.policy, RotationPolicy::AfterUses);
    assert_eq!(onchain.use_count, 1);
    assert!(rotation.record_use("onchain").await.unwrap());

    let history = rotation.history().await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].method_id, "lightning");

    let methods: Vec<_> = rotation
        .list_methods()
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.method_id)
        .collect();
    assert_eq!(methods, ["lightning", "onchain"]);

    let limit = engine.ledger().peer_limit("pk:bob").await.unwrap();
    assert_eq!(limit.limit_sats, 7_000);
    assert_eq!(limit.period, SpendingPeriod::Weekly);
}

#[tokio::test]
async fn test_payments_drive_rotation_per_method() {
    let engine = AutoPayEngine::new(Arc::new(MemoryStore::new()), AutoPayConfig::new("me")).unwrap();
    engine.settings().save(&allow_up_to(10_000)).await.unwrap();
    engine
        .rotation()
        .update_method_settings("onchain", RotationPolicy::Manual, 1)
        .await
        .unwrap();
    let publisher = MockPublisher::new();
    let orchestrator = engine.orchestrator(MockExecutor::succeeding(), publisher.clone());

    for method in ["lightning", "onchain", "lightning"] {
        orchestrator
            .process(
                incoming("pk:bob", 100, method),
                ExecutionBudget::new(std::time::Duration::from_secs(10)),
            )
            .await
            .unwrap();
    }

    assert_eq!(publisher.rotations(), ["lightning", "lightning"]);
    let rotation = engine.rotation();
    assert_eq!(rotation.total_rotations().await.unwrap(), 2);
    assert_eq!(rotation.method_settings("onchain").await.unwrap().use_count, 1);
    assert_eq!(rotation.methods_with_rotations().await.unwrap(), ["lightning"]);
}
