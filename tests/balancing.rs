//! Target selection and runtime reconfiguration through the engine.

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::json;

use common::{always_ok, config, pool, terminal_events, Calls};
use delivery_engine::config::{BalancingStrategy, TargetConfig};
use delivery_engine::load_balancer::PoolHealth;
use delivery_engine::rng::SharedRng;
use delivery_engine::{DeliveryEngine, DeliveryState, Shutdown, SubmitError, TargetError, WorkItem};

#[tokio::test]
async fn test_round_robin_visits_every_target() {
    let calls = Calls::default();
    let mut cfg = config(vec![pool(
        "hooks",
        BalancingStrategy::RoundRobin,
        &[("a", 1), ("b", 1), ("c", 1)],
    )]);
    cfg.engine.workers = 1;
    let engine = DeliveryEngine::new(cfg, always_ok(calls.clone())).unwrap();
    let mut events = engine.subscribe();

    for n in 0..6 {
        engine.submit(WorkItem::new("hooks", json!(n))).unwrap();
    }
    let shutdown = Shutdown::new();
    let _workers = engine.start(&shutdown);
    terminal_events(&mut events, 6).await;

    let targets = calls.targets();
    let first_round: HashSet<_> = targets[..3].iter().collect();
    assert_eq!(first_round.len(), 3);
    for name in ["a", "b", "c"] {
        assert_eq!(calls.count_for(name), 2);
    }

    shutdown.trigger();
}

#[tokio::test]
async fn test_weighted_distribution_follows_weights() {
    let calls = Calls::default();
    let mut cfg = config(vec![pool(
        "hooks",
        BalancingStrategy::WeightedRoundRobin,
        &[("heavy", 3), ("light", 1)],
    )]);
    cfg.engine.workers = 4;
    let engine = DeliveryEngine::builder(cfg)
        .executor(always_ok(calls.clone()))
        .rng(Arc::new(SharedRng::seeded(7)))
        .build()
        .unwrap();
    let mut events = engine.subscribe();
    let shutdown = Shutdown::new();
    let _workers = engine.start(&shutdown);

    for n in 0..400 {
        engine.submit(WorkItem::new("hooks", json!(n))).unwrap();
    }
    let done = terminal_events(&mut events, 400).await;
    assert!(done.iter().all(|e| e.state == DeliveryState::Succeeded));

    let heavy_share = calls.count_for("heavy") as f64 / 400.0;
    assert!(
        (0.68..=0.82).contains(&heavy_share),
        "heavy target got {heavy_share:.2} of traffic"
    );

    shutdown.trigger();
}

#[tokio::test]
async fn test_hash_strategy_pins_affinity_key() {
    let calls = Calls::default();
    let engine = DeliveryEngine::new(
        config(vec![pool(
            "hooks",
            BalancingStrategy::Hash,
            &[("a", 1), ("b", 1), ("c", 1)],
        )]),
        always_ok(calls.clone()),
    )
    .unwrap();
    let mut events = engine.subscribe();
    let shutdown = Shutdown::new();
    let _workers = engine.start(&shutdown);

    for n in 0..8 {
        engine
            .submit(WorkItem::new("hooks", json!(n)).with_affinity_key("customer-17"))
            .unwrap();
    }
    let done = terminal_events(&mut events, 8).await;

    let targets: HashSet<_> = done.iter().map(|e| e.target.clone()).collect();
    assert_eq!(targets.len(), 1);

    shutdown.trigger();
}

#[tokio::test]
async fn test_apply_config_reshapes_pools_live() {
    let calls = Calls::default();
    let mut cfg = config(vec![pool("hooks", BalancingStrategy::RoundRobin, &[("a", 1)])]);
    cfg.engine.workers = 1;
    let engine = DeliveryEngine::new(cfg.clone(), always_ok(calls.clone())).unwrap();
    let mut events = engine.subscribe();
    let shutdown = Shutdown::new();
    let _workers = engine.start(&shutdown);

    let mut updated = cfg.clone();
    updated.pools = vec![
        pool("hooks", BalancingStrategy::RoundRobin, &[("a", 1), ("b", 1)]),
        pool("alerts", BalancingStrategy::Random, &[("pager", 1)]),
    ];
    engine.apply_config(updated).unwrap();

    for n in 0..4 {
        engine.submit(WorkItem::new("hooks", json!(n))).unwrap();
    }
    engine.submit(WorkItem::new("alerts", json!("page"))).unwrap();
    terminal_events(&mut events, 5).await;

    assert_eq!(calls.count_for("a"), 2);
    assert_eq!(calls.count_for("b"), 2);
    assert_eq!(calls.count_for("pager"), 1);

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.pools.len(), 2);
    assert_eq!(
        snapshot.pool("alerts").unwrap().strategy,
        BalancingStrategy::Random
    );

    // Dropping a pool rejects new submissions for it.
    engine.apply_config(cfg).unwrap();
    assert!(matches!(
        engine.submit(WorkItem::new("alerts", json!(null))),
        Err(SubmitError::UnknownPool(name)) if name == "alerts"
    ));
    assert!(engine.snapshot().pool("hooks").unwrap().target("b").is_none());

    shutdown.trigger();
}

#[tokio::test]
async fn test_invalid_config_is_rejected_and_previous_kept() {
    let cfg = config(vec![pool("hooks", BalancingStrategy::RoundRobin, &[("a", 1)])]);
    let engine = DeliveryEngine::new(cfg.clone(), always_ok(Calls::default())).unwrap();

    let mut broken = cfg;
    broken.queue.max_size = 0;
    assert!(engine.apply_config(broken).is_err());
    assert_eq!(engine.config().queue.max_size, 10_000);
}

#[tokio::test]
async fn test_runtime_target_management() {
    let calls = Calls::default();
    let mut cfg = config(vec![pool("hooks", BalancingStrategy::RoundRobin, &[("a", 1)])]);
    cfg.engine.workers = 1;
    let engine = DeliveryEngine::new(cfg, always_ok(calls.clone())).unwrap();
    let mut events = engine.subscribe();
    let shutdown = Shutdown::new();
    let _workers = engine.start(&shutdown);

    engine
        .add_target(
            "hooks",
            TargetConfig {
                name: "b".into(),
                address: "http://b.test:8080/hooks".into(),
                weight: 1,
                max_connections: 10,
                healthy: true,
            },
        )
        .unwrap();
    engine.remove_target("hooks", "a").unwrap();
    assert_eq!(
        engine.remove_target("hooks", "a"),
        Err(TargetError::UnknownTarget {
            pool: "hooks".into(),
            target: "a".into()
        })
    );

    engine.submit(WorkItem::new("hooks", json!({}))).unwrap();
    let done = terminal_events(&mut events, 1).await;
    assert_eq!(done[0].target.as_deref(), Some("b"));
    assert_eq!(calls.count_for("a"), 0);

    let pool = engine.snapshot().pool("hooks").cloned().unwrap();
    assert_eq!(pool.health, PoolHealth::Healthy);
    assert_eq!(pool.targets.len(), 1);

    shutdown.trigger();
}
