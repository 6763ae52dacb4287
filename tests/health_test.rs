mod helpers;

use cairn::error::MemoryError;
use cairn::memory::prune::{PruneStrategy, PruneTrigger};
use cairn::memory::types::Scope;
use cairn::monitor::health::HealthStatus;
use cairn::monitor::scheduler::Scheduler;
use tokio_util::sync::CancellationToken;

fn small_capacity_config() -> cairn::config::CairnConfig {
    let mut config = helpers::test_config();
    config.capacity.agent = 20;
    config
}

async fn fill(engine: &cairn::engine::MemoryEngine, owner: &str, n: usize) {
    for i in 0..n {
        engine
            .write(
                Scope::Agent,
                Some(owner),
                &format!("{owner} fact {i}"),
                helpers::meta((i % 5) as f64 / 5.0),
            )
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn crossing_critical_triggers_automatic_hybrid_prune() {
    let dir = tempfile::tempdir().unwrap();
    let config = small_capacity_config();
    let warning = config.health.utilization.warning;
    let (engine, path) = helpers::engine_on_disk(dir.path(), config);

    fill(&engine, "worker", 19).await; // 95% of 20

    let snapshot = engine.run_health_cycle().await;
    assert_eq!(snapshot.status, HealthStatus::Critical);
    assert_eq!(snapshot.critical_collections, vec!["agent_worker".to_string()]);
    assert_eq!(snapshot.auto_prunes.len(), 1);

    let prune = &snapshot.auto_prunes[0];
    assert_eq!(prune.strategy, PruneStrategy::Hybrid);
    assert_eq!(prune.trigger, PruneTrigger::Automatic);
    assert!(!prune.dry_run);
    assert_eq!(prune.limit, 12);
    assert_eq!(prune.entries_removed, 7);

    let latest = engine.monitor().latest_sample().unwrap();
    assert!(latest.utilization < warning);

    let conn = helpers::side_connection(&path);
    assert_eq!(helpers::audit_count(&conn, "auto_prune"), 7);
    assert_eq!(helpers::audit_count(&conn, "prune"), 0);
}

#[tokio::test]
async fn auto_prune_fires_on_transition_only() {
    let mut config = small_capacity_config();
    config.health.auto_prune_target_ratio = 0.6;
    let engine = helpers::engine_with(config);

    fill(&engine, "w", 19).await;
    let first = engine.run_health_cycle().await;
    assert_eq!(first.auto_prunes.len(), 1);

    let second = engine.run_health_cycle().await;
    assert!(second.auto_prunes.is_empty());
    assert_eq!(second.status, HealthStatus::Healthy);
}

#[tokio::test]
async fn refilled_collection_is_pruned_again() {
    let engine = helpers::engine_with(small_capacity_config());

    fill(&engine, "w", 19).await;
    let first = engine.run_health_cycle().await;
    assert_eq!(first.auto_prunes.len(), 1);
    assert_eq!(engine.stats(Scope::Agent, Some("w")).await.unwrap().entry_count, 12);

    for round in 0..3 {
        fill(&engine, "w", 7).await;
        assert_eq!(engine.stats(Scope::Agent, Some("w")).await.unwrap().entry_count, 19);

        let snapshot = engine.run_health_cycle().await;
        assert_eq!(snapshot.status, HealthStatus::Critical, "round {round}");
        assert_eq!(snapshot.auto_prunes.len(), 1, "round {round}");
        assert_eq!(engine.stats(Scope::Agent, Some("w")).await.unwrap().entry_count, 12);
    }
}

#[tokio::test]
async fn auto_prune_can_be_disabled() {
    let mut config = small_capacity_config();
    config.health.auto_prune = false;
    let engine = helpers::engine_with(config);

    fill(&engine, "w", 19).await;
    let snapshot = engine.run_health_cycle().await;
    assert_eq!(snapshot.status, HealthStatus::Critical);
    assert!(snapshot.auto_prunes.is_empty());
    assert_eq!(engine.stats(Scope::Agent, None).await.unwrap().entry_count, 19);
}

#[tokio::test]
async fn warning_level_does_not_prune() {
    let engine = helpers::engine_with(small_capacity_config());
    fill(&engine, "w", 15).await; // 75%

    let snapshot = engine.run_health_cycle().await;
    assert_eq!(snapshot.status, HealthStatus::Warning);
    assert!(snapshot.auto_prunes.is_empty());
    assert_eq!(snapshot.alerts.len(), 1);
    assert_eq!(snapshot.alerts[0].metric, "utilization");
}

#[tokio::test]
async fn only_the_critical_collection_is_pruned() {
    let engine = helpers::engine_with(small_capacity_config());
    fill(&engine, "busy", 19).await;
    fill(&engine, "quiet", 3).await;

    let snapshot = engine.run_health_cycle().await;
    assert_eq!(snapshot.auto_prunes.len(), 1);
    assert_eq!(snapshot.auto_prunes[0].owner_key.as_deref(), Some("busy"));
    assert_eq!(engine.stats(Scope::Agent, Some("quiet")).await.unwrap().entry_count, 3);
    assert_eq!(engine.stats(Scope::Agent, Some("busy")).await.unwrap().entry_count, 12);
}

#[tokio::test]
async fn health_cycle_publishes_snapshot() {
    let engine = helpers::engine();
    assert!(engine.monitor().latest_health().is_none());
    let snapshot = engine.run_health_cycle().await;
    assert_eq!(snapshot.status, HealthStatus::Healthy);
    assert!(engine.monitor().latest_health().is_some());

    let report = engine.report().await.unwrap();
    assert_eq!(report.last_health_cycle.unwrap().status, HealthStatus::Healthy);
}

fn hide_registry(path: &std::path::Path) -> rusqlite::Connection {
    let conn = helpers::side_connection(path);
    conn.execute_batch("ALTER TABLE collections RENAME TO collections_hidden")
        .unwrap();
    conn
}

#[tokio::test]
async fn collector_failure_is_an_error_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, path) = helpers::engine_on_disk(dir.path(), helpers::test_config());
    fill(&engine, "w", 3).await;
    let _side = hide_registry(&path);

    let err = engine.collect_metrics().await.unwrap_err();
    assert!(matches!(err, MemoryError::CollectorFailure(_)));
    assert_eq!(engine.monitor().latest_health().unwrap().status, HealthStatus::Error);

    let snapshot = engine.run_health_cycle().await;
    assert_eq!(snapshot.status, HealthStatus::Error);
    assert!(snapshot.auto_prunes.is_empty());
}

#[tokio::test]
async fn scheduler_keeps_running_after_failed_cycles() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = helpers::test_config();
    config.scheduler.metrics_interval_secs = 1;
    config.scheduler.health_interval_secs = 1;
    let (engine, path) = helpers::engine_on_disk(dir.path(), config);
    fill(&engine, "w", 3).await;
    let side = hide_registry(&path);

    let scheduler = Scheduler::start(engine.clone(), CancellationToken::new());
    let failed = wait_for(|| {
        engine
            .monitor()
            .latest_health()
            .is_some_and(|h| h.status == HealthStatus::Error)
    })
    .await;
    assert!(failed, "failed cycle never published");
    assert!(engine.monitor().latest_sample().is_none());

    side.execute_batch("ALTER TABLE collections_hidden RENAME TO collections")
        .unwrap();
    let recovered = wait_for(|| {
        engine.monitor().latest_sample().is_some()
            && engine
                .monitor()
                .latest_health()
                .is_some_and(|h| h.status == HealthStatus::Healthy)
    })
    .await;
    assert!(recovered, "no successful cycle after the store came back");

    scheduler.shutdown().await;
}

async fn wait_for(mut done: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if done() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    done()
}
