//! Integration tests for the engine lifecycle and registration paths.
#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use itemtrace::gc::RetentionConfig;
use itemtrace::services::DetectionConfig;
use itemtrace::storage::PersistenceConfig;
use itemtrace::sync::NoopSync;
use itemtrace::{Engine, EngineConfig, ItemContent, ItemId, TrackedRecord};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_test::assert_ok;

fn config(dir: &TempDir) -> EngineConfig {
    EngineConfig::default()
        .with_data_dir(dir.path())
        .with_node_name("it-node")
        .with_persistence(
            PersistenceConfig::default()
                .with_debounce(Duration::from_millis(25))
                .with_shutdown_grace(Duration::from_secs(2)),
        )
}

async fn start(config: EngineConfig) -> Engine {
    assert_ok!(Engine::start_with_sync(config, Arc::new(NoopSync)).await)
}

#[tokio::test]
async fn test_identical_content_from_two_players() {
    let dir = TempDir::new().expect("tempdir");
    let engine = start(config(&dir)).await;
    let sword = || {
        ItemContent::new("DIAMOND_SWORD", 1)
            .with_display_name("Excalibur")
            .with_modifier("SHARPNESS", 5)
    };

    let mut o1 = sword();
    let mut o2 = sword();
    let i1 = engine.tagger().register_item(&mut o1, "CRAFTED", "alice").expect("I1");
    let i2 = engine.tagger().register_item(&mut o2, "CRAFTED", "bob").expect("I2");

    assert_ne!(i1, i2);
    let ids = |records: Vec<TrackedRecord>| records.into_iter().map(|r| r.id).collect::<Vec<_>>();
    assert_eq!(ids(engine.find_duplicates(i1)), vec![i2]);
    assert_eq!(ids(engine.find_duplicates(i2)), vec![i1]);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_tagged_content_never_gets_a_new_id() {
    let dir = TempDir::new().expect("tempdir");
    let engine = start(config(&dir)).await;
    let mut apple = ItemContent::new("GOLDEN_APPLE", 1);
    let id = engine.tagger().register_item(&mut apple, "LOOT", "alice").expect("id");

    for action in ["DROP", "PICKUP", "TRADE", "CHEST_PUT"] {
        assert_eq!(engine.tagger().register_item(&mut apple, action, "bob"), Some(id));
    }

    assert_eq!(engine.store().len(), 1);
    assert_eq!(engine.item_history(id).len(), 5);
    engine.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_distinct_registrations() {
    const PRODUCERS: usize = 8;
    const PER_PRODUCER: usize = 250;

    let dir = TempDir::new().expect("tempdir");
    let engine = Arc::new(start(config(&dir)).await);

    let mut handles = Vec::new();
    for producer in 0..PRODUCERS {
        let engine = Arc::clone(&engine);
        handles.push(tokio::task::spawn_blocking(move || {
            let kind = if producer % 2 == 0 { "STONE" } else { "DIRT" };
            (0..PER_PRODUCER)
                .filter_map(|n| {
                    let mut content =
                        ItemContent::new(kind, 1).with_display_name(format!("{producer}-{n}"));
                    engine.tagger().register_item(&mut content, "PICKUP", "miner")
                })
                .collect::<Vec<ItemId>>()
        }));
    }

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.await.expect("producer"));
    }
    all.sort_unstable();
    all.dedup();

    let total = PRODUCERS * PER_PRODUCER;
    assert_eq!(all.len(), total);
    assert_eq!(engine.store().len(), total);
    let counted: u64 = engine.stats().type_counts.values().sum();
    assert_eq!(counted, total as u64);
    assert!(engine.find_duplicates(all[0]).is_empty());
    engine.shutdown().await;
}

#[tokio::test]
async fn test_ignored_action_never_alerts() {
    let dir = TempDir::new().expect("tempdir");
    let engine = start(config(&dir)).await;
    let mut rx = engine.bus().subscribe();

    for actor in ["alice", "bob", "carol"] {
        let mut content = ItemContent::new("TOTEM", 1);
        engine.tagger().register_item(&mut content, "LOGIN_SCAN", actor);
    }
    assert!(engine.shutdown().await);

    assert!(rx.try_recv().is_err());
    assert_eq!(engine.store().len(), 3);
}

#[tokio::test]
async fn test_threshold_and_reload() {
    let dir = TempDir::new().expect("tempdir");
    let detection = DetectionConfig::default().with_min_duplicates(2);
    let engine = start(config(&dir).with_detection(detection)).await;
    let mut rx = engine.bus().subscribe();

    let mut first = ItemContent::new("BEACON", 1);
    let mut second = ItemContent::new("BEACON", 1);
    engine.tagger().register_item(&mut first, "CRAFTED", "alice");
    engine.tagger().register_item(&mut second, "CRAFTED", "alice");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err(), "one duplicate is below the threshold");

    engine.reload_config(DetectionConfig::default().with_min_duplicates(1));
    let mut third = first.clone();
    engine.tagger().register_item(&mut third, "TRADE", "alice");
    let alert = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("alert in time")
        .expect("alert");
    assert_eq!(alert.duplicate_count, 1);
    assert_eq!(alert.origin_node, "it-node");
    engine.shutdown().await;
}

#[tokio::test]
async fn test_registration_at_capacity_succeeds() {
    let dir = TempDir::new().expect("tempdir");
    let engine = start(
        config(&dir).with_retention(
            RetentionConfig::default()
                .with_capacity(2)
                .with_sweep_interval(Duration::from_secs(3600)),
        ),
    )
    .await;

    for n in 0..3 {
        let mut content = ItemContent::new("ARROW", 1).with_lore([format!("batch {n}")]);
        assert!(engine.tagger().register_item(&mut content, "CRAFTED", "fletcher").is_some());
    }
    assert_eq!(engine.store().len(), 3);

    // Everything is younger than the retention window.
    let result = engine.sweep_now();
    assert!(result.ran);
    assert_eq!(result.records_evicted, 0);
    assert_eq!(engine.store().len(), 3);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_foreign_tags_leave_no_local_history() {
    let dir = TempDir::new().expect("tempdir");
    let engine = start(
        config(&dir).with_retention(
            RetentionConfig::default()
                .with_capacity(0)
                .with_sweep_interval(Duration::from_secs(3600)),
        ),
    )
    .await;

    for raw in 0..10_000 {
        let mut content = ItemContent::new("PAPER", 1);
        content.embed_id(ItemId::new(1_000_000 + raw));
        let id = engine.tagger().register_item(&mut content, "PICKUP", "forger");
        assert_eq!(id, Some(ItemId::new(1_000_000 + raw)));
    }
    assert!(engine.store().is_empty());
    assert_eq!(engine.stats().tracked_histories, 0);

    let result = engine.sweep_now();
    assert_eq!(result.records_evicted, 0);
    assert_eq!(engine.stats().tracked_histories, 0);
    engine.shutdown().await;
}

#[test]
fn test_registration_from_foreign_thread() {
    let runtime = tokio::runtime::Runtime::new().expect("runtime");
    let dir = TempDir::new().expect("tempdir");
    let engine = Arc::new(runtime.block_on(start(config(&dir))));

    let worker = Arc::clone(&engine);
    let id = std::thread::spawn(move || {
        let mut content = ItemContent::new("MAP", 1);
        worker.tagger().register_item(&mut content, "CRAFTED", "cartographer")
    })
    .join()
    .expect("thread")
    .expect("registered");

    assert!(engine.lookup(id).is_some());
    assert!(runtime.block_on(engine.shutdown()));
}
