//! Layout regression tests.
//!
//! End-to-end scenarios across provider, metadata store, reconciliation,
//! partitioning and the topology monitor.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use rangefeed_core::{
    ContainerIdentity, Continuation, EngineConfig, FeedRangeTaskUnit, InMemoryRangeProvider,
    MetadataStorageType, Range, SequenceToken,
};
use rangefeed_engine::{LayoutPlanner, TaskConfig, TaskConfigKeys};
use rangefeed_monitor::{PollOutcome, TopologyChangeNotifiable, TopologyMonitor};
use rangefeed_state::{
    InMemoryOffsetStorage, MetadataStore, OffsetStorage, open_metadata_store,
};

fn r(min: &str, max: &str) -> Range {
    Range::new(min, max).unwrap()
}

fn split(bounds: &[&str]) -> Vec<Range> {
    bounds.windows(2).map(|w| r(w[0], w[1])).collect()
}

fn continuation(rid: &str, range: Range, seq: u64) -> Continuation {
    Continuation {
        container_resource_id: rid.to_string(),
        range,
        token: format!("\"{seq}\""),
        last_sequence_token: SequenceToken(seq),
    }
}

struct Harness {
    provider: Arc<InMemoryRangeProvider>,
    store: Arc<dyn MetadataStore>,
    planner: LayoutPlanner,
    keys: TaskConfigKeys,
}

async fn harness(config: EngineConfig, containers: Vec<(ContainerIdentity, Vec<Range>)>) -> Harness {
    let provider = Arc::new(InMemoryRangeProvider::new());
    for (identity, ranges) in containers {
        provider.put_container(identity, ranges).await;
    }
    let offsets: Arc<dyn OffsetStorage> = Arc::new(InMemoryOffsetStorage::new());
    let store = open_metadata_store(&config, offsets).unwrap();
    let keys = TaskConfigKeys::new(&config.connector.config_prefix);
    let planner = LayoutPlanner::new(config, provider.clone(), store.clone());
    Harness {
        provider,
        store,
        planner,
        keys,
    }
}

fn orders() -> ContainerIdentity {
    ContainerIdentity::new("sales", "orders", "rid-orders")
}

fn units_of(configs: &[TaskConfig], keys: &TaskConfigKeys) -> Vec<Vec<FeedRangeTaskUnit>> {
    configs
        .iter()
        .map(|c| c.feed_range_units(keys).unwrap())
        .collect()
}

// ── Scenarios ─────────────────────────────────────────────────────

#[tokio::test]
async fn single_range_two_tasks_fresh_start() {
    let mut config = EngineConfig::new("feed", "sales");
    config.connector.max_tasks = 2;
    let h = harness(config, vec![(orders(), vec![Range::full()])]).await;

    let layout = h.planner.plan().await.unwrap();

    assert_eq!(layout.task_configs.len(), 2);
    let slots = units_of(&layout.task_configs, &h.keys);
    assert_eq!(slots[0].len(), 1);
    assert!(slots[0][0].continuation.is_none());
    assert!(slots[1].is_empty());
    assert!(layout.task_configs[0].metadata_unit(&h.keys).unwrap().is_some());
    assert!(layout.task_configs[1].metadata_unit(&h.keys).unwrap().is_none());
}

#[tokio::test]
async fn split_one_into_four_inherits_sequence() {
    let h = harness(
        EngineConfig::new("feed", "sales"),
        vec![(orders(), vec![Range::full()])],
    )
    .await;
    h.planner.plan().await.unwrap();
    h.store
        .write_continuation(&continuation("rid-orders", Range::full(), 10))
        .unwrap();

    let children = split(&["", "40", "80", "C0", "FF"]);
    h.provider.set_ranges("rid-orders", children.clone()).await;
    let layout = h.planner.plan_with(2).await.unwrap();

    let units: Vec<FeedRangeTaskUnit> = units_of(&layout.task_configs, &h.keys)
        .into_iter()
        .flatten()
        .collect();
    assert_eq!(units.len(), 4);
    for unit in &units {
        let c = unit.continuation.as_ref().unwrap();
        assert_eq!(c.last_sequence_token, SequenceToken(10));
        assert_eq!(c.range, unit.range);
    }

    // Derived continuations are recorded before the snapshot moves on.
    assert_eq!(h.store.read_topology("rid-orders").unwrap(), Some(children.clone()));
    for child in &children {
        let stored = h.store.read_continuation("rid-orders", child).unwrap().unwrap();
        assert_eq!(stored.last_sequence_token, SequenceToken(10));
    }
}

#[tokio::test]
async fn merge_two_into_one_takes_minimum_sequence() {
    let halves = split(&["", "80", "FF"]);
    let h = harness(
        EngineConfig::new("feed", "sales"),
        vec![(orders(), halves.clone())],
    )
    .await;
    h.planner.plan().await.unwrap();
    h.store
        .write_continuation(&continuation("rid-orders", halves[0].clone(), 5))
        .unwrap();
    h.store
        .write_continuation(&continuation("rid-orders", halves[1].clone(), 8))
        .unwrap();

    h.provider.set_ranges("rid-orders", vec![Range::full()]).await;
    let layout = h.planner.plan().await.unwrap();

    let units = units_of(&layout.task_configs, &h.keys).remove(0);
    assert_eq!(units.len(), 1);
    let c = units[0].continuation.as_ref().unwrap();
    assert_eq!(c.last_sequence_token, SequenceToken(5));
    assert_eq!(c.range, Range::full());
}

#[tokio::test]
async fn restart_without_topology_change_resumes_in_place() {
    let ranges = split(&["", "55", "AA", "FF"]);
    let h = harness(
        EngineConfig::new("feed", "sales"),
        vec![(orders(), ranges.clone())],
    )
    .await;
    h.planner.plan().await.unwrap();
    for (i, range) in ranges.iter().enumerate() {
        h.store
            .write_continuation(&continuation("rid-orders", range.clone(), 20 + i as u64))
            .unwrap();
    }

    let layout = h.planner.plan().await.unwrap();

    let units = units_of(&layout.task_configs, &h.keys).remove(0);
    let seqs: Vec<u64> = units
        .iter()
        .map(|u| u.continuation.as_ref().unwrap().last_sequence_token.0)
        .collect();
    assert_eq!(seqs, vec![20, 21, 22]);
}

#[tokio::test]
async fn monitor_fires_once_per_divergence() {
    #[derive(Default)]
    struct Hook(AtomicUsize);
    impl TopologyChangeNotifiable for Hook {
        fn request_reassignment(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    let config = EngineConfig::new("feed", "sales");
    let h = harness(config.clone(), vec![(orders(), vec![Range::full()])]).await;
    let layout = h.planner.plan().await.unwrap();
    let hook = Arc::new(Hook::default());
    let mut monitor = TopologyMonitor::new(&config, h.planner.engine(), hook.clone()).unwrap();
    monitor.seed(&layout.metadata_unit);

    assert_eq!(monitor.poll_once().await, PollOutcome::Stable);
    h.provider
        .set_ranges("rid-orders", split(&["", "80", "FF"]))
        .await;
    assert!(matches!(monitor.poll_once().await, PollOutcome::Divergent { .. }));
    assert_eq!(monitor.poll_once().await, PollOutcome::Stable);
    assert_eq!(monitor.poll_once().await, PollOutcome::Stable);

    assert_eq!(hook.0.load(Ordering::SeqCst), 1);
}

// ── Properties ────────────────────────────────────────────────────

#[tokio::test]
async fn emitted_ranges_cover_current_topology_exactly() {
    let orders_ranges = split(&["", "1F", "3F", "7F", "BF", "FF"]);
    let customers_ranges = split(&["", "80", "FF"]);
    let h = harness(
        EngineConfig::new("feed", "sales"),
        vec![
            (orders(), orders_ranges.clone()),
            (
                ContainerIdentity::new("sales", "customers", "rid-customers"),
                customers_ranges.clone(),
            ),
        ],
    )
    .await;

    let layout = h.planner.plan_with(3).await.unwrap();

    let units: Vec<FeedRangeTaskUnit> = units_of(&layout.task_configs, &h.keys)
        .into_iter()
        .flatten()
        .collect();
    let mut emitted_orders: Vec<Range> = units
        .iter()
        .filter(|u| u.container_resource_id == "rid-orders")
        .map(|u| u.range.clone())
        .collect();
    emitted_orders.sort();
    assert_eq!(emitted_orders, orders_ranges);
    assert_eq!(
        layout.metadata_unit.effective_ranges_by_container["rid-customers"],
        customers_ranges
    );
    assert_eq!(units.len(), 7);
}

#[tokio::test]
async fn identical_inputs_yield_identical_configs() {
    let h = harness(
        EngineConfig::new("feed", "sales"),
        vec![(orders(), split(&["", "40", "80", "C0", "FF"]))],
    )
    .await;

    let first = h.planner.plan_with(3).await.unwrap();
    let second = h.planner.plan_with(3).await.unwrap();

    assert_eq!(first.task_configs, second.task_configs);
    assert_eq!(
        serde_json::to_string(&first.task_configs).unwrap(),
        serde_json::to_string(&second.task_configs).unwrap()
    );
}

#[tokio::test]
async fn slot_sizes_differ_by_at_most_one() {
    let bounds = ["", "10", "20", "30", "40", "50", "60", "70", "80", "90", "A0", "FF"];
    let h = harness(
        EngineConfig::new("feed", "sales"),
        vec![(orders(), split(&bounds))],
    )
    .await;

    for k in 1..=12 {
        let layout = h.planner.plan_with(k).await.unwrap();
        let sizes: Vec<usize> = units_of(&layout.task_configs, &h.keys)
            .iter()
            .map(Vec::len)
            .collect();
        let n = bounds.len() - 1;
        assert_eq!(sizes.len(), k);
        assert_eq!(sizes.iter().sum::<usize>(), n);
        assert!(sizes.iter().all(|&s| s == n / k || s == n.div_ceil(k)));
    }
}

#[tokio::test]
async fn external_storage_keeps_continuations_in_offsets() {
    let mut config = EngineConfig::new("feed", "sales");
    config.metadata.storage = MetadataStorageType::External;
    config.metadata.location = "feed-meta".to_string();
    let h = harness(config, vec![(orders(), vec![Range::full()])]).await;
    h.planner.plan().await.unwrap();
    h.store
        .write_continuation(&continuation("rid-orders", Range::full(), 3))
        .unwrap();

    h.provider
        .set_ranges("rid-orders", split(&["", "80", "FF"]))
        .await;
    let layout = h.planner.plan().await.unwrap();

    assert_eq!(layout.metadata_unit.storage_type, MetadataStorageType::External);
    assert_eq!(layout.metadata_unit.storage_location, "feed-meta");
    let units = units_of(&layout.task_configs, &h.keys).remove(0);
    assert!(units
        .iter()
        .all(|u| u.continuation.as_ref().unwrap().last_sequence_token == SequenceToken(3)));
}
