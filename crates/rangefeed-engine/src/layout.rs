//! LayoutPlanner: compute the task layout for a connector.
//!
//! ```text
//! list containers ─► filter ─► reconcile ─► partition ─► Layout
//!                                   │
//!                                   └──► record topology (best effort)
//! ```
//!
//! Recording failures are logged and never block the layout; the next
//! plan or monitor poll derives and records the same state again.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{info, warn};

use rangefeed_core::{
    ContainerIdentity, ContainersConfig, EngineConfig, MetadataTaskUnit, RangeProvider,
};
use rangefeed_state::MetadataStore;

use crate::error::{EngineError, EngineResult};
use crate::partition::{TaskConfig, TaskPartitioner};
use crate::reconcile::{Reconciliation, ReconciliationEngine};
use crate::recorder::TopologyRecorder;

/// Task configs plus the metadata unit that seeds the topology monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub task_configs: Vec<TaskConfig>,
    pub metadata_unit: MetadataTaskUnit,
    pub reconciliation: Reconciliation,
}

/// Keep the containers that pass the include/exclude filters, sorted by rid.
pub fn select_containers(
    filters: &ContainersConfig,
    listed: Vec<ContainerIdentity>,
) -> Vec<ContainerIdentity> {
    let mut selected: Vec<ContainerIdentity> = listed
        .into_iter()
        .filter(|c| filters.selects(&c.container_id))
        .collect();
    selected.sort_by(|a, b| a.container_resource_id.cmp(&b.container_resource_id));
    selected.dedup_by(|a, b| a.container_resource_id == b.container_resource_id);
    selected
}

pub struct LayoutPlanner {
    config: EngineConfig,
    engine: Arc<ReconciliationEngine>,
    partitioner: TaskPartitioner,
    recorder: TopologyRecorder,
}

impl LayoutPlanner {
    pub fn new(
        config: EngineConfig,
        provider: Arc<dyn RangeProvider>,
        store: Arc<dyn MetadataStore>,
    ) -> Self {
        let engine = Arc::new(ReconciliationEngine::new(provider, store.clone(), &config));
        Self {
            partitioner: TaskPartitioner::new(&config),
            recorder: TopologyRecorder::new(store),
            engine,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn engine(&self) -> Arc<ReconciliationEngine> {
        self.engine.clone()
    }

    pub fn partitioner(&self) -> &TaskPartitioner {
        &self.partitioner
    }

    /// Containers of the configured database the connector covers.
    ///
    /// Every explicitly included container must exist.
    pub async fn resolve_containers(&self) -> EngineResult<Vec<ContainerIdentity>> {
        let database = &self.config.connector.database;
        let listed = self.engine.provider().list_containers(database).await?;
        let selected = select_containers(&self.config.containers, listed);

        let found: BTreeSet<&str> = selected.iter().map(|c| c.container_id.as_str()).collect();
        let missing: Vec<String> = self
            .config
            .containers
            .include
            .iter()
            .filter(|id| !found.contains(id.as_str()))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(EngineError::UnknownContainers {
                database: database.clone(),
                missing,
            });
        }
        Ok(selected)
    }

    /// Compute the layout for the configured `max_tasks`.
    pub async fn plan(&self) -> EngineResult<Layout> {
        self.plan_with(self.config.connector.max_tasks).await
    }

    pub async fn plan_with(&self, max_tasks: usize) -> EngineResult<Layout> {
        if max_tasks == 0 {
            return Err(EngineError::InvalidMaxTasks(max_tasks));
        }
        let containers = self.resolve_containers().await?;
        let reconciliation = self.engine.reconcile_detailed(&containers, max_tasks).await?;

        let task_configs =
            self.partitioner
                .partition(&reconciliation.units, &containers, max_tasks)?;
        let metadata_unit = self
            .partitioner
            .metadata_unit(&reconciliation.units, &containers);

        if let Err(e) = self.recorder.record(&reconciliation) {
            warn!(error = %e, "failed to record topology, continuing with layout");
        }

        info!(
            connector = %self.config.connector.name,
            containers = containers.len(),
            units = reconciliation.units.len(),
            tasks = task_configs.len(),
            "layout planned"
        );
        Ok(Layout {
            task_configs,
            metadata_unit,
            reconciliation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rangefeed_core::{InMemoryRangeProvider, Range};
    use rangefeed_state::{FrameworkMetadataStore, InMemoryOffsetStorage};

    async fn planner(
        config: EngineConfig,
    ) -> (Arc<InMemoryRangeProvider>, Arc<InMemoryOffsetStorage>, LayoutPlanner) {
        let provider = Arc::new(InMemoryRangeProvider::new());
        let offsets = Arc::new(InMemoryOffsetStorage::new());
        let store = Arc::new(FrameworkMetadataStore::new(
            offsets.clone(),
            "sales",
            "feed",
            "_meta",
        ));
        provider
            .put_container(
                ContainerIdentity::new("sales", "orders", "rid-b"),
                vec![Range::full()],
            )
            .await;
        provider
            .put_container(
                ContainerIdentity::new("sales", "customers", "rid-a"),
                vec![Range::full()],
            )
            .await;
        let planner = LayoutPlanner::new(config, provider.clone(), store);
        (provider, offsets, planner)
    }

    #[test]
    fn filters_then_sorts() {
        let mut filters = ContainersConfig::default();
        filters.exclude = vec!["audit".to_string()];
        let listed = vec![
            ContainerIdentity::new("sales", "orders", "rid-2"),
            ContainerIdentity::new("sales", "audit", "rid-0"),
            ContainerIdentity::new("sales", "customers", "rid-1"),
        ];

        let selected = select_containers(&filters, listed);

        let rids: Vec<_> = selected.iter().map(|c| c.container_resource_id.as_str()).collect();
        assert_eq!(rids, vec!["rid-1", "rid-2"]);
    }

    #[tokio::test]
    async fn plan_covers_all_selected_containers() {
        let (_, _, planner) = planner(EngineConfig::new("feed", "sales")).await;

        let layout = planner.plan().await.unwrap();

        assert_eq!(layout.task_configs.len(), 1);
        assert_eq!(layout.metadata_unit.container_resource_ids, vec!["rid-a", "rid-b"]);
        assert_eq!(layout.reconciliation.units.len(), 2);
    }

    #[tokio::test]
    async fn missing_included_container_fails() {
        let mut config = EngineConfig::new("feed", "sales");
        config.containers.include = vec!["orders".to_string(), "ghost".to_string()];
        let (_, _, planner) = planner(config).await;

        let err = planner.plan().await.unwrap_err();

        match err {
            EngineError::UnknownContainers { missing, .. } => assert_eq!(missing, vec!["ghost"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn recording_failure_does_not_block_layout() {
        let (_, offsets, planner) = planner(EngineConfig::new("feed", "sales")).await;
        offsets.set_fail_writes(true);

        let layout = planner.plan_with(4).await.unwrap();

        assert_eq!(layout.task_configs.len(), 4);
        assert!(offsets.is_empty().unwrap());
    }

    #[tokio::test]
    async fn plan_records_topology() {
        let (_, offsets, planner) = planner(EngineConfig::new("feed", "sales")).await;

        planner.plan().await.unwrap();

        // Two snapshots plus the connector summary.
        assert_eq!(offsets.len().unwrap(), 3);
        let store = planner.engine().store().clone();
        assert_eq!(
            store.read_container_summary().unwrap(),
            Some(vec!["rid-a".to_string(), "rid-b".to_string()])
        );
    }
}
