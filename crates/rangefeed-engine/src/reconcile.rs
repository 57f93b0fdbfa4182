//! Continuation reconciliation: carry resume points across splits and merges.
//!
//! For each container the engine compares the provider's current ranges
//! with the last persisted topology snapshot and decides, per current range,
//! where reading resumes:
//!
//! ```text
//! lineage        continuation
//! ─────────────  ──────────────────────────────────────────────
//! Unchanged      the range's own stored continuation
//! SplitChild     parent's continuation, rescoped to the child
//! MergeResult    oldest parent continuation, rescoped; with a parent lacking
//!                one, none under `beginning`, oldest present under `now`
//! Unclassified   none; start-from policy applies
//! ```
//!
//! Continuations are only consulted for ranges named by the snapshot. A
//! container without a snapshot starts every range fresh.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use rangefeed_core::{
    ContainerIdentity, ContainersConfig, Continuation, EngineConfig, FeedRangeTaskUnit, Range,
    RangeLineage, RangeProvider, StartFrom, classify, validate_disjoint,
};
use rangefeed_state::MetadataStore;

use crate::error::{EngineError, EngineResult, StaleContinuationError};

/// Resolution of one current range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeResolution {
    pub range: Range,
    pub lineage: RangeLineage,
    pub continuation: Option<Continuation>,
}

impl RangeResolution {
    /// Whether the continuation was derived from other ranges' records and
    /// has to be written under this range before the snapshot moves on.
    pub fn is_derived(&self) -> bool {
        self.continuation.is_some()
            && matches!(
                self.lineage,
                RangeLineage::SplitChild { .. } | RangeLineage::MergeResult { .. }
            )
    }
}

/// Resolution of one container against its persisted topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerResolution {
    pub container: ContainerIdentity,
    /// Whether a topology snapshot existed.
    pub had_snapshot: bool,
    /// Current ranges in ascending order.
    pub ranges: Vec<RangeResolution>,
    /// Persisted ranges absent from the current set.
    pub retired: Vec<Range>,
    pub stale: Vec<StaleContinuationError>,
}

impl ContainerResolution {
    pub fn current_ranges(&self) -> Vec<Range> {
        self.ranges.iter().map(|r| r.range.clone()).collect()
    }

    /// True when a snapshot existed and matches the current ranges exactly.
    pub fn is_stable(&self) -> bool {
        self.had_snapshot
            && self.retired.is_empty()
            && self
                .ranges
                .iter()
                .all(|r| r.lineage == RangeLineage::Unchanged)
    }
}

/// Outcome of reconciling a set of containers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    /// One unit per current range, ordered by container then range.
    pub units: Vec<FeedRangeTaskUnit>,
    /// Per-container detail, ordered by container resource id.
    pub containers: Vec<ContainerResolution>,
}

impl Reconciliation {
    pub fn stale(&self) -> impl Iterator<Item = &StaleContinuationError> {
        self.containers.iter().flat_map(|c| c.stale.iter())
    }
}

/// Turns current provider topology plus persisted metadata into task units.
pub struct ReconciliationEngine {
    provider: Arc<dyn RangeProvider>,
    store: Arc<dyn MetadataStore>,
    containers: ContainersConfig,
    start_from: StartFrom,
}

impl ReconciliationEngine {
    pub fn new(
        provider: Arc<dyn RangeProvider>,
        store: Arc<dyn MetadataStore>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            provider,
            store,
            containers: config.containers.clone(),
            start_from: config.change_feed.start_from,
        }
    }

    pub fn store(&self) -> &Arc<dyn MetadataStore> {
        &self.store
    }

    pub fn provider(&self) -> &Arc<dyn RangeProvider> {
        &self.provider
    }

    /// Produce one task unit per current range of every container.
    pub async fn reconcile(
        &self,
        containers: &[ContainerIdentity],
        max_tasks: usize,
    ) -> EngineResult<Vec<FeedRangeTaskUnit>> {
        Ok(self.reconcile_detailed(containers, max_tasks).await?.units)
    }

    /// Like [`reconcile`](Self::reconcile), keeping per-container detail.
    ///
    /// Fails as a whole if any container's ranges cannot be listed or its
    /// metadata cannot be read.
    pub async fn reconcile_detailed(
        &self,
        containers: &[ContainerIdentity],
        max_tasks: usize,
    ) -> EngineResult<Reconciliation> {
        if max_tasks == 0 {
            return Err(EngineError::InvalidMaxTasks(max_tasks));
        }

        let mut ordered: BTreeMap<&str, &ContainerIdentity> = BTreeMap::new();
        for container in containers {
            ordered
                .entry(container.container_resource_id.as_str())
                .or_insert(container);
        }

        let mut units = Vec::new();
        let mut resolutions = Vec::with_capacity(ordered.len());
        for container in ordered.into_values() {
            let current = self.current_ranges(container).await?;
            let resolution = self.resolve_container(container, &current)?;
            units.extend(self.units_for(&resolution));
            resolutions.push(resolution);
        }

        debug!(
            containers = resolutions.len(),
            units = units.len(),
            "reconciliation complete"
        );
        Ok(Reconciliation {
            units,
            containers: resolutions,
        })
    }

    /// Current ranges of a container, validated and sorted.
    pub async fn current_ranges(&self, container: &ContainerIdentity) -> EngineResult<Vec<Range>> {
        let mut ranges = self
            .provider
            .list_ranges(&container.container_resource_id)
            .await?;
        ranges.sort();
        validate_disjoint(&ranges)?;
        Ok(ranges)
    }

    /// Resolve a container's current ranges against its persisted snapshot.
    pub fn resolve_container(
        &self,
        container: &ContainerIdentity,
        current: &[Range],
    ) -> EngineResult<ContainerResolution> {
        let rid = container.container_resource_id.as_str();
        let snapshot = self
            .store
            .read_topology(rid)
            .map_err(EngineError::read(rid))?;

        let Some(snapshot) = snapshot else {
            debug!(container_rid = %rid, ranges = current.len(), "no topology snapshot, starting fresh");
            let diff = classify(&[], current);
            return Ok(ContainerResolution {
                container: container.clone(),
                had_snapshot: false,
                ranges: diff
                    .ranges
                    .into_iter()
                    .map(|c| RangeResolution {
                        range: c.range,
                        lineage: c.lineage,
                        continuation: None,
                    })
                    .collect(),
                retired: Vec::new(),
                stale: Vec::new(),
            });
        };

        let diff = classify(&snapshot, current);
        let mut lookup = ContinuationLookup::new(self.store.as_ref(), rid);
        let mut ranges = Vec::with_capacity(diff.ranges.len());
        let mut unexplained: BTreeSet<Range> = BTreeSet::new();

        for classified in diff.ranges {
            let continuation = match &classified.lineage {
                RangeLineage::Unchanged => lookup.get(&classified.range)?,
                RangeLineage::SplitChild { parent } => lookup
                    .get(parent)?
                    .map(|c| c.rescoped(&classified.range)),
                RangeLineage::MergeResult { parents } => {
                    let mut found = Vec::with_capacity(parents.len());
                    let mut missing = 0;
                    for parent in parents {
                        match lookup.get(parent)? {
                            Some(c) => found.push(c),
                            None => missing += 1,
                        }
                    }
                    if missing > 0 && self.start_from == StartFrom::Beginning {
                        debug!(
                            container_rid = %rid,
                            range = %classified.range,
                            missing,
                            "merge parent has no continuation, reading from the beginning"
                        );
                        None
                    } else {
                        Continuation::oldest(&found).map(|c| c.rescoped(&classified.range))
                    }
                }
                RangeLineage::Unclassified { overlapping } => {
                    unexplained.extend(overlapping.iter().cloned());
                    None
                }
            };
            ranges.push(RangeResolution {
                range: classified.range,
                lineage: classified.lineage,
                continuation,
            });
        }

        let stale: Vec<StaleContinuationError> = unexplained
            .into_iter()
            .map(|range| StaleContinuationError {
                container_rid: rid.to_string(),
                reason: "persisted range realigned without a split or merge".to_string(),
                range,
            })
            .collect();
        for stale in &stale {
            warn!(
                container_rid = %stale.container_rid,
                range = %stale.range,
                reason = %stale.reason,
                "stale continuation dropped"
            );
        }

        let resolution = ContainerResolution {
            container: container.clone(),
            had_snapshot: true,
            ranges,
            retired: diff.retired,
            stale,
        };
        if !resolution.is_stable() {
            info!(
                container_rid = %rid,
                ranges = resolution.ranges.len(),
                retired = resolution.retired.len(),
                stale = resolution.stale.len(),
                "container topology changed since last snapshot"
            );
        }
        Ok(resolution)
    }

    fn units_for<'a>(
        &'a self,
        resolution: &'a ContainerResolution,
    ) -> impl Iterator<Item = FeedRangeTaskUnit> + 'a {
        let container = &resolution.container;
        let destination = self.containers.destination_for(&container.container_id);
        resolution.ranges.iter().map(move |r| FeedRangeTaskUnit {
            database_name: container.database_name.clone(),
            container_id: container.container_id.clone(),
            container_resource_id: container.container_resource_id.clone(),
            range: r.range.clone(),
            continuation: r.continuation.clone(),
            destination: destination.clone(),
        })
    }
}

/// Per-container continuation reads, each persisted range read at most once.
struct ContinuationLookup<'a> {
    store: &'a dyn MetadataStore,
    container_rid: &'a str,
    seen: BTreeMap<Range, Option<Continuation>>,
}

impl<'a> ContinuationLookup<'a> {
    fn new(store: &'a dyn MetadataStore, container_rid: &'a str) -> Self {
        Self {
            store,
            container_rid,
            seen: BTreeMap::new(),
        }
    }

    fn get(&mut self, range: &Range) -> EngineResult<Option<Continuation>> {
        if let Some(hit) = self.seen.get(range) {
            return Ok(hit.clone());
        }
        let continuation = self
            .store
            .read_continuation(self.container_rid, range)
            .map_err(EngineError::read(format!("{}/{}", self.container_rid, range)))?;
        self.seen.insert(range.clone(), continuation.clone());
        Ok(continuation)
    }
}
