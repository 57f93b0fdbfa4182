//! TopologyRecorder: persist a reconciliation outcome in crash-safe order.
//!
//! Writes happen key by key with no transaction, so the order matters:
//!
//! ```text
//! 1. derived continuations   (split children, merge results)
//! 2. per-container snapshot  (current ranges)
//! 3. connector summary       (covered container rids)
//! ```
//!
//! A snapshot therefore never names a range whose inherited continuation
//! is missing. Interrupted runs leave the old snapshot in place and the
//! next reconciliation derives the same continuations again.

use std::sync::Arc;

use tracing::{debug, info};

use rangefeed_core::ContainerRid;
use rangefeed_state::MetadataStore;

use crate::error::{EngineError, EngineResult};
use crate::reconcile::{ContainerResolution, Reconciliation};

pub struct TopologyRecorder {
    store: Arc<dyn MetadataStore>,
}

impl TopologyRecorder {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self { store }
    }

    /// Persist every container of a reconciliation, then the summary.
    pub fn record(&self, reconciliation: &Reconciliation) -> EngineResult<()> {
        for container in &reconciliation.containers {
            self.record_container(container)?;
        }
        let rids: Vec<ContainerRid> = reconciliation
            .containers
            .iter()
            .map(|c| c.container.container_resource_id.clone())
            .collect();
        self.record_summary(&rids)?;
        info!(containers = rids.len(), "topology recorded");
        Ok(())
    }

    /// Persist derived continuations, then the container's snapshot.
    ///
    /// Returns the number of continuations written. A derived continuation
    /// is skipped when the range already holds one at the same or a later
    /// sequence token, so re-recording never moves a reader backwards.
    pub fn record_container(&self, resolution: &ContainerResolution) -> EngineResult<usize> {
        let rid = resolution.container.container_resource_id.as_str();
        let mut written = 0;

        for range in resolution.ranges.iter().filter(|r| r.is_derived()) {
            let Some(derived) = &range.continuation else {
                continue;
            };
            // Not atomic with a task committing to the same range. Losing
            // that race rewrites an older token, which only causes replay.
            let existing = self
                .store
                .read_continuation(rid, &range.range)
                .map_err(EngineError::read(rid))?;
            if existing.is_some_and(|e| e.last_sequence_token >= derived.last_sequence_token) {
                continue;
            }
            self.store
                .write_continuation(derived)
                .map_err(EngineError::write(rid))?;
            written += 1;
        }

        self.store
            .write_topology(rid, &resolution.current_ranges())
            .map_err(EngineError::write(rid))?;
        debug!(
            container_rid = %rid,
            derived = written,
            ranges = resolution.ranges.len(),
            "container topology recorded"
        );
        Ok(written)
    }

    pub fn record_summary(&self, container_rids: &[ContainerRid]) -> EngineResult<()> {
        let mut rids = container_rids.to_vec();
        rids.sort();
        rids.dedup();
        self.store
            .write_container_summary(&rids)
            .map_err(EngineError::write("container summary"))
    }
}
