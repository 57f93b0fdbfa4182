//! Framework-offset-backed metadata store.
//!
//! Topology snapshots and continuations are plain offset records in the
//! host framework's channel:
//!
//! ```text
//! {databaseName, containerResourceId, range}         → {continuation, lastSequenceToken}
//! {databaseName, containerResourceId, connectorName} → {effectiveRanges}
//! {databaseName, connectorName}                      → {containerResourceIds}
//! ```

use std::sync::Arc;

use tracing::debug;

use rangefeed_core::{Continuation, ContainerRid, MetadataStorageType, Range};

use crate::error::StateResult;
use crate::keys::*;
use crate::offsets::OffsetStorage;
use crate::store::MetadataStore;

/// Continuation records, shared by both backends.
#[derive(Clone)]
pub(crate) struct ContinuationChannel {
    offsets: Arc<dyn OffsetStorage>,
    database: String,
}

impl ContinuationChannel {
    pub(crate) fn new(offsets: Arc<dyn OffsetStorage>, database: &str) -> Self {
        Self {
            offsets,
            database: database.to_string(),
        }
    }

    fn partition(&self, container_rid: &str, range: &Range) -> ContinuationPartition {
        ContinuationPartition {
            database_name: self.database.clone(),
            container_resource_id: container_rid.to_string(),
            range: range.clone(),
        }
    }

    pub(crate) fn read(
        &self,
        container_rid: &str,
        range: &Range,
    ) -> StateResult<Option<Continuation>> {
        let partition = to_offset_map(&self.partition(container_rid, range))?;
        let Some(offset) = self.offsets.read_offset(&partition)? else {
            return Ok(None);
        };
        let offset: ContinuationOffset = from_offset_map(&offset)?;
        Ok(Some(Continuation {
            container_resource_id: container_rid.to_string(),
            range: range.clone(),
            token: offset.continuation,
            last_sequence_token: offset.last_sequence_token,
        }))
    }

    pub(crate) fn write(&self, continuation: &Continuation) -> StateResult<()> {
        let partition = to_offset_map(
            &self.partition(&continuation.container_resource_id, &continuation.range),
        )?;
        let offset = to_offset_map(&ContinuationOffset {
            continuation: continuation.token.clone(),
            last_sequence_token: continuation.last_sequence_token,
        })?;
        self.offsets.write_offset(&partition, &offset)?;
        debug!(
            container_rid = %continuation.container_resource_id,
            range = %continuation.range,
            sequence = %continuation.last_sequence_token,
            "continuation stored"
        );
        Ok(())
    }
}

/// Metadata store that keeps everything in the framework offset channel.
pub struct FrameworkMetadataStore {
    offsets: Arc<dyn OffsetStorage>,
    continuations: ContinuationChannel,
    database: String,
    connector_name: String,
    location: String,
}

impl FrameworkMetadataStore {
    pub fn new(
        offsets: Arc<dyn OffsetStorage>,
        database: &str,
        connector_name: &str,
        location: &str,
    ) -> Self {
        Self {
            continuations: ContinuationChannel::new(offsets.clone(), database),
            offsets,
            database: database.to_string(),
            connector_name: connector_name.to_string(),
            location: location.to_string(),
        }
    }

    fn topology_partition(&self, container_rid: &str) -> TopologyPartition {
        TopologyPartition {
            database_name: self.database.clone(),
            container_resource_id: container_rid.to_string(),
            connector_name: self.connector_name.clone(),
        }
    }

    fn connector_partition(&self) -> ConnectorPartition {
        ConnectorPartition {
            database_name: self.database.clone(),
            connector_name: self.connector_name.clone(),
        }
    }
}

impl MetadataStore for FrameworkMetadataStore {
    fn storage_type(&self) -> MetadataStorageType {
        MetadataStorageType::Framework
    }

    fn location(&self) -> &str {
        &self.location
    }

    fn read_topology(&self, container_rid: &str) -> StateResult<Option<Vec<Range>>> {
        let partition = to_offset_map(&self.topology_partition(container_rid))?;
        match self.offsets.read_offset(&partition)? {
            Some(offset) => {
                let offset: TopologyOffset = from_offset_map(&offset)?;
                Ok(Some(offset.effective_ranges))
            }
            None => Ok(None),
        }
    }

    fn write_topology(&self, container_rid: &str, ranges: &[Range]) -> StateResult<()> {
        let partition = to_offset_map(&self.topology_partition(container_rid))?;
        let offset = to_offset_map(&TopologyOffset {
            effective_ranges: ranges.to_vec(),
        })?;
        self.offsets.write_offset(&partition, &offset)?;
        debug!(%container_rid, ranges = ranges.len(), "topology snapshot stored");
        Ok(())
    }

    fn read_container_summary(&self) -> StateResult<Option<Vec<ContainerRid>>> {
        let partition = to_offset_map(&self.connector_partition())?;
        match self.offsets.read_offset(&partition)? {
            Some(offset) => {
                let offset: ConnectorOffset = from_offset_map(&offset)?;
                Ok(Some(offset.container_resource_ids))
            }
            None => Ok(None),
        }
    }

    fn write_container_summary(&self, container_rids: &[ContainerRid]) -> StateResult<()> {
        let partition = to_offset_map(&self.connector_partition())?;
        let offset = to_offset_map(&ConnectorOffset {
            container_resource_ids: container_rids.to_vec(),
        })?;
        self.offsets.write_offset(&partition, &offset)?;
        debug!(containers = container_rids.len(), "container summary stored");
        Ok(())
    }

    fn read_continuation(
        &self,
        container_rid: &str,
        range: &Range,
    ) -> StateResult<Option<Continuation>> {
        self.continuations.read(container_rid, range)
    }

    fn write_continuation(&self, continuation: &Continuation) -> StateResult<()> {
        self.continuations.write(continuation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StateError;
    use crate::offsets::InMemoryOffsetStorage;
    use rangefeed_core::SequenceToken;

    fn store() -> (Arc<InMemoryOffsetStorage>, FrameworkMetadataStore) {
        let offsets = Arc::new(InMemoryOffsetStorage::new());
        let store = FrameworkMetadataStore::new(offsets.clone(), "sales", "feed", "_meta");
        (offsets, store)
    }

    fn r(min: &str, max: &str) -> Range {
        Range::new(min, max).unwrap()
    }

    #[test]
    fn empty_store_reads_absent() {
        let (_, store) = store();
        assert!(store.read_topology("rid-1").unwrap().is_none());
        assert!(store.read_container_summary().unwrap().is_none());
        assert!(store.read_continuation("rid-1", &Range::full()).unwrap().is_none());
    }

    #[test]
    fn topology_roundtrip() {
        let (_, store) = store();
        let ranges = vec![r("", "80"), r("80", "FF")];

        store.write_topology("rid-1", &ranges).unwrap();

        assert_eq!(store.read_topology("rid-1").unwrap(), Some(ranges));
        assert!(store.read_topology("rid-2").unwrap().is_none());
    }

    #[test]
    fn continuation_is_keyed_by_exact_range() {
        let (_, store) = store();
        let continuation = Continuation {
            container_resource_id: "rid-1".to_string(),
            range: r("", "80"),
            token: "\"42\"".to_string(),
            last_sequence_token: SequenceToken(42),
        };

        store.write_continuation(&continuation).unwrap();

        assert_eq!(
            store.read_continuation("rid-1", &r("", "80")).unwrap(),
            Some(continuation)
        );
        assert!(store.read_continuation("rid-1", &r("", "40")).unwrap().is_none());
    }

    #[test]
    fn container_summary_roundtrip() {
        let (_, store) = store();
        store
            .write_container_summary(&["rid-1".to_string(), "rid-2".to_string()])
            .unwrap();
        assert_eq!(
            store.read_container_summary().unwrap(),
            Some(vec!["rid-1".to_string(), "rid-2".to_string()])
        );
    }

    #[test]
    fn records_use_framework_partition_shapes() {
        let (offsets, store) = store();
        store.write_topology("rid-1", &[Range::full()]).unwrap();

        let entries = offsets.entries().unwrap();
        assert_eq!(entries.len(), 1);
        let (partition, offset) = &entries[0];
        assert_eq!(partition["connectorName"], "feed");
        assert_eq!(partition["containerResourceId"], "rid-1");
        assert!(offset["effectiveRanges"].is_array());
    }

    #[test]
    fn corrupt_offset_is_a_read_error() {
        let (offsets, store) = store();
        let partition = to_offset_map(&store.topology_partition("rid-1")).unwrap();
        let mut garbage = crate::offsets::OffsetMap::new();
        garbage.insert("effectiveRanges".to_string(), serde_json::json!("nope"));
        offsets.write_offset(&partition, &garbage).unwrap();

        assert!(matches!(
            store.read_topology("rid-1"),
            Err(StateError::Deserialize(_))
        ));
    }
}
