//! Record shapes and deterministic keys for persisted metadata.
//!
//! Framework offsets are keyed by a partition map and carry an offset map,
//! both JSON objects. External metadata items are keyed by
//! `{database}_{connectorName}` (connector-wide container summary) and
//! `{database}_{containerRid}_{connectorName}` (per-container topology).

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use rangefeed_core::{ContainerRid, Range, SequenceToken};

use crate::error::{StateError, StateResult};
use crate::offsets::OffsetMap;

// ── Framework offset records ──────────────────────────────────────

/// Partition key of a per-range continuation record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinuationPartition {
    pub database_name: String,
    pub container_resource_id: ContainerRid,
    pub range: Range,
}

/// Offset value of a per-range continuation record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinuationOffset {
    pub continuation: String,
    pub last_sequence_token: SequenceToken,
}

/// Partition key of a per-container topology snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopologyPartition {
    pub database_name: String,
    pub container_resource_id: ContainerRid,
    pub connector_name: String,
}

/// Offset value of a per-container topology snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopologyOffset {
    pub effective_ranges: Vec<Range>,
}

/// Partition key of the connector-wide container summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorPartition {
    pub database_name: String,
    pub connector_name: String,
}

/// Offset value of the connector-wide container summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorOffset {
    pub container_resource_ids: Vec<ContainerRid>,
}

/// Serialize a record into an offset map.
pub fn to_offset_map<T: Serialize>(record: &T) -> StateResult<OffsetMap> {
    match serde_json::to_value(record).map_err(|e| StateError::Serialize(e.to_string()))? {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(StateError::Serialize(format!(
            "record serialized to non-object JSON: {other}"
        ))),
    }
}

/// Deserialize a record from an offset map.
pub fn from_offset_map<T: DeserializeOwned>(map: &OffsetMap) -> StateResult<T> {
    serde_json::from_value(serde_json::Value::Object(map.clone()))
        .map_err(|e| StateError::Deserialize(e.to_string()))
}

// ── External metadata items ───────────────────────────────────────

/// Item id of the connector-wide container summary.
pub fn connector_item_id(database: &str, connector_name: &str) -> String {
    format!("{database}_{connector_name}")
}

/// Item id of a container's topology snapshot.
pub fn container_item_id(database: &str, container_rid: &str, connector_name: &str) -> String {
    format!("{database}_{container_rid}_{connector_name}")
}

/// A metadata item as stored in the external container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataItem<T> {
    pub id: String,
    pub metadata: T,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainersMetadata {
    pub container_rids: Vec<ContainerRid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedRangesMetadata {
    pub feed_ranges: Vec<Range>,
}
