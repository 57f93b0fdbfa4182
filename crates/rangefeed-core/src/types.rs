//! Shared types used across rangefeed crates.
//!
//! Wire-facing types serialize with camelCase field names because they end
//! up inside per-task configuration payloads and persisted metadata items.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::range::Range;

/// Resource id of a container, the stable key used everywhere.
pub type ContainerRid = String;

// ── Containers ────────────────────────────────────────────────────

/// A source container. `container_resource_id` survives renames;
/// `container_id` does not and is never used as a persistence key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerIdentity {
    pub database_name: String,
    pub container_id: String,
    pub container_resource_id: ContainerRid,
}

impl ContainerIdentity {
    pub fn new(database: &str, container_id: &str, container_resource_id: &str) -> Self {
        Self {
            database_name: database.to_string(),
            container_id: container_id.to_string(),
            container_resource_id: container_resource_id.to_string(),
        }
    }
}

// ── Continuations ─────────────────────────────────────────────────

/// Last change-feed sequence number observed for a range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SequenceToken(pub u64);

impl fmt::Display for SequenceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque resume state for exactly one `(container, range)` pair.
///
/// `token` is produced by the feed reader and never interpreted here;
/// `last_sequence_token` is the comparable resume point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Continuation {
    pub container_resource_id: ContainerRid,
    pub range: Range,
    pub token: String,
    pub last_sequence_token: SequenceToken,
}

impl Continuation {
    /// The same resume point bound to a different range.
    pub fn rescoped(&self, range: &Range) -> Self {
        Self {
            container_resource_id: self.container_resource_id.clone(),
            range: range.clone(),
            token: self.token.clone(),
            last_sequence_token: self.last_sequence_token,
        }
    }

    /// The continuation with the smallest sequence token.
    ///
    /// Ties resolve to the lowest range so the choice is deterministic.
    pub fn oldest<'a, I>(candidates: I) -> Option<&'a Continuation>
    where
        I: IntoIterator<Item = &'a Continuation>,
    {
        candidates
            .into_iter()
            .min_by(|a, b| {
                a.last_sequence_token
                    .cmp(&b.last_sequence_token)
                    .then_with(|| a.range.cmp(&b.range))
            })
    }
}

// ── Task units ────────────────────────────────────────────────────

/// Where a range without a continuation starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartFrom {
    #[default]
    Beginning,
    Now,
}

impl StartFrom {
    pub fn as_str(&self) -> &'static str {
        match self {
            StartFrom::Beginning => "beginning",
            StartFrom::Now => "now",
        }
    }
}

/// Which backend holds topology metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataStorageType {
    /// The host framework's offset channel.
    #[default]
    Framework,
    /// A dedicated metadata container.
    External,
}

impl MetadataStorageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataStorageType::Framework => "framework",
            MetadataStorageType::External => "external",
        }
    }
}

/// One range of one container, assigned to exactly one task slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedRangeTaskUnit {
    pub database_name: String,
    pub container_id: String,
    pub container_resource_id: ContainerRid,
    pub range: Range,
    /// Absent means "start per the configured start-from policy".
    pub continuation: Option<Continuation>,
    /// Topic records from this range are written to.
    pub destination: String,
}

impl FeedRangeTaskUnit {
    /// Stable ordering key: container resource id, then range.
    pub fn sort_key(&self) -> (&str, &Range) {
        (&self.container_resource_id, &self.range)
    }
}

/// Topology bookkeeping unit, one per connector generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataTaskUnit {
    pub connector_name: String,
    pub database_name: String,
    pub container_resource_ids: Vec<ContainerRid>,
    pub effective_ranges_by_container: BTreeMap<ContainerRid, Vec<Range>>,
    pub storage_location: String,
    pub storage_type: MetadataStorageType,
}
