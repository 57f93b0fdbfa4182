//! Task partitioning: spread task units over a fixed number of task slots.
//!
//! Units are ordered by `(container rid, range)` and dealt round-robin, so
//! slot sizes differ by at most one and identical input always yields
//! byte-identical configs. The metadata unit rides in slot 0.
//!
//! Every config is a flat string map under a configurable key prefix:
//!
//! ```text
//! {prefix}.task.id                  "{connector}-task-{slot}"
//! {prefix}.task.feedRangeTaskUnits  JSON array of FeedRangeTaskUnit
//! {prefix}.task.metadataTaskUnit    JSON MetadataTaskUnit (slot 0 only)
//! {prefix}.task.startFrom           "beginning" | "now"
//! ```

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde::de::DeserializeOwned;

use rangefeed_core::{
    ContainerIdentity, ContainerRid, EngineConfig, FeedRangeTaskUnit, MetadataStorageType,
    MetadataTaskUnit, Range, StartFrom,
};

use crate::error::{EngineError, EngineResult};

/// Key names for one config prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskConfigKeys {
    prefix: String,
}

impl TaskConfigKeys {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.trim_end_matches('.').to_string(),
        }
    }

    fn key(&self, name: &str) -> String {
        format!("{}.task.{name}", self.prefix)
    }

    pub fn id(&self) -> String {
        self.key("id")
    }

    pub fn feed_range_units(&self) -> String {
        self.key("feedRangeTaskUnits")
    }

    pub fn metadata_unit(&self) -> String {
        self.key("metadataTaskUnit")
    }

    pub fn start_from(&self) -> String {
        self.key("startFrom")
    }
}

/// Configuration handed to one task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TaskConfig(BTreeMap<String, String>);

impl TaskConfig {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn entries(&self) -> &BTreeMap<String, String> {
        &self.0
    }

    pub fn into_entries(self) -> BTreeMap<String, String> {
        self.0
    }

    pub fn task_id(&self, keys: &TaskConfigKeys) -> Option<&str> {
        self.get(&keys.id())
    }

    /// Decode the task units assigned to this task.
    pub fn feed_range_units(&self, keys: &TaskConfigKeys) -> EngineResult<Vec<FeedRangeTaskUnit>> {
        match self.get(&keys.feed_range_units()) {
            Some(json) => decode(json),
            None => Ok(Vec::new()),
        }
    }

    /// Decode the metadata unit, present on slot 0 only.
    pub fn metadata_unit(&self, keys: &TaskConfigKeys) -> EngineResult<Option<MetadataTaskUnit>> {
        self.get(&keys.metadata_unit()).map(decode).transpose()
    }

    fn insert(&mut self, key: String, value: String) {
        self.0.insert(key, value);
    }
}

fn encode<T: Serialize + ?Sized>(value: &T) -> EngineResult<String> {
    serde_json::to_string(value).map_err(|e| EngineError::Serialize(e.to_string()))
}

fn decode<T: DeserializeOwned>(json: &str) -> EngineResult<T> {
    serde_json::from_str(json).map_err(|e| EngineError::Serialize(e.to_string()))
}

/// Builds task configs and the metadata unit for one connector.
#[derive(Debug, Clone)]
pub struct TaskPartitioner {
    connector_name: String,
    database: String,
    keys: TaskConfigKeys,
    start_from: StartFrom,
    storage_type: MetadataStorageType,
    storage_location: String,
}

impl TaskPartitioner {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            connector_name: config.connector.name.clone(),
            database: config.connector.database.clone(),
            keys: TaskConfigKeys::new(&config.connector.config_prefix),
            start_from: config.change_feed.start_from,
            storage_type: config.metadata.storage,
            storage_location: config.metadata.location.clone(),
        }
    }

    pub fn keys(&self) -> &TaskConfigKeys {
        &self.keys
    }

    /// Distribute units over exactly `max_tasks` configs.
    ///
    /// Slots beyond the number of units get an empty unit list.
    pub fn partition(
        &self,
        units: &[FeedRangeTaskUnit],
        containers: &[ContainerIdentity],
        max_tasks: usize,
    ) -> EngineResult<Vec<TaskConfig>> {
        if max_tasks == 0 {
            return Err(EngineError::InvalidMaxTasks(max_tasks));
        }

        let mut ordered: Vec<&FeedRangeTaskUnit> = units.iter().collect();
        ordered.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

        let mut slots: Vec<Vec<&FeedRangeTaskUnit>> = vec![Vec::new(); max_tasks];
        for (i, unit) in ordered.into_iter().enumerate() {
            slots[i % max_tasks].push(unit);
        }

        let metadata = self.metadata_unit(units, containers);
        let mut configs = Vec::with_capacity(max_tasks);
        for (slot, assigned) in slots.iter().enumerate() {
            let mut config = TaskConfig::default();
            config.insert(
                self.keys.id(),
                format!("{}-task-{slot}", self.connector_name),
            );
            config.insert(self.keys.feed_range_units(), encode(assigned)?);
            config.insert(
                self.keys.start_from(),
                self.start_from.as_str().to_string(),
            );
            if slot == 0 {
                config.insert(self.keys.metadata_unit(), encode(&metadata)?);
            }
            configs.push(config);
        }
        Ok(configs)
    }

    /// Summary of everything covered: containers and their current ranges.
    ///
    /// Containers without units still appear, with an empty range list.
    pub fn metadata_unit(
        &self,
        units: &[FeedRangeTaskUnit],
        containers: &[ContainerIdentity],
    ) -> MetadataTaskUnit {
        let mut by_container: BTreeMap<ContainerRid, BTreeSet<Range>> = containers
            .iter()
            .map(|c| (c.container_resource_id.clone(), BTreeSet::new()))
            .collect();
        for unit in units {
            by_container
                .entry(unit.container_resource_id.clone())
                .or_default()
                .insert(unit.range.clone());
        }

        MetadataTaskUnit {
            connector_name: self.connector_name.clone(),
            database_name: self.database.clone(),
            container_resource_ids: by_container.keys().cloned().collect(),
            effective_ranges_by_container: by_container
                .into_iter()
                .map(|(rid, ranges)| (rid, ranges.into_iter().collect()))
                .collect(),
            storage_location: self.storage_location.clone(),
            storage_type: self.storage_type,
        }
    }
}
