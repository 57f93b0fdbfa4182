//! Offset storage persisted to a JSON file between runs.
//!
//! Stands in for the host framework's committed offsets so `plan` can be
//! run repeatedly against the same continuations and snapshots.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::debug;

use rangefeed_state::{OffsetMap, OffsetStorage, StateError, StateResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OffsetRecord {
    partition: OffsetMap,
    offset: OffsetMap,
}

type Records = BTreeMap<String, OffsetRecord>;

pub struct FileOffsetStorage {
    path: PathBuf,
    records: Mutex<Records>,
}

impl FileOffsetStorage {
    /// Load offsets from `path`; a missing file starts empty.
    pub fn open(path: &Path) -> StateResult<Self> {
        let mut records = Records::new();
        if path.exists() {
            let bytes = std::fs::read(path).map_err(|e| StateError::Open(e.to_string()))?;
            let list: Vec<OffsetRecord> =
                serde_json::from_slice(&bytes).map_err(|e| StateError::Deserialize(e.to_string()))?;
            for record in list {
                records.insert(canonical_key(&record.partition)?, record);
            }
        }
        debug!(?path, offsets = records.len(), "offset file loaded");
        Ok(Self {
            path: path.to_path_buf(),
            records: Mutex::new(records),
        })
    }

    fn lock(&self) -> StateResult<MutexGuard<'_, Records>> {
        self.records
            .lock()
            .map_err(|_| StateError::Unavailable("offset file lock poisoned".to_string()))
    }

    /// Write the full record set to a sibling temp file, then rename it over
    /// the offsets file so readers never see a partial write.
    fn persist(&self, records: &Records) -> StateResult<()> {
        let list: Vec<&OffsetRecord> = records.values().collect();
        let bytes =
            serde_json::to_vec_pretty(&list).map_err(|e| StateError::Serialize(e.to_string()))?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, bytes).map_err(|e| StateError::Write(e.to_string()))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| StateError::Write(e.to_string()))
    }
}

fn canonical_key(partition: &OffsetMap) -> StateResult<String> {
    serde_json::to_string(partition).map_err(|e| StateError::Serialize(e.to_string()))
}

impl OffsetStorage for FileOffsetStorage {
    fn read_offset(&self, partition: &OffsetMap) -> StateResult<Option<OffsetMap>> {
        let key = canonical_key(partition)?;
        Ok(self.lock()?.get(&key).map(|r| r.offset.clone()))
    }

    fn write_offset(&self, partition: &OffsetMap, offset: &OffsetMap) -> StateResult<()> {
        let key = canonical_key(partition)?;
        let mut records = self.lock()?;
        let mut next = records.clone();
        next.insert(
            key,
            OffsetRecord {
                partition: partition.clone(),
                offset: offset.clone(),
            },
        );
        self.persist(&next)?;
        *records = next;
        Ok(())
    }
}
