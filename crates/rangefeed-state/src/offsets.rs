//! The host framework's offset channel.
//!
//! Offsets are key/value pairs of JSON objects: a partition map naming the
//! thing being tracked, and an offset map holding its latest position. The
//! host persists whatever is written here as part of its normal
//! checkpointing; every read and write touches exactly one partition.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use crate::error::{StateError, StateResult};

/// A JSON object used as partition key or offset value.
pub type OffsetMap = serde_json::Map<String, serde_json::Value>;

/// Capability the host framework provides for committed offsets.
pub trait OffsetStorage: Send + Sync {
    /// Latest offset for a partition, `None` if never committed.
    fn read_offset(&self, partition: &OffsetMap) -> StateResult<Option<OffsetMap>>;

    /// Record an offset for a partition. Idempotent for identical input.
    fn write_offset(&self, partition: &OffsetMap, offset: &OffsetMap) -> StateResult<()>;
}

/// Offset storage held in process memory.
///
/// Partition maps are canonicalised by their JSON text (object keys are
/// sorted), so logically equal partitions always hit the same entry.
#[derive(Default)]
pub struct InMemoryOffsetStorage {
    offsets: Mutex<BTreeMap<String, (OffsetMap, OffsetMap)>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl InMemoryOffsetStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of partitions with a committed offset.
    pub fn len(&self) -> StateResult<usize> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> StateResult<bool> {
        Ok(self.lock()?.is_empty())
    }

    /// All `(partition, offset)` pairs in canonical partition order.
    pub fn entries(&self) -> StateResult<Vec<(OffsetMap, OffsetMap)>> {
        Ok(self.lock()?.values().cloned().collect())
    }

    /// Make reads fail with `StateError::Unavailable` until cleared.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make writes fail with `StateError::Unavailable` until cleared.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn lock(
        &self,
    ) -> StateResult<std::sync::MutexGuard<'_, BTreeMap<String, (OffsetMap, OffsetMap)>>> {
        self.offsets
            .lock()
            .map_err(|_| StateError::Unavailable("offset map lock poisoned".to_string()))
    }
}

fn canonical_key(partition: &OffsetMap) -> StateResult<String> {
    serde_json::to_string(partition).map_err(|e| StateError::Serialize(e.to_string()))
}

impl OffsetStorage for InMemoryOffsetStorage {
    fn read_offset(&self, partition: &OffsetMap) -> StateResult<Option<OffsetMap>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StateError::Unavailable("offset reads disabled".to_string()));
        }
        let key = canonical_key(partition)?;
        Ok(self.lock()?.get(&key).map(|(_, offset)| offset.clone()))
    }

    fn write_offset(&self, partition: &OffsetMap, offset: &OffsetMap) -> StateResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StateError::Unavailable("offset writes disabled".to_string()));
        }
        let key = canonical_key(partition)?;
        self.lock()?
            .insert(key.clone(), (partition.clone(), offset.clone()));
        debug!(partition = %key, "offset recorded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: serde_json::Value) -> OffsetMap {
        match value {
            serde_json::Value::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn read_missing_returns_none() {
        let storage = InMemoryOffsetStorage::new();
        let partition = map(json!({"db": "sales"}));
        assert!(storage.read_offset(&partition).unwrap().is_none());
        assert!(storage.is_empty().unwrap());
    }

    #[test]
    fn write_then_read() {
        let storage = InMemoryOffsetStorage::new();
        let partition = map(json!({"db": "sales", "rid": "rid-1"}));
        let offset = map(json!({"lsn": 10}));

        storage.write_offset(&partition, &offset).unwrap();

        // Key order in the partition map does not matter.
        let reordered = map(json!({"rid": "rid-1", "db": "sales"}));
        assert_eq!(storage.read_offset(&reordered).unwrap(), Some(offset));
    }

    #[test]
    fn rewrite_is_idempotent() {
        let storage = InMemoryOffsetStorage::new();
        let partition = map(json!({"db": "sales"}));
        let offset = map(json!({"lsn": 10}));

        storage.write_offset(&partition, &offset).unwrap();
        storage.write_offset(&partition, &offset).unwrap();

        assert_eq!(storage.len().unwrap(), 1);
        assert_eq!(storage.entries().unwrap()[0].1, offset);
    }

    #[test]
    fn failure_injection() {
        let storage = InMemoryOffsetStorage::new();
        let partition = map(json!({"db": "sales"}));

        storage.set_fail_writes(true);
        assert!(matches!(
            storage.write_offset(&partition, &OffsetMap::new()),
            Err(StateError::Unavailable(_))
        ));

        storage.set_fail_reads(true);
        assert!(storage.read_offset(&partition).is_err());

        storage.set_fail_reads(false);
        assert!(storage.read_offset(&partition).unwrap().is_none());
    }
}
