//! External-store-backed metadata store.
//!
//! Topology lives in a dedicated redb table named after the configured
//! metadata location. Items are JSON bodies keyed by deterministic ids, so
//! a retried upsert writes the same id with the same content.
//! Continuations still ride the framework offset channel; the storage type
//! only decides where topology lives.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use rangefeed_core::{Continuation, ContainerRid, MetadataStorageType, Range};

use crate::error::{StateError, StateResult};
use crate::framework::ContinuationChannel;
use crate::keys::*;
use crate::offsets::OffsetStorage;
use crate::store::MetadataStore;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Metadata store keeping topology items in redb.
#[derive(Clone)]
pub struct ExternalMetadataStore {
    db: Arc<Database>,
    table: String,
    continuations: ContinuationChannel,
    database: String,
    connector_name: String,
}

impl ExternalMetadataStore {
    /// Open (or create) the metadata database at the given path.
    pub fn open(
        path: &Path,
        offsets: Arc<dyn OffsetStorage>,
        database: &str,
        connector_name: &str,
        table: &str,
    ) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self::with_db(db, offsets, database, connector_name, table);
        store.ensure_table()?;
        debug!(?path, %table, "external metadata store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory metadata database (for testing).
    pub fn open_in_memory(
        offsets: Arc<dyn OffsetStorage>,
        database: &str,
        connector_name: &str,
        table: &str,
    ) -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self::with_db(db, offsets, database, connector_name, table);
        store.ensure_table()?;
        debug!(%table, "in-memory external metadata store opened");
        Ok(store)
    }

    fn with_db(
        db: Database,
        offsets: Arc<dyn OffsetStorage>,
        database: &str,
        connector_name: &str,
        table: &str,
    ) -> Self {
        Self {
            db: Arc::new(db),
            table: table.to_string(),
            continuations: ContinuationChannel::new(offsets, database),
            database: database.to_string(),
            connector_name: connector_name.to_string(),
        }
    }

    fn definition(&self) -> TableDefinition<'_, &'static str, &'static [u8]> {
        TableDefinition::new(&self.table)
    }

    /// Create the items table if it doesn't exist yet.
    fn ensure_table(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(self.definition()).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Insert or replace an item by id.
    fn upsert_item<T: Serialize>(&self, item: &MetadataItem<T>) -> StateResult<()> {
        let value = serde_json::to_vec(item).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(self.definition()).map_err(map_err!(Table))?;
            table
                .insert(item.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(id = %item.id, "metadata item upserted");
        Ok(())
    }

    /// Get an item by id.
    fn get_item<T: DeserializeOwned>(&self, id: &str) -> StateResult<Option<MetadataItem<T>>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(self.definition()).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => {
                let item: MetadataItem<T> =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(item))
            }
            None => Ok(None),
        }
    }
}

impl MetadataStore for ExternalMetadataStore {
    fn storage_type(&self) -> MetadataStorageType {
        MetadataStorageType::External
    }

    fn location(&self) -> &str {
        &self.table
    }

    fn read_topology(&self, container_rid: &str) -> StateResult<Option<Vec<Range>>> {
        let id = container_item_id(&self.database, container_rid, &self.connector_name);
        let item: Option<MetadataItem<FeedRangesMetadata>> = self.get_item(&id)?;
        Ok(item.map(|i| i.metadata.feed_ranges))
    }

    fn write_topology(&self, container_rid: &str, ranges: &[Range]) -> StateResult<()> {
        self.upsert_item(&MetadataItem {
            id: container_item_id(&self.database, container_rid, &self.connector_name),
            metadata: FeedRangesMetadata {
                feed_ranges: ranges.to_vec(),
            },
        })
    }

    fn read_container_summary(&self) -> StateResult<Option<Vec<ContainerRid>>> {
        let id = connector_item_id(&self.database, &self.connector_name);
        let item: Option<MetadataItem<ContainersMetadata>> = self.get_item(&id)?;
        Ok(item.map(|i| i.metadata.container_rids))
    }

    fn write_container_summary(&self, container_rids: &[ContainerRid]) -> StateResult<()> {
        self.upsert_item(&MetadataItem {
            id: connector_item_id(&self.database, &self.connector_name),
            metadata: ContainersMetadata {
                container_rids: container_rids.to_vec(),
            },
        })
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
