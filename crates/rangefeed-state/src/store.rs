//! MetadataStore: uniform access to persisted topology and continuations.
//!
//! Two interchangeable backends implement the trait:
//!
//! ```text
//! MetadataStore
//!   ├── FrameworkMetadataStore   topology + continuations → OffsetStorage
//!   └── ExternalMetadataStore    topology → redb items, continuations → OffsetStorage
//! ```
//!
//! Every call touches a single key. There are no cross-key transactions.

use std::sync::Arc;

use tracing::info;

use rangefeed_core::{Continuation, ContainerRid, EngineConfig, MetadataStorageType, Range};

use crate::error::StateResult;
use crate::external::ExternalMetadataStore;
use crate::framework::FrameworkMetadataStore;
use crate::offsets::OffsetStorage;

/// Persisted topology and continuation state for one connector.
///
/// Implementations are scoped to a `(database, connector name)` pair at
/// construction. Absent records read as `Ok(None)` ("start fresh"), not
/// failure.
pub trait MetadataStore: Send + Sync {
    fn storage_type(&self) -> MetadataStorageType;

    /// Offset namespace or table name holding topology records.
    fn location(&self) -> &str;

    /// Last persisted range set of a container.
    fn read_topology(&self, container_rid: &str) -> StateResult<Option<Vec<Range>>>;

    fn write_topology(&self, container_rid: &str, ranges: &[Range]) -> StateResult<()>;

    /// Container resource ids the connector last covered.
    fn read_container_summary(&self) -> StateResult<Option<Vec<ContainerRid>>>;

    fn write_container_summary(&self, container_rids: &[ContainerRid]) -> StateResult<()>;

    /// Continuation committed for exactly this `(container, range)`.
    fn read_continuation(
        &self,
        container_rid: &str,
        range: &Range,
    ) -> StateResult<Option<Continuation>>;

    fn write_continuation(&self, continuation: &Continuation) -> StateResult<()>;
}

/// Open the backend selected by `config.metadata.storage`.
pub fn open_metadata_store(
    config: &EngineConfig,
    offsets: Arc<dyn OffsetStorage>,
) -> StateResult<Arc<dyn MetadataStore>> {
    let database = &config.connector.database;
    let connector = &config.connector.name;
    let location = &config.metadata.location;

    let store: Arc<dyn MetadataStore> = match config.metadata.storage {
        MetadataStorageType::Framework => Arc::new(FrameworkMetadataStore::new(
            offsets, database, connector, location,
        )),
        MetadataStorageType::External => {
            let store = match &config.metadata.path {
                Some(path) => ExternalMetadataStore::open(path, offsets, database, connector, location)?,
                None => ExternalMetadataStore::open_in_memory(offsets, database, connector, location)?,
            };
            Arc::new(store)
        }
    };

    info!(
        storage = store.storage_type().as_str(),
        location = store.location(),
        %database,
        %connector,
        "metadata store opened"
    );
    Ok(store)
}
