//! rangefeed-state: persisted topology and continuation state.
//!
//! The engine reads and writes two logical record families through the
//! [`MetadataStore`] trait:
//!
//! - per-range continuations, keyed by `{database, containerRid, range}`
//! - per-container topology snapshots, keyed by
//!   `{database, containerRid, connectorName}`, plus one connector-wide
//!   container summary
//!
//! # Backends
//!
//! [`FrameworkMetadataStore`] keeps both families in the host framework's
//! offset channel ([`OffsetStorage`]). [`ExternalMetadataStore`] keeps
//! topology as JSON items in a redb table and leaves continuations in the
//! offset channel.
//!
//! All stores are `Send + Sync` and shared as `Arc<dyn MetadataStore>`.

pub mod error;
pub mod external;
pub mod framework;
pub mod keys;
pub mod offsets;
pub mod store;

pub use error::{StateError, StateResult};
pub use external::ExternalMetadataStore;
pub use framework::FrameworkMetadataStore;
pub use offsets::{InMemoryOffsetStorage, OffsetMap, OffsetStorage};
pub use store::{MetadataStore, open_metadata_store};
