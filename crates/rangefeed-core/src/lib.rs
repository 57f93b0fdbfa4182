//! rangefeed-core: shared model for the change-feed partition engine.
//!
//! Holds the value types every other crate speaks: feed ranges and their
//! split/merge classification, continuations, task units, the
//! [`RangeProvider`] seam to the upstream service, and [`EngineConfig`].
//!
//! Nothing here performs I/O beyond reading a config file.

pub mod config;
pub mod provider;
pub mod range;
pub mod types;

pub use config::{
    ChangeFeedConfig, ConfigError, ConnectorConfig, ContainersConfig, EngineConfig, MetadataConfig,
    parse_duration,
};
pub use provider::{DiscoveryError, InMemoryRangeProvider, RangeProvider};
pub use range::{
    ClassifiedRange, MalformedRangeError, Range, RangeLineage, TopologyDiff, classify,
    validate_disjoint,
};
pub use types::*;
