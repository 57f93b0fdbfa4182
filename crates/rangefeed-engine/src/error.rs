//! Engine error types.

use thiserror::Error;

use rangefeed_core::{DiscoveryError, MalformedRangeError, Range};
use rangefeed_state::StateError;

/// Errors that abort a layout computation.
///
/// Reconciliation and partitioning either produce a complete layout or
/// fail with one of these; partial layouts are never returned.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    MalformedRange(#[from] MalformedRangeError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error("metadata read failed for {target}: {source}")]
    MetadataRead {
        target: String,
        #[source]
        source: StateError,
    },

    #[error("metadata write failed for {target}: {source}")]
    MetadataWrite {
        target: String,
        #[source]
        source: StateError,
    },

    #[error("max_tasks must be at least 1, got {0}")]
    InvalidMaxTasks(usize),

    #[error("containers not found in database {database}: {missing:?}")]
    UnknownContainers {
        database: String,
        missing: Vec<String>,
    },

    #[error("task payload serialization failed: {0}")]
    Serialize(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    pub(crate) fn read(target: impl Into<String>) -> impl FnOnce(StateError) -> Self {
        let target = target.into();
        move |source| EngineError::MetadataRead { target, source }
    }

    pub(crate) fn write(target: impl Into<String>) -> impl FnOnce(StateError) -> Self {
        let target = target.into();
        move |source| EngineError::MetadataWrite { target, source }
    }
}

/// A persisted range that disappeared without a split or merge explaining it.
///
/// Never aborts reconciliation: the current ranges it overlaps start
/// fresh under the start-from policy instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("stale continuation for container {container_rid} range {range}: {reason}")]
pub struct StaleContinuationError {
    pub container_rid: String,
    pub range: Range,
    pub reason: String,
}
