//! rangefeed-engine: decide where every change-feed range resumes and
//! which task reads it.
//!
//! ```text
//! RangeProvider ──► ReconciliationEngine ──► TaskPartitioner ──► [TaskConfig]
//!                        │        ▲
//!                        ▼        │
//!                  TopologyRecorder / MetadataStore
//! ```
//!
//! `LayoutPlanner` strings the pieces together for a connector's
//! task-config computation.

pub mod error;
pub mod layout;
pub mod partition;
pub mod reconcile;
pub mod recorder;

pub use error::{EngineError, EngineResult, StaleContinuationError};
pub use layout::{Layout, LayoutPlanner, select_containers};
pub use partition::{TaskConfig, TaskConfigKeys, TaskPartitioner};
pub use reconcile::{ContainerResolution, RangeResolution, Reconciliation, ReconciliationEngine};
pub use recorder::TopologyRecorder;
