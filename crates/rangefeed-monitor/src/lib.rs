//! rangefeed-monitor: detect range splits and merges while a connector runs.
//!
//! The monitor polls the upstream provider on a fixed delay, keeps the last
//! known topology to itself, and asks the host for a reassignment through
//! [`TopologyChangeNotifiable`] when the topology diverges.

pub mod monitor;
pub mod notify;

pub use monitor::{MonitorHandle, MonitorPhase, PollOutcome, TopologyMonitor};
pub use notify::{ChannelNotifier, TopologyChangeNotifiable};
