//! Topology monitor: background task that re-enumerates container ranges.
//!
//! Each poll lists the selected containers and their ranges, records a
//! fresh snapshot as a liveness signal, and compares the observation with
//! the last known topology held in memory:
//!
//! ```text
//! Idle ──tick──► Polling ──► Stable    ──► Idle
//!                       └──► Divergent ──► request_reassignment() ──► Idle
//! ```
//!
//! The monitor never recomputes the layout itself. A failed poll is logged
//! and retried on the next tick; it is not divergence.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use rangefeed_core::{
    ConfigError, ContainerIdentity, ContainerRid, ContainersConfig, EngineConfig, MetadataTaskUnit,
    Range,
};
use rangefeed_engine::{
    EngineResult, ReconciliationEngine, StaleContinuationError, TopologyRecorder,
    select_containers,
};

use crate::notify::TopologyChangeNotifiable;

/// What the monitor is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorPhase {
    Idle,
    Polling,
}

/// Result of a single poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// First observation without a seed; stored as the baseline.
    Baseline,
    Stable,
    /// Containers whose ranges changed, appeared or disappeared.
    Divergent { changed: Vec<ContainerRid> },
    /// Enumeration failed; the last known topology is kept.
    Failed,
}

/// Background divergence detector for one connector.
pub struct TopologyMonitor {
    connector_name: String,
    database: String,
    containers: ContainersConfig,
    engine: Arc<ReconciliationEngine>,
    recorder: TopologyRecorder,
    notifier: Arc<dyn TopologyChangeNotifiable>,
    poll_delay: Duration,
    /// Last known topology; `None` until seeded or first observed.
    known: Option<BTreeMap<ContainerRid, Vec<Range>>>,
    /// Continuations dropped by the last successful poll's snapshot.
    stale: Vec<StaleContinuationError>,
    phase: MonitorPhase,
}

/// One successful enumeration plus what recording it dropped.
struct Observation {
    topology: BTreeMap<ContainerRid, Vec<Range>>,
    stale: Vec<StaleContinuationError>,
}

impl TopologyMonitor {
    pub fn new(
        config: &EngineConfig,
        engine: Arc<ReconciliationEngine>,
        notifier: Arc<dyn TopologyChangeNotifiable>,
    ) -> Result<Self, ConfigError> {
        let poll_delay = config.metadata.poll_delay()?;
        Ok(Self {
            connector_name: config.connector.name.clone(),
            database: config.connector.database.clone(),
            containers: config.containers.clone(),
            recorder: TopologyRecorder::new(engine.store().clone()),
            engine,
            notifier,
            poll_delay,
            known: None,
            stale: Vec::new(),
            phase: MonitorPhase::Idle,
        })
    }

    /// Start from the topology a layout was computed with.
    pub fn seed(&mut self, metadata: &MetadataTaskUnit) {
        self.known = Some(metadata.effective_ranges_by_container.clone());
        debug!(
            connector = %self.connector_name,
            containers = metadata.effective_ranges_by_container.len(),
            "topology monitor seeded"
        );
    }

    pub fn with_poll_delay(mut self, poll_delay: Duration) -> Self {
        self.poll_delay = poll_delay;
        self
    }

    pub fn poll_delay(&self) -> Duration {
        self.poll_delay
    }

    pub fn phase(&self) -> MonitorPhase {
        self.phase
    }

    pub fn known_topology(&self) -> Option<&BTreeMap<ContainerRid, Vec<Range>>> {
        self.known.as_ref()
    }

    /// Stale continuations reported while recording the last successful poll.
    pub fn stale_continuations(&self) -> &[StaleContinuationError] {
        &self.stale
    }

    /// Run one poll and notify the host on divergence.
    pub async fn poll_once(&mut self) -> PollOutcome {
        self.phase = MonitorPhase::Polling;

        let outcome = match self.observe().await {
            Ok(observation) => {
                self.stale = observation.stale;
                self.compare(observation.topology)
            }
            Err(e) => {
                warn!(
                    connector = %self.connector_name,
                    error = %e,
                    "topology poll failed, retrying next tick"
                );
                PollOutcome::Failed
            }
        };

        if let PollOutcome::Divergent { changed } = &outcome {
            info!(
                connector = %self.connector_name,
                containers = ?changed,
                "topology diverged, requesting reassignment"
            );
            self.notifier.request_reassignment();
        }

        self.phase = MonitorPhase::Idle;
        outcome
    }

    /// Spawn the polling loop as a background task.
    pub fn spawn(mut self) -> MonitorHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let connector = self.connector_name.clone();
        let handle = tokio::spawn(async move {
            self.run(shutdown_rx).await;
        });
        info!(%connector, "topology monitor started");
        MonitorHandle {
            handle,
            shutdown_tx,
        }
    }

    async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        debug!(connector = %self.connector_name, delay = ?self.poll_delay, "monitor loop starting");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.poll_delay) => {
                    self.poll_once().await;
                }
                _ = shutdown.changed() => {
                    debug!(connector = %self.connector_name, "monitor loop shutting down");
                    break;
                }
            }
        }
    }

    async fn observe(&self) -> EngineResult<Observation> {
        let listed = self.engine.provider().list_containers(&self.database).await?;
        let containers = select_containers(&self.containers, listed);

        let mut observed = BTreeMap::new();
        for container in &containers {
            let ranges = self.engine.current_ranges(container).await?;
            observed.insert(container.container_resource_id.clone(), ranges);
        }

        let stale = self.record(&containers, &observed);
        Ok(Observation {
            topology: observed,
            stale,
        })
    }

    /// Persist the observed topology. Failures are logged only.
    ///
    /// Returns the stale continuations the new snapshots leave behind.
    fn record(
        &self,
        containers: &[ContainerIdentity],
        observed: &BTreeMap<ContainerRid, Vec<Range>>,
    ) -> Vec<StaleContinuationError> {
        let mut stale = Vec::new();
        for container in containers {
            let rid = &container.container_resource_id;
            let Some(ranges) = observed.get(rid) else {
                continue;
            };
            let recorded = self
                .engine
                .resolve_container(container, ranges)
                .and_then(|resolution| {
                    self.recorder.record_container(&resolution)?;
                    Ok(resolution.stale)
                });
            match recorded {
                Ok(dropped) => stale.extend(dropped),
                Err(e) => {
                    warn!(container_rid = %rid, error = %e, "failed to record topology snapshot")
                }
            }
        }
        let rids: Vec<ContainerRid> = observed.keys().cloned().collect();
        if let Err(e) = self.recorder.record_summary(&rids) {
            warn!(error = %e, "failed to record container summary");
        }
        stale
    }

    fn compare(&mut self, observed: BTreeMap<ContainerRid, Vec<Range>>) -> PollOutcome {
        let outcome = match &self.known {
            None => {
                debug!(connector = %self.connector_name, "topology baseline recorded");
                PollOutcome::Baseline
            }
            Some(known) => {
                let rids: BTreeSet<&ContainerRid> = known.keys().chain(observed.keys()).collect();
                let changed: Vec<ContainerRid> = rids
                    .into_iter()
                    .filter(|rid| known.get(*rid) != observed.get(*rid))
                    .cloned()
                    .collect();
                if changed.is_empty() {
                    debug!(connector = %self.connector_name, "topology stable");
                    PollOutcome::Stable
                } else {
                    PollOutcome::Divergent { changed }
                }
            }
        };
        self.known = Some(observed);
        outcome
    }
}

/// Handle to a spawned monitor.
pub struct MonitorHandle {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl MonitorHandle {
    /// Signal shutdown and wait for the loop to exit.
    ///
    /// An in-flight poll finishes first; an idle loop exits immediately.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "topology monitor task ended abnormally");
        }
        info!("topology monitor stopped");
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
