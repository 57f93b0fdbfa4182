//! Reassignment-request delivery to the host framework.

use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Host hook the monitor calls when the topology diverged.
///
/// Must not block: the monitor calls it from its polling task.
pub trait TopologyChangeNotifiable: Send + Sync {
    fn request_reassignment(&self);
}

impl<F> TopologyChangeNotifiable for F
where
    F: Fn() + Send + Sync,
{
    fn request_reassignment(&self) {
        self()
    }
}

/// Notifier that forwards requests into a bounded channel.
///
/// Requests coalesce while the channel is full: one pending request
/// already makes the host recompute the layout.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::Sender<()>,
}

impl ChannelNotifier {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl TopologyChangeNotifiable for ChannelNotifier {
    fn request_reassignment(&self) {
        match self.tx.try_send(()) {
            Ok(()) => debug!("reassignment requested"),
            Err(mpsc::error::TrySendError::Full(())) => {
                debug!("reassignment already pending");
            }
            Err(mpsc::error::TrySendError::Closed(())) => {
                warn!("reassignment receiver dropped, request lost");
            }
        }
    }
}
