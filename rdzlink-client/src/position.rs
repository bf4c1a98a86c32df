//! Position sources feeding the coordinator.

use rdzlink_rs_protocol::PositionFix;
use tokio::sync::broadcast;

/// Something that publishes position fixes.
///
/// The coordinator subscribes on `start` and drops its receiver on `stop`,
/// so a source can tell from its subscriber count whether it is in use.
pub trait PositionSource: Send + 'static {
    fn subscribe(&self) -> broadcast::Receiver<PositionFix>;
}

/// A broadcast channel of fixes, fed by the host's location provider.
#[derive(Clone, Debug)]
pub struct PositionFeed {
    tx: broadcast::Sender<PositionFix>,
}

impl PositionFeed {
    /// Create a feed that buffers up to `capacity` fixes per slow subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish a fix. Returns the number of subscribers that will see it.
    pub fn publish(&self, fix: PositionFix) -> usize {
        self.tx.send(fix).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for PositionFeed {
    fn default() -> Self {
        Self::new(16)
    }
}

impl PositionSource for PositionFeed {
    fn subscribe(&self) -> broadcast::Receiver<PositionFix> {
        self.tx.subscribe()
    }
}
