use pactline_protocol::PresenceEvent;
use tokio::sync::broadcast;
use tracing::debug;

/// App-wide presence fan-out. Presence is not room-scoped, so every
/// subscriber sees every join/leave.
#[derive(Debug, Clone)]
pub struct PresenceBroadcaster {
	tx: broadcast::Sender<PresenceEvent>,
}

impl PresenceBroadcaster {
	pub fn new(capacity: usize) -> Self {
		let (tx, _) = broadcast::channel(capacity.max(1));
		Self { tx }
	}

	pub fn subscribe(&self) -> broadcast::Receiver<PresenceEvent> {
		self.tx.subscribe()
	}

	/// Publish to current subscribers; returns how many received it.
	pub fn publish(&self, event: PresenceEvent) -> usize {
		match self.tx.send(event) {
			Ok(n) => n,
			Err(_) => {
				debug!("presence event dropped: no subscribers");
				0
			}
		}
	}

	pub fn subscriber_count(&self) -> usize {
		self.tx.receiver_count()
	}
}
