use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::RoomOperationError;
use crate::keys::MessagesKey;
use crate::manager::ConnectionManager;
use crate::registry::RoomItem;
use crate::synchronizer::CacheSynchronizer;

/// A joined room whose live messages flow into one cached history.
///
/// The handler is registered before the join so nothing delivered right
/// after the join is missed. Closing (or dropping) the binding stops the
/// feed; only `close` leaves the room.
#[derive(Debug)]
pub struct ChatRoomBinding {
	key: MessagesKey,
	manager: ConnectionManager,
	pump: JoinHandle<()>,
}

impl ChatRoomBinding {
	pub async fn open(
		manager: &ConnectionManager,
		sync: CacheSynchronizer,
		key: MessagesKey,
	) -> Result<Self, RoomOperationError> {
		let mut subscription = manager.on_message(&key.room);
		manager.join_room(&key.room).await?;

		let pump_key = key.clone();
		let pump = tokio::spawn(async move {
			while let Some(item) = subscription.recv().await {
				match item {
					RoomItem::Event(message) => {
						sync.apply_live_message(&pump_key, message);
					}
					RoomItem::Lagged { dropped } => {
						warn!(key = %pump_key, dropped, "live feed lagged; history marked stale");
						sync.cache().invalidate(&pump_key);
					}
				}
			}
			debug!(key = %pump_key, "room feed ended");
		});

		Ok(Self {
			key,
			manager: manager.clone(),
			pump,
		})
	}

	pub fn key(&self) -> &MessagesKey {
		&self.key
	}

	/// Whether the live feed is still running.
	pub fn is_live(&self) -> bool {
		!self.pump.is_finished()
	}

	/// Stop the feed and leave the room.
	pub async fn close(self) -> Result<(), RoomOperationError> {
		self.pump.abort();
		self.manager.leave_room(&self.key.room).await
	}
}

impl Drop for ChatRoomBinding {
	fn drop(&mut self) {
		self.pump.abort();
	}
}
