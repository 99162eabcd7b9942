use std::collections::HashMap;
use std::sync::{Arc, Weak};

use pactline_domain::{Message, RoomKey};
use pactline_protocol::TypingEvent;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

/// Configuration for `RoomEventRegistry`.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
	/// Maximum number of queued items per subscriber.
	pub subscriber_queue_capacity: usize,
}

impl Default for RegistryConfig {
	fn default() -> Self {
		Self {
			subscriber_queue_capacity: 256,
		}
	}
}

/// Items emitted on a room subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomItem<T> {
	Event(T),

	/// The subscriber fell behind and `dropped` items were discarded.
	Lagged { dropped: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
	Message,
	Typing,
}

/// Per-room fan-out of message and typing events.
///
/// Each subscription owns a bounded queue. Dropping (or `unsubscribe`-ing)
/// a subscription removes only that subscriber; a room with no subscribers
/// left is removed from the registry.
#[derive(Debug, Clone)]
pub struct RoomEventRegistry {
	inner: Arc<Mutex<Inner>>,
	cfg: RegistryConfig,
}

#[derive(Debug, Default)]
struct Inner {
	next_id: u64,
	rooms: HashMap<RoomKey, RoomEntry>,
}

#[derive(Debug, Default)]
struct RoomEntry {
	messages: Vec<Subscriber<Message>>,
	typing: Vec<Subscriber<TypingEvent>>,
}

impl RoomEntry {
	fn is_empty(&self) -> bool {
		self.messages.is_empty() && self.typing.is_empty()
	}
}

#[derive(Debug)]
struct Subscriber<T> {
	id: u64,
	tx: mpsc::Sender<RoomItem<T>>,
	pending_lag: u64,
}

/// Receiving end of a room registration.
#[derive(Debug)]
pub struct RoomSubscription<T> {
	room: RoomKey,
	id: u64,
	channel: Channel,
	rx: mpsc::Receiver<RoomItem<T>>,
	registry: Weak<Mutex<Inner>>,
}

pub type MessageSubscription = RoomSubscription<Message>;
pub type TypingSubscription = RoomSubscription<TypingEvent>;

impl RoomEventRegistry {
	pub fn new(cfg: RegistryConfig) -> Self {
		Self {
			inner: Arc::new(Mutex::new(Inner::default())),
			cfg,
		}
	}

	/// Register a message handler for `room`.
	pub fn on_message(&self, room: &RoomKey) -> MessageSubscription {
		self.subscribe(room, Channel::Message, |entry| &mut entry.messages)
	}

	/// Register a typing handler for `room`.
	pub fn on_typing(&self, room: &RoomKey) -> TypingSubscription {
		self.subscribe(room, Channel::Typing, |entry| &mut entry.typing)
	}

	fn subscribe<T>(
		&self,
		room: &RoomKey,
		channel: Channel,
		slot: impl FnOnce(&mut RoomEntry) -> &mut Vec<Subscriber<T>>,
	) -> RoomSubscription<T> {
		let (tx, rx) = mpsc::channel(self.cfg.subscriber_queue_capacity.max(1));

		let mut inner = self.inner.lock();
		inner.next_id += 1;
		let id = inner.next_id;

		let entry = inner.rooms.entry(room.clone()).or_default();
		let subs = slot(entry);
		subs.retain(|s| !s.tx.is_closed());
		subs.push(Subscriber { id, tx, pending_lag: 0 });

		debug!(room = %room, ?channel, subs = subs.len(), "room registry: subscribed");

		RoomSubscription {
			room: room.clone(),
			id,
			channel,
			rx,
			registry: Arc::downgrade(&self.inner),
		}
	}

	/// Deliver a message to every message subscriber of `room`. Returns the
	/// number of subscribers that accepted it.
	pub fn publish_message(&self, room: &RoomKey, message: &Message) -> usize {
		self.publish(room, message, |entry| &mut entry.messages)
	}

	pub fn publish_typing(&self, room: &RoomKey, event: &TypingEvent) -> usize {
		self.publish(room, event, |entry| &mut entry.typing)
	}

	fn publish<T: Clone>(
		&self,
		room: &RoomKey,
		item: &T,
		slot: impl FnOnce(&mut RoomEntry) -> &mut Vec<Subscriber<T>>,
	) -> usize {
		let mut inner = self.inner.lock();
		let Some(entry) = inner.rooms.get_mut(room) else {
			return 0;
		};

		let subs = slot(entry);
		let mut delivered = 0;
		let mut dropped_total: u64 = 0;

		for sub in subs.iter_mut() {
			match sub.tx.try_send(RoomItem::Event(item.clone())) {
				Ok(()) => {
					delivered += 1;
					if sub.pending_lag > 0
						&& sub
							.tx
							.try_send(RoomItem::Lagged {
								dropped: sub.pending_lag,
							})
							.is_ok()
					{
						sub.pending_lag = 0;
					}
				}
				Err(mpsc::error::TrySendError::Full(_)) => {
					dropped_total += 1;
					sub.pending_lag = sub.pending_lag.saturating_add(1);
				}
				Err(mpsc::error::TrySendError::Closed(_)) => {}
			}
		}

		subs.retain(|s| !s.tx.is_closed());

		if entry.is_empty() {
			inner.rooms.remove(room);
		}

		if dropped_total > 0 {
			debug!(room = %room, dropped = dropped_total, "room registry: dropped due to full subscriber queues");
		}

		delivered
	}

	/// Whether any live handler (message or typing) is registered for `room`.
	pub fn has_handlers(&self, room: &RoomKey) -> bool {
		self.inner.lock().rooms.get(room).is_some_and(|entry| {
			entry.messages.iter().any(|s| !s.tx.is_closed()) || entry.typing.iter().any(|s| !s.tx.is_closed())
		})
	}

	/// Number of live handlers registered for `room`.
	pub fn handler_count(&self, room: &RoomKey) -> usize {
		self.inner.lock().rooms.get(room).map_or(0, |entry| {
			entry.messages.iter().filter(|s| !s.tx.is_closed()).count()
				+ entry.typing.iter().filter(|s| !s.tx.is_closed()).count()
		})
	}

	/// Rooms that currently have a registry entry.
	pub fn rooms(&self) -> Vec<RoomKey> {
		let mut rooms: Vec<RoomKey> = self.inner.lock().rooms.keys().cloned().collect();
		rooms.sort();
		rooms
	}

	/// Drop every handler of `room`; their receivers observe end-of-stream.
	pub fn remove_room(&self, room: &RoomKey) -> bool {
		let removed = self.inner.lock().rooms.remove(room).is_some();
		if removed {
			debug!(room = %room, "room registry: room removed");
		}
		removed
	}

	pub fn clear(&self) {
		self.inner.lock().rooms.clear();
	}
}

impl Inner {
	fn unsubscribe(&mut self, room: &RoomKey, channel: Channel, id: u64) {
		let Some(entry) = self.rooms.get_mut(room) else {
			return;
		};

		match channel {
			Channel::Message => entry.messages.retain(|s| s.id != id),
			Channel::Typing => entry.typing.retain(|s| s.id != id),
		}

		if entry.is_empty() {
			self.rooms.remove(room);
			debug!(room = %room, "room registry: last handler gone; room removed");
		}
	}
}

impl<T> RoomSubscription<T> {
	pub fn room(&self) -> &RoomKey {
		&self.room
	}

	/// Next item, or `None` once the room was removed or the registry dropped.
	pub async fn recv(&mut self) -> Option<RoomItem<T>> {
		self.rx.recv().await
	}

	pub fn try_recv(&mut self) -> Option<RoomItem<T>> {
		self.rx.try_recv().ok()
	}

	/// Remove this handler (and the room entry if it was the last one).
	pub fn unsubscribe(self) {
		drop(self);
	}
}

impl<T> Drop for RoomSubscription<T> {
	fn drop(&mut self) {
		if let Some(inner) = self.registry.upgrade() {
			inner.lock().unsubscribe(&self.room, self.channel, self.id);
		}
	}
}
