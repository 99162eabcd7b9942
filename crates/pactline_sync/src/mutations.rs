use std::sync::Arc;

use chrono::Utc;
use pactline_domain::{FollowStatus, Message, MessageId, Notification, Page};

use crate::api::{FollowApi, MessageApi, NotificationApi};
use crate::cache::QueryCache;
use crate::error::MutationError;
use crate::keys::{FollowKey, MessagesKey, NotificationsKey};
use crate::optimistic::OptimisticEngine;
use crate::synchronizer::MessagePages;

/// The caches the mutations reconcile.
#[derive(Debug, Clone, Default)]
pub struct SyncCaches {
	pub messages: QueryCache<MessagesKey, MessagePages>,
	pub follows: QueryCache<FollowKey, FollowStatus>,
	pub notifications: QueryCache<NotificationsKey, Page<Notification>>,
}

/// Optimistic follow, read, archive, edit and delete.
#[derive(Clone)]
pub struct Mutations {
	engine: OptimisticEngine,
	caches: SyncCaches,
	follow_api: Arc<dyn FollowApi>,
	message_api: Arc<dyn MessageApi>,
	notification_api: Arc<dyn NotificationApi>,
}

impl std::fmt::Debug for Mutations {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Mutations").field("caches", &self.caches).finish_non_exhaustive()
	}
}

impl Mutations {
	pub fn new(
		engine: OptimisticEngine,
		caches: SyncCaches,
		follow_api: Arc<dyn FollowApi>,
		message_api: Arc<dyn MessageApi>,
		notification_api: Arc<dyn NotificationApi>,
	) -> Self {
		Self {
			engine,
			caches,
			follow_api,
			message_api,
			notification_api,
		}
	}

	pub fn caches(&self) -> &SyncCaches {
		&self.caches
	}

	/// Flip follow state. The speculative state carries a synthetic
	/// subscription id; the server's answer replaces it.
	pub async fn toggle_follow(&self, key: &FollowKey) -> Result<FollowStatus, MutationError> {
		let api = Arc::clone(&self.follow_api);
		let room = key.0.clone();

		self.engine
			.run(
				"toggle_follow",
				&self.caches.follows,
				key,
				|current| Some(current.unwrap_or_default().toggled()),
				async move { api.toggle_follow(&room).await },
				|_, confirmed: &FollowStatus| Some(confirmed.clone()),
			)
			.await
	}

	/// Mark a message as read by the current user.
	pub async fn mark_message_read(&self, key: &MessagesKey, id: &MessageId) -> Result<(), MutationError> {
		let api = Arc::clone(&self.notification_api);
		let target = id.clone();

		self.engine
			.run_with_rollback(
				"mark_message_read",
				&self.caches.messages,
				key,
				|current| {
					current.map(|mut pages| {
						pages.replace_message(id, |m| m.read_by_current_user = true);
						pages
					})
				},
				async move { api.mark_read(target.as_str()).await },
				|current, _| current,
				|current, snapshot| restore_touched(current, snapshot, id),
			)
			.await
	}

	/// Archive a notification. Without archived items in view it leaves the
	/// feed (and the total drops); otherwise it is flagged in place.
	pub async fn archive_notification(&self, key: &NotificationsKey, id: &str) -> Result<(), MutationError> {
		let api = Arc::clone(&self.notification_api);
		let target = id.to_string();
		let include_archived = key.include_archived;

		self.engine
			.run(
				"archive_notification",
				&self.caches.notifications,
				key,
				|current| {
					current.map(|mut page| {
						if include_archived {
							if let Some(n) = page.items.iter_mut().find(|n| n.id == id) {
								n.archived = true;
							}
						} else {
							let before = page.items.len();
							page.items.retain(|n| n.id != id);
							let removed = (before - page.items.len()) as u64;
							page.total_items = page.total_items.saturating_sub(removed);
						}
						page
					})
				},
				async move { api.archive(&target).await },
				|current, _| current,
			)
			.await
	}

	/// Edit a message's text; the server's copy replaces the patch.
	pub async fn edit_message(&self, key: &MessagesKey, id: &MessageId, text: &str) -> Result<Message, MutationError> {
		let api = Arc::clone(&self.message_api);
		let target = id.clone();
		let new_text = text.to_string();
		let edited_at = Utc::now();

		self.engine
			.run_with_rollback(
				"edit_message",
				&self.caches.messages,
				key,
				|current| {
					current.map(|mut pages| {
						pages.replace_message(id, |m| {
							m.content = text.to_string();
							m.last_edited_at = Some(edited_at);
						});
						pages
					})
				},
				async move { api.update(&target, &new_text).await },
				|current, confirmed: &Message| {
					current.map(|mut pages| {
						pages.replace_message(&confirmed.id, |m| *m = confirmed.clone());
						pages
					})
				},
				|current, snapshot| restore_touched(current, snapshot, id),
			)
			.await
	}

	/// Delete a message; it disappears from the history immediately.
	pub async fn delete_message(&self, key: &MessagesKey, id: &MessageId) -> Result<(), MutationError> {
		let api = Arc::clone(&self.message_api);
		let target = id.clone();

		self.engine
			.run_with_rollback(
				"delete_message",
				&self.caches.messages,
				key,
				|current| {
					current.map(|mut pages| {
						pages.remove_message(id);
						pages
					})
				},
				async move { api.delete(&target).await },
				|current, _| current,
				|current, snapshot| restore_touched(current, snapshot, id),
			)
			.await
	}
}

/// Roll back one message mutation without discarding live messages that
/// arrived while it was pending.
fn restore_touched(
	current: Option<MessagePages>,
	snapshot: Option<MessagePages>,
	id: &MessageId,
) -> Option<MessagePages> {
	match (current, snapshot) {
		(Some(mut pages), Some(snapshot)) => {
			pages.restore_message(&snapshot, id);
			Some(pages)
		}
		(None, snapshot) => snapshot,
		(current, None) => current,
	}
}
