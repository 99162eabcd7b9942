use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{MessageId, RoomKey};

/// Whether an author is the platform's system account or a human user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorKind {
	System,
	User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Author {
	pub id: String,
	pub display_name: String,
	pub kind: AuthorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
	Text,
	System,
}

/// A chat message in a room.
///
/// `id` is stable across delivery channels: a fetched page and a push event
/// for the same message carry the same id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
	pub id: MessageId,
	pub room: RoomKey,
	pub author: Author,
	pub content: String,
	pub kind: MessageKind,
	pub sent_at: DateTime<Utc>,
	#[serde(default)]
	pub last_edited_at: Option<DateTime<Utc>>,
	#[serde(default)]
	pub read_by_current_user: bool,
}

impl Message {
	pub fn is_edited(&self) -> bool {
		self.last_edited_at.is_some()
	}
}

/// Notification feed entry (mark-read and archive targets).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
	pub id: String,
	#[serde(default)]
	pub room: Option<RoomKey>,
	pub title: String,
	#[serde(default)]
	pub body: Option<String>,
	#[serde(default)]
	pub read: bool,
	#[serde(default)]
	pub archived: bool,
	pub created_at: DateTime<Utc>,
}
