use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `ReceiveMessage` payload as delivered by the hub.
///
/// Every field is optional on the wire; the mapper decides which ones are
/// required.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageFrame {
	#[serde(default)]
	pub id: Option<String>,
	#[serde(default)]
	pub system_id: Option<String>,
	#[serde(default)]
	pub entity_id: Option<String>,
	#[serde(default)]
	pub text: Option<String>,
	#[serde(default)]
	pub author_id: Option<String>,
	#[serde(default)]
	pub author_name: Option<String>,
	#[serde(default)]
	pub sent_at: Option<DateTime<Utc>>,
	#[serde(default)]
	pub updated_at: Option<DateTime<Utc>>,
}

/// `UserTyping` payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingFrame {
	#[serde(default)]
	pub system_id: Option<String>,
	#[serde(default)]
	pub entity_id: Option<String>,
	#[serde(default)]
	pub author_id: Option<String>,
	#[serde(default)]
	pub author_name: Option<String>,
}

/// `UserJoined` / `UserLeft` payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceFrame {
	#[serde(default, alias = "authorId")]
	pub user_id: Option<String>,
	#[serde(default, alias = "authorName")]
	pub user_name: Option<String>,
	#[serde(default)]
	pub system_id: Option<String>,
	#[serde(default)]
	pub entity_id: Option<String>,
}

/// `SendMessage` argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessageFrame {
	pub system_id: String,
	pub entity_id: String,
	pub text: String,
	pub author_id: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub author_name: Option<String>,
}
