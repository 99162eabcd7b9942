//! Translation between hub payloads and domain types.
//!
//! Everything here is pure: no I/O, no stored state.

use pactline_domain::{Author, AuthorKind, Message, MessageId, MessageKind, RoomKey};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::events;
use crate::frames::{MessageFrame, OutgoingMessageFrame, PresenceFrame, TypingFrame};

/// Author id of the platform's system account.
pub const SYSTEM_AUTHOR_ID: &str = "00000000-0000-0000-0000-000000000000";

const SYSTEM_DISPLAY_NAME: &str = "System";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MappingError {
	#[error("missing required field: {0}")]
	MissingField(&'static str),

	#[error("invalid field {field}: {reason}")]
	InvalidField {
		field: &'static str,
		reason: String,
	},

	#[error("{target}: missing payload argument")]
	MissingArgument {
		target: String,
	},

	#[error("{target}: malformed payload: {reason}")]
	Payload {
		target: String,
		reason: String,
	},
}

/// Per-session facts the mapper needs but cannot derive from a frame.
#[derive(Debug, Clone, Default)]
pub struct MappingContext {
	pub current_user_id: Option<String>,
}

/// Someone is typing in a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingEvent {
	pub room: RoomKey,
	pub author_id: String,
	pub author_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PresenceKind {
	Joined,
	Left,
}

/// App-wide presence change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEvent {
	pub kind: PresenceKind,
	pub user_id: String,
	pub user_name: Option<String>,
	pub room: Option<RoomKey>,
}

/// A decoded server → client event.
#[derive(Debug, Clone, PartialEq)]
pub enum HubEvent {
	Message(Box<Message>),
	Typing(TypingEvent),
	Presence(PresenceEvent),
	ServerError(String),
}

impl HubEvent {
	/// Room the event is scoped to, if any.
	pub fn room(&self) -> Option<&RoomKey> {
		match self {
			HubEvent::Message(m) => Some(&m.room),
			HubEvent::Typing(t) => Some(&t.room),
			HubEvent::Presence(_) | HubEvent::ServerError(_) => None,
		}
	}
}

/// A message the local user wants to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageIntent {
	pub room: RoomKey,
	pub text: String,
	pub author_id: String,
	pub author_name: Option<String>,
}

fn required(value: Option<String>, field: &'static str) -> Result<String, MappingError> {
	match value {
		Some(v) if !v.trim().is_empty() => Ok(v),
		_ => Err(MappingError::MissingField(field)),
	}
}

fn non_empty(value: Option<String>) -> Option<String> {
	value.filter(|v| !v.trim().is_empty())
}

fn room_from_parts(system_id: Option<String>, entity_id: Option<String>) -> Result<RoomKey, MappingError> {
	let system_id = required(system_id, "systemId")?;
	let entity_id = required(entity_id, "entityId")?;
	RoomKey::from_parts(system_id, entity_id).map_err(|e| MappingError::InvalidField {
		field: "systemId",
		reason: e.to_string(),
	})
}

fn author_kind(author_id: &str) -> AuthorKind {
	if author_id.eq_ignore_ascii_case(SYSTEM_AUTHOR_ID) {
		AuthorKind::System
	} else {
		AuthorKind::User
	}
}

/// Map a `ReceiveMessage` frame to a domain message.
///
/// The message counts as edited only when `updatedAt` is present and differs
/// from `sentAt`.
pub fn to_domain_message(frame: MessageFrame, ctx: &MappingContext) -> Result<Message, MappingError> {
	let id = required(frame.id, "id")?;
	let id = MessageId::new(id).map_err(|e| MappingError::InvalidField {
		field: "id",
		reason: e.to_string(),
	})?;
	let room = room_from_parts(frame.system_id, frame.entity_id)?;
	let content = frame.text.ok_or(MappingError::MissingField("text"))?;
	let author_id = required(frame.author_id, "authorId")?;
	let sent_at = frame.sent_at.ok_or(MappingError::MissingField("sentAt"))?;

	let kind = author_kind(&author_id);
	let display_name = match (non_empty(frame.author_name), kind) {
		(Some(name), _) => name,
		(None, AuthorKind::System) => SYSTEM_DISPLAY_NAME.to_string(),
		(None, AuthorKind::User) => author_id.clone(),
	};

	let last_edited_at = frame.updated_at.filter(|updated| *updated != sent_at);
	let read_by_current_user = ctx.current_user_id.as_deref() == Some(author_id.as_str());

	Ok(Message {
		id,
		room,
		author: Author {
			id: author_id,
			display_name,
			kind,
		},
		content,
		kind: match kind {
			AuthorKind::System => MessageKind::System,
			AuthorKind::User => MessageKind::Text,
		},
		sent_at,
		last_edited_at,
		read_by_current_user,
	})
}

/// Build the `SendMessage` argument. Only checks required-field presence.
pub fn to_outgoing_frame(intent: MessageIntent) -> Result<OutgoingMessageFrame, MappingError> {
	let text = required(Some(intent.text), "text")?;
	let author_id = required(Some(intent.author_id), "authorId")?;
	Ok(OutgoingMessageFrame {
		system_id: intent.room.system_id.into_string(),
		entity_id: intent.room.entity_id.into_string(),
		text,
		author_id,
		author_name: non_empty(intent.author_name),
	})
}

/// `(systemId, entityId)` argument pair used by room-scoped hub methods.
pub fn room_arguments(room: &RoomKey) -> Vec<Value> {
	vec![
		Value::String(room.system_id.as_str().to_string()),
		Value::String(room.entity_id.as_str().to_string()),
	]
}

fn first_argument<T: DeserializeOwned>(target: &str, arguments: Vec<Value>) -> Result<T, MappingError> {
	let arg = arguments.into_iter().next().ok_or_else(|| MappingError::MissingArgument {
		target: target.to_string(),
	})?;
	serde_json::from_value(arg).map_err(|e| MappingError::Payload {
		target: target.to_string(),
		reason: e.to_string(),
	})
}

fn error_text(payload: Option<Value>) -> String {
	match payload {
		Some(Value::String(s)) => s,
		Some(Value::Object(map)) => match map.get("message") {
			Some(Value::String(s)) => s.clone(),
			_ => Value::Object(map).to_string(),
		},
		Some(other) => other.to_string(),
		None => "unspecified server error".to_string(),
	}
}

/// Decode a server event. Unknown targets yield `Ok(None)`.
pub fn parse_hub_event(
	target: &str,
	arguments: Vec<Value>,
	ctx: &MappingContext,
) -> Result<Option<HubEvent>, MappingError> {
	match target {
		events::RECEIVE_MESSAGE => {
			let frame: MessageFrame = first_argument(target, arguments)?;
			let message = to_domain_message(frame, ctx)?;
			Ok(Some(HubEvent::Message(Box::new(message))))
		}
		events::USER_TYPING => {
			let frame: TypingFrame = first_argument(target, arguments)?;
			Ok(Some(HubEvent::Typing(TypingEvent {
				room: room_from_parts(frame.system_id, frame.entity_id)?,
				author_id: required(frame.author_id, "authorId")?,
				author_name: non_empty(frame.author_name),
			})))
		}
		events::USER_JOINED | events::USER_LEFT => {
			let frame: PresenceFrame = first_argument(target, arguments)?;
			let room = if frame.system_id.is_some() && frame.entity_id.is_some() {
				Some(room_from_parts(frame.system_id, frame.entity_id)?)
			} else {
				None
			};
			Ok(Some(HubEvent::Presence(PresenceEvent {
				kind: if target == events::USER_JOINED {
					PresenceKind::Joined
				} else {
					PresenceKind::Left
				},
				user_id: required(frame.user_id, "userId")?,
				user_name: non_empty(frame.user_name),
				room,
			})))
		}
		events::ERROR => Ok(Some(HubEvent::ServerError(error_text(arguments.into_iter().next())))),
		_ => Ok(None),
	}
}
