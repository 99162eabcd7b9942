use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::version::{PROTOCOL_NAME, PROTOCOL_VERSION};

/// First record sent by the client after the socket opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeRequest {
	pub protocol: String,
	pub version: u32,
}

impl Default for HandshakeRequest {
	fn default() -> Self {
		Self {
			protocol: PROTOCOL_NAME.to_string(),
			version: PROTOCOL_VERSION,
		}
	}
}

/// Server reply to the handshake; `{}` on success.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeResponse {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

/// A hub protocol message, discriminated by the numeric `type` field.
#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
	/// Method call. Server events carry no invocation id; client calls that
	/// expect a completion do.
	Invocation {
		invocation_id: Option<String>,
		target: String,
		arguments: Vec<Value>,
	},
	Completion {
		invocation_id: String,
		result: Option<Value>,
		error: Option<String>,
	},
	Ping,
	Close {
		error: Option<String>,
		allow_reconnect: bool,
	},
	/// Message types this client does not handle (streaming, acks).
	Unsupported {
		kind: u8,
	},
}

mod kind {
	pub const INVOCATION: u8 = 1;
	pub const COMPLETION: u8 = 3;
	pub const PING: u8 = 6;
	pub const CLOSE: u8 = 7;
}

impl HubMessage {
	pub fn invocation(invocation_id: Option<String>, target: impl Into<String>, arguments: Vec<Value>) -> Self {
		HubMessage::Invocation {
			invocation_id,
			target: target.into(),
			arguments,
		}
	}

	pub fn kind(&self) -> u8 {
		match self {
			HubMessage::Invocation { .. } => kind::INVOCATION,
			HubMessage::Completion { .. } => kind::COMPLETION,
			HubMessage::Ping => kind::PING,
			HubMessage::Close { .. } => kind::CLOSE,
			HubMessage::Unsupported { kind } => *kind,
		}
	}
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawHubMessage {
	#[serde(rename = "type")]
	kind: u8,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	invocation_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	target: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	arguments: Option<Vec<Value>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	result: Option<Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	error: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	allow_reconnect: Option<bool>,
}

impl Serialize for HubMessage {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: serde::Serializer,
	{
		let raw = match self.clone() {
			HubMessage::Invocation {
				invocation_id,
				target,
				arguments,
			} => RawHubMessage {
				kind: kind::INVOCATION,
				invocation_id,
				target: Some(target),
				arguments: Some(arguments),
				..RawHubMessage::default()
			},
			HubMessage::Completion {
				invocation_id,
				result,
				error,
			} => RawHubMessage {
				kind: kind::COMPLETION,
				invocation_id: Some(invocation_id),
				result,
				error,
				..RawHubMessage::default()
			},
			HubMessage::Ping => RawHubMessage {
				kind: kind::PING,
				..RawHubMessage::default()
			},
			HubMessage::Close { error, allow_reconnect } => RawHubMessage {
				kind: kind::CLOSE,
				error,
				allow_reconnect: Some(allow_reconnect),
				..RawHubMessage::default()
			},
			HubMessage::Unsupported { kind } => RawHubMessage {
				kind,
				..RawHubMessage::default()
			},
		};
		raw.serialize(serializer)
	}
}

impl<'de> Deserialize<'de> for HubMessage {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		use serde::de::Error as _;

		let raw = RawHubMessage::deserialize(deserializer)?;
		match raw.kind {
			kind::INVOCATION => Ok(HubMessage::Invocation {
				invocation_id: raw.invocation_id,
				target: raw.target.ok_or_else(|| D::Error::missing_field("target"))?,
				arguments: raw.arguments.unwrap_or_default(),
			}),
			kind::COMPLETION => Ok(HubMessage::Completion {
				invocation_id: raw.invocation_id.ok_or_else(|| D::Error::missing_field("invocationId"))?,
				result: raw.result,
				error: raw.error,
			}),
			kind::PING => Ok(HubMessage::Ping),
			kind::CLOSE => Ok(HubMessage::Close {
				error: raw.error,
				allow_reconnect: raw.allow_reconnect.unwrap_or(false),
			}),
			other => Ok(HubMessage::Unsupported { kind: other }),
		}
	}
}
