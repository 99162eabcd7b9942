#![forbid(unsafe_code)]

pub mod message;
pub mod page;
pub mod subscription;

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use message::{Author, AuthorKind, Message, MessageKind, Notification};
pub use page::{Page, PageRequest, SortDirection};
pub use subscription::FollowStatus;

/// Errors for parsing identifiers from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseIdError {
	#[error("empty value")]
	Empty,
	#[error("invalid format: {0}")]
	InvalidFormat(String),
}

macro_rules! non_empty_id {
	($(#[$meta:meta])* $name:ident $(, forbids $forbidden:literal)?) => {
		$(#[$meta])*
		#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
		#[serde(try_from = "String", into = "String")]
		pub struct $name(String);

		impl $name {
			pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
				let id = id.into();
				if id.trim().is_empty() {
					return Err(ParseIdError::Empty);
				}
				$(
					if id.contains($forbidden) {
						return Err(ParseIdError::InvalidFormat(format!(
							"{} must not contain {:?}: {id}",
							stringify!($name),
							$forbidden
						)));
					}
				)?
				Ok(Self(id))
			}

			pub fn as_str(&self) -> &str {
				&self.0
			}

			pub fn into_string(self) -> String {
				self.0
			}
		}

		impl fmt::Display for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				f.write_str(&self.0)
			}
		}

		impl FromStr for $name {
			type Err = ParseIdError;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				Self::new(s.to_string())
			}
		}

		impl TryFrom<String> for $name {
			type Error = ParseIdError;

			fn try_from(value: String) -> Result<Self, Self::Error> {
				Self::new(value)
			}
		}

		impl From<$name> for String {
			fn from(value: $name) -> Self {
				value.0
			}
		}
	};
}

non_empty_id!(
	/// Named subsystem that owns a room (e.g. `contracts`). Never contains
	/// `:`, which separates it from the entity id in a room key.
	SystemId, forbids ':'
);

non_empty_id!(
	/// Entity identifier within a subsystem (e.g. a contract id).
	EntityId
);

non_empty_id!(
	/// Globally unique, delivery-channel-stable message identifier.
	MessageId
);

/// Room key: `(system_id, entity_id)`.
///
/// The canonical string form is `system_id:entity_id`. Only the first `:`
/// separates the parts, so entity ids may themselves contain colons.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomKey {
	pub system_id: SystemId,
	pub entity_id: EntityId,
}

impl RoomKey {
	pub fn new(system_id: SystemId, entity_id: EntityId) -> Self {
		Self { system_id, entity_id }
	}

	/// Build from raw parts, rejecting empty values and a system id with `:`.
	pub fn from_parts(system_id: impl Into<String>, entity_id: impl Into<String>) -> Result<Self, ParseIdError> {
		Ok(Self::new(SystemId::new(system_id)?, EntityId::new(entity_id)?))
	}

	/// Parse a `system_id:entity_id` string.
	pub fn parse(s: &str) -> Result<Self, ParseIdError> {
		let s = s.trim();
		if s.is_empty() {
			return Err(ParseIdError::Empty);
		}

		let (system_s, entity_s) = s
			.split_once(':')
			.ok_or_else(|| ParseIdError::InvalidFormat("expected system_id:entity_id".into()))?;

		Self::from_parts(system_s, entity_s)
	}
}

impl fmt::Display for RoomKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}:{}", self.system_id, self.entity_id)
	}
}

impl FromStr for RoomKey {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		RoomKey::parse(s)
	}
}
