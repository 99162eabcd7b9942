use pactline_client_core::ClientCoreError;
use pactline_domain::RoomKey;
use pactline_protocol::MappingError;

use crate::api::ApiError;

/// Handshake or transport failure of the shared connection.
///
/// Cloneable so every caller awaiting the same in-flight attempt gets a copy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
	#[error("could not connect to hub: {0}")]
	Connect(String),

	#[error("hub handshake failed: {0}")]
	Handshake(String),

	#[error("gave up reconnecting after {attempts} attempts: {last_error}")]
	ReconnectExhausted { attempts: usize, last_error: String },

	#[error("connection manager was disposed")]
	Disposed,
}

impl From<ClientCoreError> for ConnectionError {
	fn from(e: ClientCoreError) -> Self {
		match e {
			ClientCoreError::Handshake(reason) => ConnectionError::Handshake(reason),
			other => ConnectionError::Connect(other.to_string()),
		}
	}
}

/// Join, leave and send failures, returned to the immediate caller.
#[derive(Debug, thiserror::Error)]
pub enum RoomOperationError {
	#[error("not connected to the hub")]
	NotConnected,

	#[error("{operation} {room} failed: {source}")]
	Remote {
		operation: &'static str,
		room: RoomKey,
		#[source]
		source: ClientCoreError,
	},

	/// A leave for the same room ran while the join was pending.
	#[error("join of {room} was superseded by a leave")]
	Superseded { room: RoomKey },

	#[error("invalid outgoing message: {0}")]
	InvalidMessage(#[from] MappingError),

	#[error("could not encode outgoing message: {0}")]
	Encode(String),
}

/// A remote mutation was rejected; the cache has already been rolled back.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{mutation} on {key} failed: {source}")]
pub struct MutationError {
	pub mutation: &'static str,
	pub key: String,
	#[source]
	pub source: ApiError,
}
