#![forbid(unsafe_code)]

use std::fmt;

use pactline_protocol::FramingError;

pub mod api;
pub mod settings;
pub mod ws;

pub use api::{HubConnector, HubLink, HubSession, Inbound};
pub use settings::{ClientSettings, ConfigError, default_config_path, load_client_settings, load_client_settings_from_path};
pub use ws::{WsConfig, WsHubConnector};

/// Errors for client core operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientCoreError {
	/// Hub endpoint could not be derived or parsed.
	#[error("invalid hub endpoint: {0}")]
	Endpoint(String),

	/// Connection establishment failed.
	#[error("failed to connect: {0}")]
	Connect(String),

	/// Handshake rejected or malformed.
	#[error("handshake failed: {0}")]
	Handshake(String),

	/// Protocol framing error.
	#[error(transparent)]
	Framing(#[from] FramingError),

	/// Protocol error (unexpected message ordering/types).
	#[error("protocol error: {0}")]
	Protocol(String),

	/// The server completed an invocation with an error.
	#[error("server rejected {target}: {message}")]
	Remote {
		target: String,
		message: String,
	},

	/// An operation did not finish in time.
	#[error("timed out: {0}")]
	Timeout(String),

	/// The connection is closed.
	#[error("connection closed: {0}")]
	Closed(String),

	/// Other error.
	#[error("error: {0}")]
	Other(String),
}

impl From<anyhow::Error> for ClientCoreError {
	fn from(e: anyhow::Error) -> Self {
		ClientCoreError::Other(format!("{e:#}"))
	}
}

/// Wrapper that redacts in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
	pub fn new(s: impl Into<String>) -> Self {
		Self(s.into())
	}

	/// Access the inner secret string.
	pub fn expose(&self) -> &str {
		&self.0
	}
}

impl fmt::Debug for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("SecretString(<redacted>)")
	}
}

impl fmt::Display for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("<redacted>")
	}
}
