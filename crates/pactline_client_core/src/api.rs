use std::sync::Arc;

use pactline_util::endpoint::HubEndpoint;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::{ClientCoreError, SecretString};

/// Items delivered on a session's inbound channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
	/// Server-initiated method call (a push event).
	Event { target: String, arguments: Vec<Value> },

	/// The connection ended. Always the last item on the channel.
	Closed { error: Option<String>, allow_reconnect: bool },
}

/// Outbound half of an established hub connection.
#[async_trait::async_trait]
pub trait HubLink: Send + Sync {
	/// Call a hub method and wait for its completion.
	async fn invoke(&self, target: &str, arguments: Vec<Value>) -> Result<Value, ClientCoreError>;

	/// Call a hub method without waiting for a completion.
	async fn send(&self, target: &str, arguments: Vec<Value>) -> Result<(), ClientCoreError>;

	/// Close the connection. No `Inbound::Closed` is guaranteed after a local close.
	fn close(&self, reason: &str);
}

/// An established connection: the link plus its inbound event stream.
pub struct HubSession {
	pub link: Arc<dyn HubLink>,
	pub inbound: mpsc::Receiver<Inbound>,
}

impl std::fmt::Debug for HubSession {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("HubSession").finish_non_exhaustive()
	}
}

/// Opens hub connections (handshake included).
#[async_trait::async_trait]
pub trait HubConnector: Send + Sync {
	async fn connect(
		&self,
		endpoint: &HubEndpoint,
		access_token: Option<&SecretString>,
	) -> Result<HubSession, ClientCoreError>;
}
