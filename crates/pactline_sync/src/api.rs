//! REST-side collaborators consumed by the sync core.
//!
//! Implementations live with the application's HTTP client; the core only
//! needs these shapes.

use pactline_client_core::SecretString;
use pactline_domain::{FollowStatus, Message, MessageId, Page, PageRequest, RoomKey};

/// Failure reported by a collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
	#[error("request rejected: {0}")]
	Rejected(String),

	#[error("not found: {0}")]
	NotFound(String),

	#[error("transport error: {0}")]
	Transport(String),
}

/// Supplies the bearer token for hub connections.
#[async_trait::async_trait]
pub trait TokenProvider: Send + Sync {
	async fn access_token(&self) -> Option<SecretString>;
}

/// Token provider returning a fixed token (or none).
#[derive(Debug, Clone, Default)]
pub struct StaticToken(pub Option<SecretString>);

#[async_trait::async_trait]
impl TokenProvider for StaticToken {
	async fn access_token(&self) -> Option<SecretString> {
		self.0.clone()
	}
}

/// Paginated history of a room.
#[async_trait::async_trait]
pub trait MessageSource: Send + Sync {
	async fn list(&self, room: &RoomKey, request: PageRequest) -> Result<Page<Message>, ApiError>;
}

#[async_trait::async_trait]
pub trait MessageApi: Send + Sync {
	/// Edit a message; returns the server's copy.
	async fn update(&self, id: &MessageId, text: &str) -> Result<Message, ApiError>;

	async fn delete(&self, id: &MessageId) -> Result<(), ApiError>;
}

#[async_trait::async_trait]
pub trait FollowApi: Send + Sync {
	/// Flip the follow state of a room; returns the confirmed state.
	async fn toggle_follow(&self, room: &RoomKey) -> Result<FollowStatus, ApiError>;
}

/// Read-state and archive operations.
#[async_trait::async_trait]
pub trait NotificationApi: Send + Sync {
	async fn mark_read(&self, id: &str) -> Result<(), ApiError>;

	async fn archive(&self, id: &str) -> Result<(), ApiError>;
}
