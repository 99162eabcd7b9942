use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ParseIdError;

/// Prefix for subscription ids assigned locally before the server confirms.
pub const OPTIMISTIC_SUBSCRIPTION_PREFIX: &str = "optimistic-";

/// Follow state of a room for the current user.
///
/// `subscription_id` is present iff `following` is true; the constructors and
/// deserialization enforce this.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawFollowStatus", rename_all = "camelCase")]
pub struct FollowStatus {
	following: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	subscription_id: Option<String>,
}

impl FollowStatus {
	pub fn following(subscription_id: impl Into<String>) -> Result<Self, ParseIdError> {
		let subscription_id = subscription_id.into();
		if subscription_id.trim().is_empty() {
			return Err(ParseIdError::Empty);
		}
		Ok(Self {
			following: true,
			subscription_id: Some(subscription_id),
		})
	}

	pub fn not_following() -> Self {
		Self {
			following: false,
			subscription_id: None,
		}
	}

	/// Speculative follow with a synthetic subscription id.
	pub fn optimistic_following() -> Self {
		Self {
			following: true,
			subscription_id: Some(format!("{OPTIMISTIC_SUBSCRIPTION_PREFIX}{}", Uuid::new_v4())),
		}
	}

	/// The status a toggle would produce locally.
	pub fn toggled(&self) -> Self {
		if self.following {
			Self::not_following()
		} else {
			Self::optimistic_following()
		}
	}

	pub fn is_following(&self) -> bool {
		self.following
	}

	pub fn subscription_id(&self) -> Option<&str> {
		self.subscription_id.as_deref()
	}

	pub fn is_optimistic(&self) -> bool {
		self.subscription_id
			.as_deref()
			.is_some_and(|id| id.starts_with(OPTIMISTIC_SUBSCRIPTION_PREFIX))
	}
}

impl Default for FollowStatus {
	fn default() -> Self {
		Self::not_following()
	}
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFollowStatus {
	following: bool,
	#[serde(default)]
	subscription_id: Option<String>,
}

impl TryFrom<RawFollowStatus> for FollowStatus {
	type Error = String;

	fn try_from(raw: RawFollowStatus) -> Result<Self, Self::Error> {
		match (raw.following, raw.subscription_id) {
			(true, Some(id)) => FollowStatus::following(id).map_err(|e| e.to_string()),
			(true, None) => Err("following status requires a subscriptionId".to_string()),
			// A stale id on an unfollowed status carries no meaning.
			(false, _) => Ok(FollowStatus::not_following()),
		}
	}
}
