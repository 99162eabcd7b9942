use std::fmt;

use pactline_domain::RoomKey;

/// Message history of one room at a given page size and filter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessagesKey {
	pub room: RoomKey,
	pub page_size: u32,
	pub filter: Option<String>,
}

impl MessagesKey {
	pub fn new(room: RoomKey, page_size: u32) -> Self {
		Self {
			room,
			page_size,
			filter: None,
		}
	}

	pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
		self.filter = Some(filter.into()).filter(|f| !f.trim().is_empty());
		self
	}
}

impl fmt::Display for MessagesKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "messages/{}/{}", self.room, self.page_size)?;
		if let Some(filter) = &self.filter {
			write!(f, "/{filter}")?;
		}
		Ok(())
	}
}

/// Follow state of one room.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FollowKey(pub RoomKey);

impl fmt::Display for FollowKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "follow/{}", self.0)
	}
}

/// The current user's notification feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NotificationsKey {
	pub page_size: u32,
	pub include_archived: bool,
}

impl fmt::Display for NotificationsKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "notifications/{}", self.page_size)?;
		if self.include_archived {
			f.write_str("/archived")?;
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn keys_render_for_diagnostics() {
		let room = RoomKey::parse("contracts:42").expect("room");
		assert_eq!(MessagesKey::new(room.clone(), 20).to_string(), "messages/contracts:42/20");
		assert_eq!(
			MessagesKey::new(room.clone(), 20).with_filter("pinned").to_string(),
			"messages/contracts:42/20/pinned"
		);
		assert_eq!(MessagesKey::new(room.clone(), 20).with_filter(" "), MessagesKey::new(room.clone(), 20));
		assert_eq!(FollowKey(room).to_string(), "follow/contracts:42");
		assert_eq!(
			NotificationsKey {
				page_size: 10,
				include_archived: true
			}
			.to_string(),
			"notifications/10/archived"
		);
	}
}
