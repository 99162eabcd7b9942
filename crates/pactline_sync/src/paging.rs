use pactline_domain::PageRequest;
use tracing::{debug, warn};

use crate::api::{ApiError, MessageSource};
use crate::keys::MessagesKey;
use crate::synchronizer::{CacheSynchronizer, MessagePages};

/// Result of a history fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageLoad {
	/// `page` was stored; `added` counts messages not already cached.
	Loaded { page: u32, added: usize },
	/// The server reported no further pages.
	Exhausted,
	/// A mutation or newer fetch superseded this one; nothing was written.
	Discarded,
}

/// Fetch the next older page of `key`'s history.
///
/// A missing or stale history starts over from page 1.
pub async fn load_next_page(
	source: &dyn MessageSource,
	sync: &CacheSynchronizer,
	key: &MessagesKey,
) -> Result<PageLoad, ApiError> {
	let cache = sync.cache();
	let page = if cache.is_stale(key) {
		1
	} else {
		match cache.read(key, MessagePages::next_page_number) {
			Some(Some(page)) => page,
			Some(None) => return Ok(PageLoad::Exhausted),
			None => 1,
		}
	};

	load_page(source, sync, key, page).await
}

/// Refetch page 1, replacing the cached history. Live messages the server
/// did not return yet stay on top.
pub async fn refresh_first_page(
	source: &dyn MessageSource,
	sync: &CacheSynchronizer,
	key: &MessagesKey,
) -> Result<PageLoad, ApiError> {
	load_page(source, sync, key, 1).await
}

async fn load_page(
	source: &dyn MessageSource,
	sync: &CacheSynchronizer,
	key: &MessagesKey,
	page: u32,
) -> Result<PageLoad, ApiError> {
	let ticket = sync.cache().begin_fetch(key.clone());
	let request = PageRequest::newest_first(page, key.page_size);

	match source.list(&key.room, request).await {
		Ok(fetched) => match sync.store_page(ticket, fetched) {
			Some(added) => {
				debug!(key = %key, page, added, "history page stored");
				Ok(PageLoad::Loaded { page, added })
			}
			None => Ok(PageLoad::Discarded),
		},
		Err(e) => {
			sync.cache().abandon_fetch(&ticket);
			warn!(key = %key, page, error = %e, "history fetch failed");
			Err(e)
		}
	}
}
