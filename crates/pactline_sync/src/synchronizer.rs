use std::collections::HashSet;

use pactline_domain::{Message, MessageId, Page};
use tracing::{debug, warn};

use crate::cache::{FetchTicket, QueryCache};
use crate::keys::MessagesKey;

/// Infinite-scroll message history: page 1 (most recent) first, items
/// newest-first inside each page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessagePages {
	pub pages: Vec<Page<Message>>,
	/// Ids that arrived live and no fetched page has confirmed yet.
	live: HashSet<MessageId>,
}

impl MessagePages {
	/// History consisting of one fetched page. Repeated ids inside the page
	/// keep their first occurrence.
	pub fn from_page(mut page: Page<Message>) -> Self {
		let mut seen = HashSet::new();
		page.items.retain(|m| seen.insert(m.id.clone()));
		Self {
			pages: vec![page],
			live: HashSet::new(),
		}
	}

	pub fn contains(&self, id: &MessageId) -> bool {
		self.find(id).is_some()
	}

	pub fn find(&self, id: &MessageId) -> Option<&Message> {
		self.pages.iter().flat_map(|p| p.items.iter()).find(|m| &m.id == id)
	}

	fn position(&self, id: &MessageId) -> Option<(usize, usize)> {
		self.pages
			.iter()
			.enumerate()
			.find_map(|(p, page)| page.items.iter().position(|m| &m.id == id).map(|i| (p, i)))
	}

	/// Every cached message in display order.
	pub fn messages(&self) -> impl Iterator<Item = &Message> {
		self.pages.iter().flat_map(|p| p.items.iter())
	}

	pub fn len(&self) -> usize {
		self.pages.iter().map(|p| p.items.len()).sum()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn total_items(&self) -> u64 {
		self.pages.first().map_or(0, |p| p.total_items)
	}

	/// Page number to fetch next, or `None` when the server reported no more.
	pub fn next_page_number(&self) -> Option<u32> {
		match self.pages.last() {
			None => Some(1),
			Some(last) if last.has_next_page => Some(last.current_page.saturating_add(1)),
			Some(_) => None,
		}
	}

	/// Put a live message at the top of page 1. Returns `false` for a
	/// duplicate id, leaving everything untouched.
	pub fn insert_live(&mut self, message: Message, page_size: u32) -> bool {
		if self.contains(&message.id) {
			return false;
		}
		self.live.insert(message.id.clone());

		match self.pages.first_mut() {
			Some(first) => first.items.insert(0, message),
			None => {
				self.pages.push(Page::single(message, page_size));
				return true;
			}
		}

		for page in &mut self.pages {
			page.total_items = page.total_items.saturating_add(1);
		}
		true
	}

	/// Append an older page, skipping ids already cached. Returns how many
	/// items were added.
	pub fn append_page(&mut self, mut page: Page<Message>) -> usize {
		let mut seen: HashSet<MessageId> = self.messages().map(|m| m.id.clone()).collect();
		for m in &page.items {
			self.live.remove(&m.id);
		}
		let before = page.items.len();
		page.items.retain(|m| seen.insert(m.id.clone()));

		let skipped = before - page.items.len();
		if skipped > 0 {
			debug!(skipped, page = page.current_page, "dropping already cached messages from fetched page");
		}

		let added = page.items.len();
		self.pages.push(page);
		added
	}

	/// Edit the matching message in place.
	pub fn replace_message(&mut self, id: &MessageId, f: impl FnOnce(&mut Message)) -> bool {
		match self.pages.iter_mut().flat_map(|p| p.items.iter_mut()).find(|m| &m.id == id) {
			Some(message) => {
				f(message);
				true
			}
			None => false,
		}
	}

	/// Splice out the matching message and decrement the totals.
	pub fn remove_message(&mut self, id: &MessageId) -> Option<Message> {
		let removed = self.pages.iter_mut().find_map(|page| {
			let idx = page.items.iter().position(|m| &m.id == id)?;
			Some(page.items.remove(idx))
		})?;
		self.live.remove(id);

		for page in &mut self.pages {
			page.total_items = page.total_items.saturating_sub(1);
		}
		Some(removed)
	}
}

impl MessagePages {
	/// Swap in a freshly fetched first page. Live messages the fetch did not
	/// include stay on top of it and count towards the total.
	fn rebased_on(self, mut fresh: MessagePages) -> MessagePages {
		let MessagePages { pages, live } = self;
		let carried: Vec<Message> = pages
			.into_iter()
			.flat_map(|p| p.items)
			.filter(|m| live.contains(&m.id) && !fresh.contains(&m.id))
			.collect();
		if carried.is_empty() {
			return fresh;
		}

		let count = carried.len() as u64;
		fresh.live = carried.iter().map(|m| m.id.clone()).collect();
		if let Some(first) = fresh.pages.first_mut() {
			first.items.splice(0..0, carried);
			first.total_items = first.total_items.saturating_add(count);
		}
		debug!(carried = count, "kept live messages missing from fetched first page");
		fresh
	}

	/// Undo a local change to `id` using the copy in `snapshot`. Everything
	/// else keeps its current state, including messages that arrived since.
	pub fn restore_message(&mut self, snapshot: &MessagePages, id: &MessageId) {
		let Some((page_idx, item_idx)) = snapshot.position(id) else {
			return;
		};
		let original = snapshot.pages[page_idx].items[item_idx].clone();

		if self.replace_message(id, |m| *m = original.clone()) {
			return;
		}
		if self.pages.is_empty() {
			*self = snapshot.clone();
			return;
		}

		// Re-insert next to a neighbour it had before, preferring the older one.
		let target = page_idx.min(self.pages.len() - 1);
		let before = &snapshot.pages[page_idx].items;
		let items = &self.pages[target].items;
		let locate = |n: &Message| items.iter().position(|m| m.id == n.id);
		let at = before[item_idx + 1..]
			.iter()
			.find_map(|n| locate(n))
			.or_else(|| before[..item_idx].iter().rev().find_map(|n| locate(n).map(|i| i + 1)))
			.unwrap_or(items.len());

		self.pages[target].items.insert(at, original);
		for page in &mut self.pages {
			page.total_items = page.total_items.saturating_add(1);
		}
		if snapshot.live.contains(id) {
			self.live.insert(id.clone());
		}
	}
}

/// What happened to a live message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveOutcome {
	/// No history was cached; a one-item first page was created.
	Synthesized,
	Inserted,
	/// Already cached (e.g. replayed after a reconnect).
	Duplicate,
	/// The message belongs to another room.
	Ignored,
}

/// Merges push events and fetched pages into the message cache.
#[derive(Debug, Clone, Default)]
pub struct CacheSynchronizer {
	messages: QueryCache<MessagesKey, MessagePages>,
}

impl CacheSynchronizer {
	pub fn new(messages: QueryCache<MessagesKey, MessagePages>) -> Self {
		Self { messages }
	}

	pub fn cache(&self) -> &QueryCache<MessagesKey, MessagePages> {
		&self.messages
	}

	/// Apply a live message to the history cached under `key`.
	pub fn apply_live_message(&self, key: &MessagesKey, message: Message) -> LiveOutcome {
		if message.room != key.room {
			warn!(room = %message.room, key = %key, "live message for another room ignored");
			return LiveOutcome::Ignored;
		}

		let id = message.id.clone();
		let outcome = self.messages.update(key, |current| match current {
			None => {
				let mut pages = MessagePages::default();
				pages.insert_live(message, key.page_size);
				(Some(pages), LiveOutcome::Synthesized)
			}
			Some(mut pages) => {
				let outcome = if pages.insert_live(message, key.page_size) {
					LiveOutcome::Inserted
				} else {
					LiveOutcome::Duplicate
				};
				(Some(pages), outcome)
			}
		});

		match outcome {
			LiveOutcome::Duplicate => {
				debug!(key = %key, message_id = %id, "duplicate live message dropped");
				metrics::counter!("pactline_sync_live_duplicates_total").increment(1);
			}
			LiveOutcome::Synthesized | LiveOutcome::Inserted => {
				metrics::counter!("pactline_sync_live_messages_applied_total").increment(1);
			}
			LiveOutcome::Ignored => {}
		}

		outcome
	}

	/// Apply a live message to every cached history of its room. Returns how
	/// many histories gained the message.
	pub fn apply_to_room(&self, message: &Message) -> usize {
		self.messages
			.keys()
			.into_iter()
			.filter(|key| key.room == message.room)
			.filter(|key| {
				matches!(
					self.apply_live_message(key, message.clone()),
					LiveOutcome::Inserted | LiveOutcome::Synthesized
				)
			})
			.count()
	}

	/// Store a fetched page under its ticket. Page 1 replaces the history
	/// (keeping live messages it does not contain); later pages are appended
	/// without duplicating ids. Returns the number of fetched items stored, or
	/// `None` when the ticket was superseded.
	pub fn store_page(&self, ticket: FetchTicket<MessagesKey>, page: Page<Message>) -> Option<usize> {
		let mut added = 0;
		let applied = self.messages.complete_fetch(ticket, |current| match current {
			Some(mut pages) if page.current_page > 1 => {
				added = pages.append_page(page);
				pages
			}
			current => {
				let fresh = MessagePages::from_page(page);
				added = fresh.len();
				match current {
					Some(cached) => cached.rebased_on(fresh),
					None => fresh,
				}
			}
		});
		applied.then_some(added)
	}

	/// Edit reconciliation: change the matching message in place.
	pub fn replace_message(&self, key: &MessagesKey, id: &MessageId, f: impl FnOnce(&mut Message)) -> bool {
		self.messages.update(key, |current| match current {
			Some(mut pages) => {
				let hit = pages.replace_message(id, f);
				(Some(pages), hit)
			}
			None => (None, false),
		})
	}

	/// Delete reconciliation: splice the message out, decrementing totals.
	pub fn remove_message(&self, key: &MessagesKey, id: &MessageId) -> Option<Message> {
		self.messages.update(key, |current| match current {
			Some(mut pages) => {
				let removed = pages.remove_message(id);
				(Some(pages), removed)
			}
			None => (None, None),
		})
	}
}
