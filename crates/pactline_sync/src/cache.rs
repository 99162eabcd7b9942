use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedMutexGuard, broadcast};
use tracing::debug;

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Keyed store shared by the live-event synchronizer and the mutation engine.
///
/// Every write goes through this API. Fetches are ticketed: `cancel_fetch`
/// (or any newer `begin_fetch`) invalidates older tickets, so a slow response
/// can never overwrite a value written after it was requested.
pub struct QueryCache<K, V> {
	inner: Arc<CacheInner<K, V>>,
}

impl<K, V> Clone for QueryCache<K, V> {
	fn clone(&self) -> Self {
		Self {
			inner: Arc::clone(&self.inner),
		}
	}
}

impl<K, V> std::fmt::Debug for QueryCache<K, V> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("QueryCache")
			.field("entries", &self.inner.state.lock().slots.len())
			.finish()
	}
}

struct CacheInner<K, V> {
	state: Mutex<State<K, V>>,
	key_locks: Mutex<HashMap<K, Arc<tokio::sync::Mutex<()>>>>,
	changes: broadcast::Sender<K>,
}

struct State<K, V> {
	slots: HashMap<K, Slot<V>>,
	next_generation: u64,
}

struct Slot<V> {
	value: Option<V>,
	stale: bool,
	generation: u64,
	fetching: bool,
}

impl<V> Slot<V> {
	fn empty() -> Self {
		Self {
			value: None,
			stale: true,
			generation: 0,
			fetching: false,
		}
	}
}

/// Proof that a fetch for `key` was started; only the newest ticket may write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket<K> {
	key: K,
	generation: u64,
}

impl<K> FetchTicket<K> {
	pub fn key(&self) -> &K {
		&self.key
	}
}

impl<K, V> Default for QueryCache<K, V>
where
	K: Clone + Eq + Hash,
	V: Clone,
{
	fn default() -> Self {
		Self::new()
	}
}

impl<K, V> QueryCache<K, V>
where
	K: Clone + Eq + Hash,
	V: Clone,
{
	pub fn new() -> Self {
		let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
		Self {
			inner: Arc::new(CacheInner {
				state: Mutex::new(State {
					slots: HashMap::new(),
					next_generation: 0,
				}),
				key_locks: Mutex::new(HashMap::new()),
				changes,
			}),
		}
	}

	/// Keys whose value changed, for views that re-read on change.
	pub fn subscribe(&self) -> broadcast::Receiver<K> {
		self.inner.changes.subscribe()
	}

	fn notify(&self, key: &K) {
		let _ = self.inner.changes.send(key.clone());
	}

	pub fn get(&self, key: &K) -> Option<V> {
		self.inner.state.lock().slots.get(key).and_then(|s| s.value.clone())
	}

	/// Borrow the value without cloning it.
	pub fn read<R>(&self, key: &K, f: impl FnOnce(&V) -> R) -> Option<R> {
		self.inner.state.lock().slots.get(key).and_then(|s| s.value.as_ref()).map(f)
	}

	pub fn contains(&self, key: &K) -> bool {
		self.read(key, |_| ()).is_some()
	}

	/// Store a fresh value.
	pub fn set(&self, key: K, value: V) {
		{
			let mut state = self.inner.state.lock();
			let slot = state.slots.entry(key.clone()).or_insert_with(Slot::empty);
			slot.value = Some(value);
			slot.stale = false;
		}
		self.notify(&key);
	}

	/// Mutate the value in place. Returns `false` when there is no value.
	pub fn patch(&self, key: &K, f: impl FnOnce(&mut V)) -> bool {
		let patched = {
			let mut state = self.inner.state.lock();
			match state.slots.get_mut(key).and_then(|s| s.value.as_mut()) {
				Some(value) => {
					f(value);
					true
				}
				None => false,
			}
		};
		if patched {
			self.notify(key);
		}
		patched
	}

	/// Read-modify-write under one lock; returning `None` clears the value.
	pub fn update<R>(&self, key: &K, f: impl FnOnce(Option<V>) -> (Option<V>, R)) -> R {
		let out = {
			let mut state = self.inner.state.lock();
			let slot = state.slots.entry(key.clone()).or_insert_with(Slot::empty);
			let (next, out) = f(slot.value.take());
			slot.value = next;
			if slot.value.is_none() && !slot.fetching {
				state.slots.remove(key);
			}
			out
		};
		self.notify(key);
		out
	}

	/// Drop the entry, cancelling any fetch in flight for it.
	pub fn remove(&self, key: &K) -> Option<V> {
		let removed = self.inner.state.lock().slots.remove(key).and_then(|s| s.value);
		if removed.is_some() {
			self.notify(key);
		}
		removed
	}

	/// Mark the value stale so the next reader refetches. Keeps the value.
	pub fn invalidate(&self, key: &K) -> bool {
		let found = {
			let mut state = self.inner.state.lock();
			match state.slots.get_mut(key) {
				Some(slot) => {
					slot.stale = true;
					true
				}
				None => false,
			}
		};
		if found {
			self.notify(key);
		}
		found
	}

	/// Invalidate every key matching `pred`; returns how many were marked.
	pub fn invalidate_where(&self, pred: impl Fn(&K) -> bool) -> usize {
		let keys: Vec<K> = {
			let mut state = self.inner.state.lock();
			state
				.slots
				.iter_mut()
				.filter(|(k, _)| pred(k))
				.map(|(k, slot)| {
					slot.stale = true;
					k.clone()
				})
				.collect()
		};
		for key in &keys {
			self.notify(key);
		}
		keys.len()
	}

	/// Absent entries count as stale.
	pub fn is_stale(&self, key: &K) -> bool {
		self.inner.state.lock().slots.get(key).is_none_or(|s| s.stale || s.value.is_none())
	}

	pub fn keys(&self) -> Vec<K> {
		self.inner
			.state
			.lock()
			.slots
			.iter()
			.filter(|(_, s)| s.value.is_some())
			.map(|(k, _)| k.clone())
			.collect()
	}

	pub fn is_fetching(&self, key: &K) -> bool {
		self.inner.state.lock().slots.get(key).is_some_and(|s| s.fetching)
	}

	/// Start a fetch for `key`, superseding any older ticket.
	pub fn begin_fetch(&self, key: K) -> FetchTicket<K> {
		let mut state = self.inner.state.lock();
		state.next_generation += 1;
		let generation = state.next_generation;

		let slot = state.slots.entry(key.clone()).or_insert_with(Slot::empty);
		slot.generation = generation;
		slot.fetching = true;

		FetchTicket { key, generation }
	}

	/// Invalidate any outstanding ticket for `key`. Returns whether a fetch
	/// was in flight.
	pub fn cancel_fetch(&self, key: &K) -> bool {
		let mut state = self.inner.state.lock();
		state.next_generation += 1;
		let generation = state.next_generation;

		let Some(slot) = state.slots.get_mut(key) else {
			return false;
		};
		let was_fetching = slot.fetching;
		slot.generation = generation;
		slot.fetching = false;
		if slot.value.is_none() {
			state.slots.remove(key);
		}

		if was_fetching {
			debug!("query cache: in-flight fetch cancelled");
		}
		was_fetching
	}

	/// Finish a fetch by merging its result into the current value.
	///
	/// Returns `false` (and leaves the cache untouched) when the ticket was
	/// superseded or cancelled.
	pub fn complete_fetch(&self, ticket: FetchTicket<K>, merge: impl FnOnce(Option<V>) -> V) -> bool {
		let applied = {
			let mut state = self.inner.state.lock();
			match state.slots.get_mut(&ticket.key) {
				Some(slot) if slot.fetching && slot.generation == ticket.generation => {
					let next = merge(slot.value.take());
					slot.value = Some(next);
					slot.stale = false;
					slot.fetching = false;
					true
				}
				_ => false,
			}
		};

		if applied {
			self.notify(&ticket.key);
		} else {
			debug!("query cache: discarding superseded fetch result");
		}
		applied
	}

	/// Run `fetch` under a ticket and store its result if still current.
	///
	/// Returns `Ok(None)` when the result was discarded.
	pub async fn fetch_with<F, Fut, E>(&self, key: K, fetch: F) -> Result<Option<V>, E>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = Result<V, E>>,
	{
		let ticket = self.begin_fetch(key);
		let value = match fetch().await {
			Ok(value) => value,
			Err(e) => {
				self.abandon_fetch(&ticket);
				return Err(e);
			}
		};

		if self.complete_fetch(ticket, |_| value.clone()) {
			Ok(Some(value))
		} else {
			Ok(None)
		}
	}

	/// Clear the fetching flag for a failed fetch if the ticket is still current.
	pub fn abandon_fetch(&self, ticket: &FetchTicket<K>) {
		let mut state = self.inner.state.lock();
		let remove = match state.slots.get_mut(&ticket.key) {
			Some(slot) if slot.generation == ticket.generation => {
				slot.fetching = false;
				slot.value.is_none()
			}
			_ => false,
		};
		if remove {
			state.slots.remove(&ticket.key);
		}
	}

	/// Exclusive access to `key` for the duration of a mutation.
	pub async fn lock_key(&self, key: &K) -> OwnedMutexGuard<()> {
		let lock = {
			let mut locks = self.inner.key_locks.lock();
			locks.retain(|_, l| Arc::strong_count(l) > 1);
			Arc::clone(locks.entry(key.clone()).or_default())
		};
		lock.lock_owned().await
	}
}
