use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::api::ApiError;
use crate::cache::QueryCache;
use crate::error::MutationError;

/// A mutation that was rolled back, as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationFailure {
	pub mutation: &'static str,
	pub key: String,
	pub message: String,
}

/// Surfaces rolled-back mutations (toast-equivalent). Must not block.
pub trait MutationNotifier: Send + Sync {
	fn mutation_failed(&self, failure: &MutationFailure);
}

/// Logs failures with `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl MutationNotifier for TracingNotifier {
	fn mutation_failed(&self, failure: &MutationFailure) {
		warn!(
			mutation = failure.mutation,
			key = %failure.key,
			error = %failure.message,
			"mutation rolled back"
		);
	}
}

/// Forwards failures to a channel the UI drains.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
	tx: mpsc::UnboundedSender<MutationFailure>,
}

impl ChannelNotifier {
	pub fn new() -> (Self, mpsc::UnboundedReceiver<MutationFailure>) {
		let (tx, rx) = mpsc::unbounded_channel();
		(Self { tx }, rx)
	}
}

impl MutationNotifier for ChannelNotifier {
	fn mutation_failed(&self, failure: &MutationFailure) {
		if self.tx.send(failure.clone()).is_err() {
			debug!(mutation = failure.mutation, "mutation failure dropped: receiver gone");
		}
	}
}

/// Snapshot, patch, call, then reconcile or roll back.
///
/// Mutations of the same cache key run one at a time; unrelated keys do not
/// wait on each other.
#[derive(Clone)]
pub struct OptimisticEngine {
	notifier: Arc<dyn MutationNotifier>,
}

impl fmt::Debug for OptimisticEngine {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("OptimisticEngine").finish_non_exhaustive()
	}
}

impl Default for OptimisticEngine {
	fn default() -> Self {
		Self::new(Arc::new(TracingNotifier))
	}
}

impl OptimisticEngine {
	pub fn new(notifier: Arc<dyn MutationNotifier>) -> Self {
		Self { notifier }
	}

	/// Run one optimistic mutation against `key`.
	///
	/// `patch` computes the speculative value from the current one (`None`
	/// clears the entry). `remote` is only polled after the patch is written.
	/// On success `reconcile` may fold the server's answer into the value,
	/// which is then marked stale; on failure the pre-mutation snapshot is
	/// restored and the notifier is told.
	pub async fn run<K, V, T, P, Fut, R>(
		&self,
		mutation: &'static str,
		cache: &QueryCache<K, V>,
		key: &K,
		patch: P,
		remote: Fut,
		reconcile: R,
	) -> Result<T, MutationError>
	where
		K: Clone + Eq + Hash + fmt::Display,
		V: Clone,
		P: FnOnce(Option<V>) -> Option<V>,
		Fut: Future<Output = Result<T, ApiError>>,
		R: FnOnce(Option<V>, &T) -> Option<V>,
	{
		self.run_with_rollback(mutation, cache, key, patch, remote, reconcile, |_, snapshot| snapshot)
			.await
	}

	/// Like [`run`](Self::run), but a failure hands `rollback` the current
	/// value and the snapshot, so writes made by others while the call was
	/// pending can survive the undo.
	#[allow(clippy::too_many_arguments)]
	pub async fn run_with_rollback<K, V, T, P, Fut, R, B>(
		&self,
		mutation: &'static str,
		cache: &QueryCache<K, V>,
		key: &K,
		patch: P,
		remote: Fut,
		reconcile: R,
		rollback: B,
	) -> Result<T, MutationError>
	where
		K: Clone + Eq + Hash + fmt::Display,
		V: Clone,
		P: FnOnce(Option<V>) -> Option<V>,
		Fut: Future<Output = Result<T, ApiError>>,
		R: FnOnce(Option<V>, &T) -> Option<V>,
		B: FnOnce(Option<V>, Option<V>) -> Option<V>,
	{
		let _guard = cache.lock_key(key).await;

		cache.cancel_fetch(key);

		let snapshot = cache.update(key, |current| {
			let snapshot = current.clone();
			(patch(current), snapshot)
		});
		debug!(mutation, key = %key, "optimistic patch applied");

		match remote.await {
			Ok(answer) => {
				cache.update(key, |current| (reconcile(current, &answer), ()));
				cache.invalidate(key);
				Ok(answer)
			}
			Err(source) => {
				cache.update(key, |current| (rollback(current, snapshot), ()));
				metrics::counter!("pactline_sync_mutation_rollbacks_total", "mutation" => mutation).increment(1);

				let failure = MutationFailure {
					mutation,
					key: key.to_string(),
					message: source.to_string(),
				};
				self.notifier.mutation_failed(&failure);

				Err(MutationError {
					mutation,
					key: failure.key,
					source,
				})
			}
		}
	}
}
