use std::time::Duration;

use pactline_client_core::ClientSettings;
use pactline_client_core::settings::DEFAULT_RECONNECT_SCHEDULE_MS;

/// Fixed list of delays between reconnect attempts.
///
/// Attempt `n` (1-based) waits `delays[n - 1]`; once the list is exhausted
/// the manager stops retrying and reports an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectSchedule {
	delays: Vec<Duration>,
}

impl Default for ReconnectSchedule {
	fn default() -> Self {
		Self::new(DEFAULT_RECONNECT_SCHEDULE_MS.iter().copied().map(Duration::from_millis))
	}
}

impl ReconnectSchedule {
	pub fn new(delays: impl IntoIterator<Item = Duration>) -> Self {
		Self {
			delays: delays.into_iter().collect(),
		}
	}

	/// A schedule that never retries.
	pub fn disabled() -> Self {
		Self { delays: Vec::new() }
	}

	pub fn from_settings(settings: &ClientSettings) -> Self {
		if settings.auto_reconnect {
			Self::new(settings.reconnect_schedule.iter().copied())
		} else {
			Self::disabled()
		}
	}

	pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
		let idx = usize::try_from(attempt.checked_sub(1)?).ok()?;
		self.delays.get(idx).copied()
	}

	pub fn attempts(&self) -> usize {
		self.delays.len()
	}

	pub fn is_empty(&self) -> bool {
		self.delays.is_empty()
	}
}
