use std::time::Duration;

use crate::keylock::{DEFAULT_LOCK_TIMEOUT, DEFAULT_POLL_INTERVAL, KeylockCacheProvider};
use crate::slots::DEFAULT_SLOT_COUNT;
use crate::traits::CacheStore;

/// Builder for configuring a [`KeylockCacheProvider`].
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use keylock_cache::{KeylockBuilder, MemoryStore};
///
/// let cache = KeylockBuilder::new()
///     .slots(1021)
///     .lock_timeout(Duration::from_secs(2))
///     .poll_interval(Duration::from_millis(5))
///     .build(MemoryStore::new());
///
/// assert_eq!(cache.slot_count(), 1021);
/// ```
///
/// # Slot Count
///
/// Two keys contend only when they land on the same slot, so more slots mean fewer false
/// collisions. A prime count spreads the `hash % slots` selection best. Zero is raised to one.
///
/// # Timeouts
///
/// A caller waiting on another populator gives up after two `lock_timeout` windows and computes
/// the value itself without caching it. `poll_interval` is clamped to `lock_timeout`.
#[derive(Debug, Clone)]
pub struct KeylockBuilder {
	slot_count: usize,
	lock_timeout: Duration,
	poll_interval: Duration,
}

impl KeylockBuilder {
	/// Create a builder with default settings: 257 slots, 15 second lock timeout, 1ms polling.
	pub fn new() -> Self {
		Self {
			slot_count: DEFAULT_SLOT_COUNT,
			lock_timeout: DEFAULT_LOCK_TIMEOUT,
			poll_interval: DEFAULT_POLL_INTERVAL,
		}
	}

	/// Set the number of slots in the lock-striping table.
	///
	/// Default: 257
	pub fn slots(mut self, count: usize) -> Self {
		self.slot_count = count.max(1);
		self
	}

	/// Set the length of one wait window.
	///
	/// Default: 15 seconds. `Duration::MAX` waits for the populator indefinitely.
	pub fn lock_timeout(mut self, timeout: Duration) -> Self {
		self.lock_timeout = timeout;
		self
	}

	/// Set the pause between polls while waiting for another populator.
	///
	/// Default: 1 millisecond
	pub fn poll_interval(mut self, interval: Duration) -> Self {
		self.poll_interval = interval;
		self
	}

	/// Build the provider over `backend`.
	pub fn build<S: CacheStore>(self, backend: S) -> KeylockCacheProvider<S> {
		let poll_interval = self.poll_interval.min(self.lock_timeout);
		KeylockCacheProvider::with_settings(backend, self.slot_count, self.lock_timeout, poll_interval)
	}
}

impl Default for KeylockBuilder {
	fn default() -> Self {
		Self::new()
	}
}
