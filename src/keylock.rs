use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::context::CallContext;
use crate::erased::entry_hash;
use crate::error::{CacheError, Result};
#[cfg(feature = "metrics")]
use crate::metrics::{Counters, ProviderMetrics};
use crate::slots::{DEFAULT_SLOT_COUNT, SlotClaim, SlotTable};
use crate::traits::{CacheProvider, CacheStore, read_entry, replace_entry};

/// How long a caller waits for another populator in one wait window.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(15);

/// Pause between polls of the store and the slot while waiting.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Wait windows before giving up on the populator. A warning is logged after the first.
const WAIT_WINDOWS: u32 = 2;

/// Cache provider that computes each missing value once across racing callers.
///
/// # Single-Flight Population
///
/// On a miss the caller hashes `(region, key)` onto a fixed table of slots and tries to claim its
/// slot with a compare-and-swap. The winner re-checks the store, runs the producer and stores the
/// result. Losers poll the store until the value appears or the slot frees up. Unrelated keys only
/// contend when they share a slot.
///
/// # Reentrancy
///
/// Producers receive the [`CallContext`] of their call chain. A nested `get_or_add` for a key the
/// chain is already populating computes directly and does not touch the cache, so a producer that
/// recurses into its own key cannot wait on itself.
///
/// # Timeouts
///
/// A waiter gives up after two lock-timeout windows (15 seconds each by default) and runs the
/// producer itself. That value is returned but not cached; the populator that holds the slot
/// remains responsible for caching.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use keylock_cache::{CacheProvider, KeylockBuilder, MemoryStore};
///
/// let cache = KeylockBuilder::new()
///     .slots(509)
///     .lock_timeout(Duration::from_secs(5))
///     .build(MemoryStore::new());
///
/// let page: String = cache
///     .get_or_add("tcm:5-100-64", "pages", &["tcm:5-100-64"], |_ctx| "<html/>".to_string())
///     .unwrap();
/// assert_eq!(page, "<html/>");
/// ```
pub struct KeylockCacheProvider<S> {
	backend: S,
	slots: SlotTable,
	lock_timeout: Duration,
	poll_interval: Duration,
	#[cfg(feature = "metrics")]
	counters: Counters,
}

/// Result of waiting on a slot held by another call chain.
enum Wait<'a, T> {
	/// The other populator finished.
	Ready(T),
	/// The slot came free and is now ours.
	Claimed(SlotClaim<'a>),
	/// Both wait windows elapsed.
	TimedOut,
}

impl<S: CacheStore> KeylockCacheProvider<S> {
	/// Create a provider with default settings: 257 slots, 15 second lock timeout.
	///
	/// For other settings use [`KeylockBuilder`](crate::KeylockBuilder).
	pub fn new(backend: S) -> Self {
		Self::with_settings(backend, DEFAULT_SLOT_COUNT, DEFAULT_LOCK_TIMEOUT, DEFAULT_POLL_INTERVAL)
	}

	/// Internal constructor; settings are already validated.
	pub(crate) fn with_settings(
		backend: S,
		slot_count: usize,
		lock_timeout: Duration,
		poll_interval: Duration,
	) -> Self {
		Self {
			backend,
			slots: SlotTable::new(slot_count),
			lock_timeout,
			poll_interval,
			#[cfg(feature = "metrics")]
			counters: Counters::default(),
		}
	}

	/// The underlying store.
	pub fn backend(&self) -> &S {
		&self.backend
	}

	/// Number of slots in the lock-striping table.
	pub fn slot_count(&self) -> usize {
		self.slots.len()
	}

	/// Length of one wait window.
	pub fn lock_timeout(&self) -> Duration {
		self.lock_timeout
	}

	/// Get a snapshot of provider counters.
	#[cfg(feature = "metrics")]
	pub fn metrics(&self) -> ProviderMetrics {
		self.counters.snapshot()
	}

	/// Re-check the store, then compute and store. Caller holds the slot.
	fn populate<T, E, F>(
		&self,
		ctx: &CallContext,
		key: &str,
		region: &str,
		dependencies: &[&str],
		add: F,
	) -> Result<T, E>
	where
		T: Clone + Send + Sync + 'static,
		E: From<CacheError>,
		F: FnOnce(&CallContext) -> Result<T, E>,
	{
		// Another populator may have finished between our miss and our claim
		if let Some(value) = read_entry::<T, _>(&self.backend, key, region)? {
			return Ok(value);
		}

		let value = add(ctx)?;
		replace_entry(&self.backend, key, region, Some(value.clone()), dependencies);

		#[cfg(feature = "metrics")]
		Counters::bump(&self.counters.populations);
		debug!(region, key, "populated cache entry");

		Ok(value)
	}

	/// Poll until the value appears, the slot frees up, or both wait windows elapse.
	fn wait_for_slot<T>(
		&self,
		key: &str,
		region: &str,
		slot: usize,
		owner: u64,
	) -> Result<Wait<'_, T>>
	where
		T: Clone + Send + Sync + 'static,
	{
		let started = Instant::now();

		for window in 1..=WAIT_WINDOWS {
			// A timeout too large to represent means waiting without a deadline
			let deadline = Instant::now().checked_add(self.lock_timeout);
			loop {
				thread::sleep(self.poll_interval);

				if let Some(value) = read_entry::<T, _>(&self.backend, key, region)? {
					return Ok(Wait::Ready(value));
				}
				if let Ok(claim) = self.slots.acquire(slot, owner) {
					debug!(region, key, slot = claim.slot(), "claimed cache slot after waiting");
					return Ok(Wait::Claimed(claim));
				}
				if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
					break;
				}
			}

			#[cfg(feature = "metrics")]
			Counters::bump(&self.counters.wait_timeouts);

			if window < WAIT_WINDOWS {
				warn!(
					region,
					key,
					slot,
					holder = ?self.slots.holder(slot),
					waited_ms = started.elapsed().as_millis() as u64,
					"cache slot still held after lock timeout; waiting once more"
				);
			}
		}

		Ok(Wait::TimedOut)
	}
}

impl<S: CacheStore> CacheProvider for KeylockCacheProvider<S> {
	fn try_get<T>(&self, key: &str, region: &str) -> Result<Option<T>>
	where
		T: Clone + Send + Sync + 'static,
	{
		let found = read_entry::<T, _>(&self.backend, key, region)?;

		#[cfg(feature = "metrics")]
		Counters::bump(if found.is_some() { &self.counters.hits } else { &self.counters.misses });
		if found.is_some() {
			trace!(region, key, "cache hit");
		}

		Ok(found)
	}

	fn try_get_or_add_with<T, E, F>(
		&self,
		ctx: &CallContext,
		key: &str,
		region: &str,
		dependencies: &[&str],
		add: F,
	) -> Result<T, E>
	where
		T: Clone + Send + Sync + 'static,
		E: From<CacheError>,
		F: FnOnce(&CallContext) -> Result<T, E>,
	{
		if let Some(value) = self.try_get::<T>(key, region)? {
			return Ok(value);
		}

		let hash = entry_hash(region, key);

		// This chain is already populating the key further up; waiting would deadlock on ourselves
		let Some(in_flight) = ctx.enter(hash) else {
			#[cfg(feature = "metrics")]
			Counters::bump(&self.counters.reentrant_bypasses);
			trace!(region, key, "reentrant population, computing without caching");
			return add(ctx);
		};

		let slot = self.slots.index_for(hash, in_flight.depth());
		let owner = ctx.owner_id();

		// Guards release the slot and the in-flight entry on every exit path, unwinding included
		let result = match self.slots.acquire(slot, owner) {
			Ok(_claim) => self.populate(ctx, key, region, dependencies, add),
			Err(holder) => {
				#[cfg(feature = "metrics")]
				Counters::bump(&self.counters.contended_waits);
				debug!(region, key, slot, holder, "cache slot busy, waiting for populator");

				match self.wait_for_slot::<T>(key, region, slot, owner)? {
					Wait::Ready(value) => Ok(value),
					Wait::Claimed(_claim) => self.populate(ctx, key, region, dependencies, add),
					Wait::TimedOut => {
						#[cfg(feature = "metrics")]
						Counters::bump(&self.counters.fallbacks);
						warn!(
							region,
							key,
							slot,
							timeout_ms = self.lock_timeout.as_millis() as u64,
							"gave up waiting for cache slot, computing value without caching"
						);
						add(ctx)
					}
				}
			}
		};

		drop(in_flight);
		result
	}

	fn store<T>(&self, key: &str, region: &str, value: Option<T>, dependencies: &[&str])
	where
		T: Send + Sync + 'static,
	{
		replace_entry(&self.backend, key, region, value, dependencies);
	}
}
