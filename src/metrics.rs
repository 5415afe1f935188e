//! Provider metrics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of provider counters.
///
/// # Example
///
/// ```
/// use keylock_cache::{CacheProvider, KeylockCacheProvider, MemoryStore};
///
/// let cache = KeylockCacheProvider::new(MemoryStore::new());
/// cache.get_or_add("home", "pages", &[], |_| 1u32).unwrap();
/// cache.get_or_add("home", "pages", &[], |_| 2u32).unwrap();
///
/// let metrics = cache.metrics();
/// assert_eq!(metrics.populations, 1);
/// println!("Hit rate: {:.2}%", metrics.hit_rate() * 100.0);
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderMetrics {
	/// Lookups answered from the store.
	pub hits: u64,
	/// Lookups that found nothing.
	pub misses: u64,
	/// Values computed and stored by an elected populator.
	pub populations: u64,
	/// Nested calls on a key already being populated by the same call chain.
	pub reentrant_bypasses: u64,
	/// Calls that found their slot held by another call chain.
	pub contended_waits: u64,
	/// Wait windows that elapsed without the value appearing.
	pub wait_timeouts: u64,
	/// Values computed without caching after the wait gave up.
	pub fallbacks: u64,
}

impl ProviderMetrics {
	/// Fraction of lookups that hit, between 0.0 and 1.0.
	///
	/// Returns 0.0 if there have been no lookups.
	pub fn hit_rate(&self) -> f64 {
		let total = self.total_lookups();
		if total == 0 { 0.0 } else { self.hits as f64 / total as f64 }
	}

	/// Total number of lookups (hits + misses).
	pub fn total_lookups(&self) -> u64 {
		self.hits + self.misses
	}
}

#[derive(Default)]
pub(crate) struct Counters {
	pub hits: AtomicU64,
	pub misses: AtomicU64,
	pub populations: AtomicU64,
	pub reentrant_bypasses: AtomicU64,
	pub contended_waits: AtomicU64,
	pub wait_timeouts: AtomicU64,
	pub fallbacks: AtomicU64,
}

impl Counters {
	pub fn bump(counter: &AtomicU64) {
		counter.fetch_add(1, Ordering::Relaxed);
	}

	pub fn snapshot(&self) -> ProviderMetrics {
		ProviderMetrics {
			hits: self.hits.load(Ordering::Relaxed),
			misses: self.misses.load(Ordering::Relaxed),
			populations: self.populations.load(Ordering::Relaxed),
			reentrant_bypasses: self.reentrant_bypasses.load(Ordering::Relaxed),
			contended_waits: self.contended_waits.load(Ordering::Relaxed),
			wait_timeouts: self.wait_timeouts.load(Ordering::Relaxed),
			fallbacks: self.fallbacks.load(Ordering::Relaxed),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_hit_rate_without_lookups() {
		assert_eq!(ProviderMetrics::default().hit_rate(), 0.0);
	}

	#[test]
	fn test_snapshot_reads_counters() {
		let counters = Counters::default();
		Counters::bump(&counters.hits);
		Counters::bump(&counters.hits);
		Counters::bump(&counters.hits);
		Counters::bump(&counters.misses);

		let snapshot = counters.snapshot();
		assert_eq!(snapshot.hits, 3);
		assert_eq!(snapshot.misses, 1);
		assert_eq!(snapshot.total_lookups(), 4);
		assert_eq!(snapshot.hit_rate(), 0.75);
	}
}
