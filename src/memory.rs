use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::debug;

use crate::erased::{CacheValue, EntryKey, entry_hash};
use crate::shard::{Shard, StoredEntry};
use crate::traits::CacheStore;

/// Default number of shards.
///
/// More shards reduce contention between writers at the cost of a few empty maps.
pub(crate) const DEFAULT_SHARD_COUNT: usize = 16;

/// Thread-safe in-memory [`CacheStore`].
///
/// # Sharding
///
/// Entries are spread over a power-of-two number of shards by their `(region, key)` hash. Each
/// shard has its own `RwLock`, so readers never block each other and writers only block the
/// shard they touch.
///
/// # Expiration
///
/// Entries may expire a fixed time after they were set: a store-wide default time-to-live, with
/// per-region overrides. Expired entries read as absent and are dropped lazily on access or in
/// bulk by [`purge_expired`](Self::purge_expired).
///
/// # Dependencies
///
/// The dependency ids passed to `set` are indexed. [`invalidate`](Self::invalidate) drops every
/// entry that declared a given id, e.g. when the content item it was built from is republished.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use keylock_cache::{CacheProvider, DirectCacheProvider, MemoryStore};
///
/// let store = MemoryStore::new().with_region_ttl("navigation", Duration::from_secs(300));
/// let cache = DirectCacheProvider::new(store);
///
/// cache.store("tcm:5-100-64", "pages", Some("<html/>".to_string()), &["tcm:5-100-64"]);
/// assert_eq!(cache.backend().invalidate("tcm:5-100-64"), 1);
/// assert!(cache.try_get::<String>("tcm:5-100-64", "pages").unwrap().is_none());
/// ```
pub struct MemoryStore {
	shards: Box<[RwLock<Shard>]>,
	shard_count: usize,
	default_ttl: Option<Duration>,
	region_ttls: HashMap<String, Duration>,
	entry_count: AtomicUsize,
}

impl MemoryStore {
	/// Create a store with the default shard count and no expiration.
	pub fn new() -> Self {
		Self::with_shards(DEFAULT_SHARD_COUNT)
	}

	/// Create with custom shard count. Rounded up to the next power of 2.
	pub fn with_shards(shard_count: usize) -> Self {
		let shard_count = shard_count.max(1).next_power_of_two();
		Self {
			shards: (0..shard_count).map(|_| RwLock::new(Shard::new())).collect(),
			shard_count,
			default_ttl: None,
			region_ttls: HashMap::new(),
			entry_count: AtomicUsize::new(0),
		}
	}

	/// Expire entries of every region `ttl` after they are set, unless the region has its own.
	pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
		self.default_ttl = Some(ttl);
		self
	}

	/// Expire entries of `region` `ttl` after they are set.
	pub fn with_region_ttl(mut self, region: impl Into<String>, ttl: Duration) -> Self {
		self.region_ttls.insert(region.into(), ttl);
		self
	}

	/// Time-to-live applied to entries of `region`, if any.
	pub fn ttl_for(&self, region: &str) -> Option<Duration> {
		self.region_ttls.get(region).copied().or(self.default_ttl)
	}

	/// Number of shards.
	pub fn shard_count(&self) -> usize {
		self.shard_count
	}

	/// Number of entries, expired ones not yet purged included.
	pub fn len(&self) -> usize {
		self.entry_count.load(Ordering::Relaxed)
	}

	/// Check if store is empty.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Check if a live entry exists at `(region, key)`.
	pub fn contains(&self, key: &str, region: &str) -> bool {
		self.get(key, region).is_some()
	}

	/// Remove every entry that declared `dependency`.
	///
	/// Returns the number of entries removed.
	pub fn invalidate(&self, dependency: &str) -> usize {
		let removed: usize = self
			.shards
			.iter()
			.map(|shard| {
				let mut shard = shard.write();
				let removed = shard.invalidate(dependency);
				self.entry_count.fetch_sub(removed, Ordering::Relaxed);
				removed
			})
			.sum();
		debug!(dependency, removed, "invalidated dependent cache entries");
		removed
	}

	/// Remove every expired entry.
	///
	/// Returns the number of entries removed.
	pub fn purge_expired(&self) -> usize {
		let now = Instant::now();
		let removed: usize = self
			.shards
			.iter()
			.map(|shard| {
				let mut shard = shard.write();
				let removed = shard.purge_expired(now);
				self.entry_count.fetch_sub(removed, Ordering::Relaxed);
				removed
			})
			.sum();
		if removed > 0 {
			debug!(removed, "purged expired cache entries");
		}
		removed
	}

	/// Clear all entries.
	pub fn clear(&self) {
		for shard in self.shards.iter() {
			let mut shard = shard.write();
			self.entry_count.fetch_sub(shard.len(), Ordering::Relaxed);
			shard.clear();
		}
	}

	/// Get the shard for a given hash.
	fn shard(&self, hash: u64) -> &RwLock<Shard> {
		let index = (hash as usize) & (self.shard_count - 1);
		&self.shards[index]
	}
}

impl Default for MemoryStore {
	fn default() -> Self {
		Self::new()
	}
}

impl CacheStore for MemoryStore {
	fn get(&self, key: &str, region: &str) -> Option<CacheValue> {
		let hash = entry_hash(region, key);
		let shard_lock = self.shard(hash);
		let now = Instant::now();

		{
			// Short-lived read lock
			let shard = shard_lock.read();
			let entry = shard.get(region, key, hash)?;
			if !entry.is_expired(now) {
				return Some(entry.value.clone());
			}
		}

		let mut shard = shard_lock.write();
		if shard.remove_if_expired(region, key, hash, now).is_some() {
			self.entry_count.fetch_sub(1, Ordering::Relaxed);
		}
		None
	}

	fn set(&self, key: &str, value: CacheValue, region: &str, dependencies: &[&str]) {
		let entry_key = EntryKey::new(region, key);
		let entry = StoredEntry {
			value,
			// A ttl too large to represent never expires
			expires_at: self.ttl_for(region).and_then(|ttl| Instant::now().checked_add(ttl)),
			dependencies: dependencies.iter().map(|d| Box::from(*d)).collect(),
		};

		// The count changes under the shard lock so it never runs ahead of the entries
		let mut shard = self.shard(entry_key.hash).write();
		if shard.insert(entry_key, entry).is_none() {
			self.entry_count.fetch_add(1, Ordering::Relaxed);
		}
	}

	fn remove(&self, key: &str, region: &str) {
		let hash = entry_hash(region, key);
		let mut shard = self.shard(hash).write();
		if shard.remove(region, key, hash).is_some() {
			self.entry_count.fetch_sub(1, Ordering::Relaxed);
		}
	}
}
