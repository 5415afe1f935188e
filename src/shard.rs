//! Shard implementation for the in-memory store.
//!
//! A `Shard` holds the entries whose `(region, key)` hash maps to it, plus a reverse index from
//! dependency id to the entries that declared it. `MemoryStore` wraps each shard in an `RwLock`.
//!
//! Entries are keyed by `EntryKey`, which carries its pre-computed hash, so the entry map uses a
//! passthrough hasher and lookups by borrowed `(region, key)` go through the raw entry API
//! without allocating an owned key.

use std::hash::{BuildHasher, Hasher};
use std::time::Instant;

use hashbrown::hash_map::RawEntryMut;
use hashbrown::{HashMap, HashSet};

use crate::erased::{CacheValue, EntryKey};

/// Passthrough hasher for EntryKey (which already has pre-computed hash).
#[derive(Default)]
pub(crate) struct PassthroughHasher(u64);

impl Hasher for PassthroughHasher {
	fn finish(&self) -> u64 {
		self.0
	}

	fn write(&mut self, _bytes: &[u8]) {
		panic!("PassthroughHasher only works with u64 hash values");
	}

	fn write_u64(&mut self, i: u64) {
		self.0 = i;
	}
}

/// Build hasher for passthrough (just returns the hash as-is).
#[derive(Clone, Default)]
pub(crate) struct PassthroughBuildHasher;

impl BuildHasher for PassthroughBuildHasher {
	type Hasher = PassthroughHasher;

	fn build_hasher(&self) -> Self::Hasher {
		PassthroughHasher::default()
	}
}

type KeySet = HashSet<EntryKey, PassthroughBuildHasher>;

/// A stored value with its expiry and declared dependencies.
pub(crate) struct StoredEntry {
	pub value: CacheValue,
	pub expires_at: Option<Instant>,
	pub dependencies: Box<[Box<str>]>,
}

impl StoredEntry {
	pub fn is_expired(&self, now: Instant) -> bool {
		self.expires_at.is_some_and(|at| at <= now)
	}
}

/// A single partition of the store.
///
/// The shard is not thread-safe on its own; the MemoryStore wraps it in RwLock.
pub(crate) struct Shard {
	entries: HashMap<EntryKey, StoredEntry, PassthroughBuildHasher>,
	dependents: HashMap<Box<str>, KeySet>,
}

impl Shard {
	pub fn new() -> Self {
		Self {
			entries: HashMap::with_hasher(PassthroughBuildHasher),
			dependents: HashMap::new(),
		}
	}

	/// Look up an entry by borrowed `(region, key)` and its hash.
	pub fn get(&self, region: &str, key: &str, hash: u64) -> Option<&StoredEntry> {
		self.entries.raw_entry().from_hash(hash, |stored| stored.matches(region, key)).map(|(_, e)| e)
	}

	/// Insert an entry, returning the one it replaced.
	pub fn insert(&mut self, key: EntryKey, entry: StoredEntry) -> Option<StoredEntry> {
		let old = self.remove(&key.region, &key.key, key.hash);

		for dependency in entry.dependencies.iter() {
			self.dependents
				.entry(dependency.clone())
				.or_insert_with(|| KeySet::with_hasher(PassthroughBuildHasher))
				.insert(key.clone());
		}
		self.entries.insert(key, entry);

		old
	}

	/// Remove an entry by borrowed `(region, key)` and its hash.
	pub fn remove(&mut self, region: &str, key: &str, hash: u64) -> Option<StoredEntry> {
		let (key, entry) =
			match self.entries.raw_entry_mut().from_hash(hash, |stored| stored.matches(region, key)) {
				RawEntryMut::Occupied(occupied) => occupied.remove_entry(),
				RawEntryMut::Vacant(_) => return None,
			};
		self.unlink(&key, &entry);
		Some(entry)
	}

	/// Remove the entry only if it has expired by `now`.
	pub fn remove_if_expired(
		&mut self,
		region: &str,
		key: &str,
		hash: u64,
		now: Instant,
	) -> Option<StoredEntry> {
		if self.get(region, key, hash)?.is_expired(now) {
			self.remove(region, key, hash)
		} else {
			None
		}
	}

	/// Remove every entry that declared `dependency`.
	///
	/// Returns the number of entries removed.
	pub fn invalidate(&mut self, dependency: &str) -> usize {
		let Some(keys) = self.dependents.remove(dependency) else {
			return 0;
		};

		let mut removed = 0;
		for key in keys {
			if let Some(entry) = self.entries.remove(&key) {
				self.unlink(&key, &entry);
				removed += 1;
			}
		}
		removed
	}

	/// Remove every entry expired by `now`.
	///
	/// Returns the number of entries removed.
	pub fn purge_expired(&mut self, now: Instant) -> usize {
		let expired: Vec<EntryKey> = self
			.entries
			.iter()
			.filter(|(_, entry)| entry.is_expired(now))
			.map(|(key, _)| key.clone())
			.collect();

		for key in &expired {
			if let Some(entry) = self.entries.remove(key) {
				self.unlink(key, &entry);
			}
		}
		expired.len()
	}

	/// Number of entries in this shard.
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	/// Clear all entries.
	pub fn clear(&mut self) {
		self.entries.clear();
		self.dependents.clear();
	}

	/// Drop `key` from the dependency index of each dependency `entry` declared.
	fn unlink(&mut self, key: &EntryKey, entry: &StoredEntry) {
		for dependency in entry.dependencies.iter() {
			if let Some(keys) = self.dependents.get_mut(&**dependency) {
				keys.remove(key);
				if keys.is_empty() {
					self.dependents.remove(&**dependency);
				}
			}
		}
	}

	#[cfg(test)]
	fn dependents_len(&self) -> usize {
		self.dependents.len()
	}
}
