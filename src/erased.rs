use std::any::{Any, TypeId};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::{CacheError, Result};

/// Hash of a `(region, key)` pair.
///
/// Used for slot selection and store sharding. Never persisted, so the fixed-key hasher is
/// only required to be stable within a process.
pub fn entry_hash(region: &str, key: &str) -> u64 {
	let mut hasher = ahash::AHasher::default();
	region.hash(&mut hasher);
	key.hash(&mut hasher);
	hasher.finish()
}

/// Owned `(region, key)` pair with pre-computed hash.
#[derive(Clone)]
pub(crate) struct EntryKey {
	pub region: Arc<str>,
	pub key: Arc<str>,
	pub hash: u64,
}

impl EntryKey {
	pub fn new(region: &str, key: &str) -> Self {
		Self {
			region: Arc::from(region),
			key: Arc::from(key),
			hash: entry_hash(region, key),
		}
	}

	/// Compare against a borrowed pair without allocating.
	pub fn matches(&self, region: &str, key: &str) -> bool {
		&*self.region == region && &*self.key == key
	}
}

impl Hash for EntryKey {
	fn hash<H: Hasher>(&self, state: &mut H) {
		// Use pre-computed hash to avoid re-hashing on every lookup
		self.hash.hash(state);
	}
}

impl PartialEq for EntryKey {
	fn eq(&self, other: &Self) -> bool {
		self.hash == other.hash && self.region == other.region && self.key == other.key
	}
}

impl Eq for EntryKey {}

impl std::fmt::Debug for EntryKey {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}/{}", self.region, self.key)
	}
}

/// Type-erased cached payload.
///
/// Cloning is cheap (one `Arc` bump). Reading clones the concrete value out, so large values
/// are best stored as `Arc<T>`.
#[derive(Clone)]
pub struct CacheValue {
	value: Arc<dyn Any + Send + Sync>,
	type_name: &'static str,
}

impl CacheValue {
	/// Erase a concrete value.
	pub fn new<T: Send + Sync + 'static>(value: T) -> Self {
		Self {
			value: Arc::new(value),
			type_name: std::any::type_name::<T>(),
		}
	}

	/// Name of the stored type, for diagnostics.
	pub fn type_name(&self) -> &'static str {
		self.type_name
	}

	/// Whether the stored value is a `T`.
	pub fn is<T: 'static>(&self) -> bool {
		(*self.value).type_id() == TypeId::of::<T>()
	}

	/// Borrow the value as `T`.
	///
	/// Returns None if the type doesn't match.
	pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
		self.value.downcast_ref::<T>()
	}

	/// Clone the value out as `T`, reporting a type mismatch for `region/key`.
	pub(crate) fn read<T: Clone + 'static>(&self, region: &str, key: &str) -> Result<T> {
		self.downcast_ref::<T>().cloned().ok_or_else(|| CacheError::TypeMismatch {
			region: region.to_owned(),
			key: key.to_owned(),
			expected: std::any::type_name::<T>(),
			found: self.type_name,
		})
	}
}

impl std::fmt::Debug for CacheValue {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("CacheValue").field("type_name", &self.type_name).finish_non_exhaustive()
	}
}
