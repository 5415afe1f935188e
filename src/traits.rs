use std::sync::Arc;

use crate::context::CallContext;
use crate::erased::CacheValue;
use crate::error::{CacheError, Result};

/// Key-value store underneath a cache provider.
///
/// Implementations must be safe to call from many threads at once; providers do not serialize
/// access beyond electing one populator per key. A store may expire or evict entries on its own
/// schedule.
///
/// `dependencies` are opaque ids forwarded from the caller. A store that supports invalidation
/// drops the entry when any of them changes; others may ignore them.
pub trait CacheStore: Send + Sync {
	/// Look up `(region, key)`.
	fn get(&self, key: &str, region: &str) -> Option<CacheValue>;

	/// Insert or replace `(region, key)`.
	fn set(&self, key: &str, value: CacheValue, region: &str, dependencies: &[&str]);

	/// Remove `(region, key)` if present.
	fn remove(&self, key: &str, region: &str);
}

impl<S: CacheStore + ?Sized> CacheStore for Arc<S> {
	fn get(&self, key: &str, region: &str) -> Option<CacheValue> {
		(**self).get(key, region)
	}

	fn set(&self, key: &str, value: CacheValue, region: &str, dependencies: &[&str]) {
		(**self).set(key, value, region, dependencies)
	}

	fn remove(&self, key: &str, region: &str) {
		(**self).remove(key, region)
	}
}

impl<S: CacheStore + ?Sized> CacheStore for &S {
	fn get(&self, key: &str, region: &str) -> Option<CacheValue> {
		(**self).get(key, region)
	}

	fn set(&self, key: &str, value: CacheValue, region: &str, dependencies: &[&str]) {
		(**self).set(key, value, region, dependencies)
	}

	fn remove(&self, key: &str, region: &str) {
		(**self).remove(key, region)
	}
}

/// Read `(region, key)` from `store` as a `T`.
pub(crate) fn read_entry<T, S>(store: &S, key: &str, region: &str) -> Result<Option<T>>
where
	T: Clone + 'static,
	S: CacheStore + ?Sized,
{
	store.get(key, region).map(|value| value.read::<T>(region, key)).transpose()
}

/// Remove `(region, key)` from `store`, then set `value` if there is one.
///
/// Stores are not required to support overwriting in place, so the old entry always goes first.
pub(crate) fn replace_entry<T, S>(
	store: &S,
	key: &str,
	region: &str,
	value: Option<T>,
	dependencies: &[&str],
) where
	T: Send + Sync + 'static,
	S: CacheStore + ?Sized,
{
	store.remove(key, region);
	if let Some(value) = value {
		store.set(key, CacheValue::new(value), region, dependencies);
	}
}

/// Typed cache facade handed to the components that need caching.
///
/// Values are read by cloning them out of the store; use `Arc<T>` for values that are
/// expensive to clone.
///
/// # Example
///
/// ```
/// use keylock_cache::{CacheProvider, KeylockCacheProvider, MemoryStore};
///
/// let cache = KeylockCacheProvider::new(MemoryStore::new());
///
/// let menu = cache
///     .get_or_add("sitemap", "navigation", &["tcm:5-12"], |_ctx| vec!["home", "about"])
///     .expect("no type conflict");
/// assert_eq!(menu, vec!["home", "about"]);
///
/// let cached: Option<Vec<&str>> = cache.try_get("sitemap", "navigation").unwrap();
/// assert_eq!(cached, Some(vec!["home", "about"]));
/// ```
pub trait CacheProvider: Send + Sync {
	/// Look up a value without computing it.
	///
	/// Returns `Ok(None)` when nothing is cached and
	/// [`CacheError::TypeMismatch`] when a value of another type is.
	fn try_get<T>(&self, key: &str, region: &str) -> Result<Option<T>>
	where
		T: Clone + Send + Sync + 'static;

	/// Return the cached value or compute it with `add` inside an existing call chain.
	///
	/// Nested calls made from inside `add` must pass on the context they receive.
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
		F: FnOnce(&CallContext) -> Result<T, E>;

	/// Replace the value at `(region, key)`. `None` deletes it.
	///
	/// The existing entry is removed before the new one is set.
	fn store<T>(&self, key: &str, region: &str, value: Option<T>, dependencies: &[&str])
	where
		T: Send + Sync + 'static;

	/// Fallible form of [`get_or_add`](Self::get_or_add) starting a new call chain.
	fn try_get_or_add<T, E, F>(
		&self,
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
		let ctx = CallContext::new();
		self.try_get_or_add_with(&ctx, key, region, dependencies, add)
	}

	/// Return the cached value or compute, cache and return it.
	///
	/// Starts a new call chain. Only a type mismatch can make this fail.
	fn get_or_add<T, F>(&self, key: &str, region: &str, dependencies: &[&str], add: F) -> Result<T>
	where
		T: Clone + Send + Sync + 'static,
		F: FnOnce(&CallContext) -> T,
	{
		let ctx = CallContext::new();
		self.get_or_add_with(&ctx, key, region, dependencies, add)
	}

	/// Infallible form of [`try_get_or_add_with`](Self::try_get_or_add_with).
	fn get_or_add_with<T, F>(
		&self,
		ctx: &CallContext,
		key: &str,
		region: &str,
		dependencies: &[&str],
		add: F,
	) -> Result<T>
	where
		T: Clone + Send + Sync + 'static,
		F: FnOnce(&CallContext) -> T,
	{
		self.try_get_or_add_with(ctx, key, region, dependencies, |ctx| Ok::<T, CacheError>(add(ctx)))
	}

	/// Delete the value at `(region, key)`.
	fn remove(&self, key: &str, region: &str) {
		self.store::<()>(key, region, None, &[]);
	}
}
