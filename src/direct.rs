use tracing::{debug, trace};

use crate::context::CallContext;
use crate::error::{CacheError, Result};
use crate::traits::{CacheProvider, CacheStore, read_entry, replace_entry};

/// Read-through cache provider without any coordination.
///
/// On a miss every caller runs the producer and stores its result; racing callers may compute
/// the same value several times and the last store wins. Suited to cheap producers and to
/// single-threaded use, where the keylock provider's slot table buys nothing.
pub struct DirectCacheProvider<S> {
	backend: S,
}

impl<S: CacheStore> DirectCacheProvider<S> {
	pub fn new(backend: S) -> Self {
		Self { backend }
	}

	/// The underlying store.
	pub fn backend(&self) -> &S {
		&self.backend
	}
}

impl<S: CacheStore> CacheProvider for DirectCacheProvider<S> {
	fn try_get<T>(&self, key: &str, region: &str) -> Result<Option<T>>
	where
		T: Clone + Send + Sync + 'static,
	{
		read_entry::<T, _>(&self.backend, key, region)
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
			trace!(region, key, "cache hit");
			return Ok(value);
		}

		let value = add(ctx)?;
		replace_entry(&self.backend, key, region, Some(value.clone()), dependencies);
		debug!(region, key, "populated cache entry");
		Ok(value)
	}

	fn store<T>(&self, key: &str, region: &str, value: Option<T>, dependencies: &[&str])
	where
		T: Send + Sync + 'static,
	{
		replace_entry(&self.backend, key, region, value, dependencies);
	}
}
