//! Deserializable settings for building providers and stores from configuration files.
//!
//! Settings are layered: an optional TOML file, then `KEYLOCK__…` environment variables
//! (`KEYLOCK__COORDINATOR__SLOT_COUNT=509`). Every value has a default, so an empty source
//! yields the same provider as [`KeylockCacheProvider::new`].

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;

use crate::builder::KeylockBuilder;
use crate::error::{CacheError, Result};
use crate::keylock::{DEFAULT_LOCK_TIMEOUT, DEFAULT_POLL_INTERVAL, KeylockCacheProvider};
use crate::memory::{DEFAULT_SHARD_COUNT, MemoryStore};
use crate::slots::DEFAULT_SLOT_COUNT;

const ENV_PREFIX: &str = "KEYLOCK";

/// Settings of the single-flight coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
	/// Number of slots in the lock-striping table.
	pub slot_count: usize,
	/// Length of one wait window in milliseconds.
	pub lock_timeout_ms: u64,
	/// Pause between polls while waiting, in milliseconds.
	pub poll_interval_ms: u64,
}

impl Default for CoordinatorConfig {
	fn default() -> Self {
		Self {
			slot_count: DEFAULT_SLOT_COUNT,
			lock_timeout_ms: DEFAULT_LOCK_TIMEOUT.as_millis() as u64,
			poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
		}
	}
}

impl CoordinatorConfig {
	pub fn validate(&self) -> Result<()> {
		if self.slot_count == 0 {
			return Err(CacheError::invalid_config("coordinator.slot_count", "must be at least 1"));
		}
		if self.lock_timeout_ms == 0 {
			return Err(CacheError::invalid_config(
				"coordinator.lock_timeout_ms",
				"must be greater than zero",
			));
		}
		if self.poll_interval_ms == 0 || self.poll_interval_ms > self.lock_timeout_ms {
			return Err(CacheError::invalid_config(
				"coordinator.poll_interval_ms",
				format!("must be between 1 and lock_timeout_ms ({})", self.lock_timeout_ms),
			));
		}
		Ok(())
	}

	/// Validate and turn into a builder.
	pub fn builder(&self) -> Result<KeylockBuilder> {
		self.validate()?;
		Ok(KeylockBuilder::new()
			.slots(self.slot_count)
			.lock_timeout(Duration::from_millis(self.lock_timeout_ms))
			.poll_interval(Duration::from_millis(self.poll_interval_ms)))
	}
}

/// Settings of the in-memory store.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
	/// Number of shards, rounded up to a power of two.
	pub shards: usize,
	/// Time-to-live for every region without its own, in seconds.
	pub default_ttl_secs: Option<u64>,
	/// Per-region time-to-live in seconds.
	pub region_ttl_secs: HashMap<String, u64>,
}

impl Default for StoreConfig {
	fn default() -> Self {
		Self {
			shards: DEFAULT_SHARD_COUNT,
			default_ttl_secs: None,
			region_ttl_secs: HashMap::new(),
		}
	}
}

impl StoreConfig {
	pub fn validate(&self) -> Result<()> {
		if self.shards == 0 {
			return Err(CacheError::invalid_config("store.shards", "must be at least 1"));
		}
		if self.default_ttl_secs == Some(0) {
			return Err(CacheError::invalid_config(
				"store.default_ttl_secs",
				"must be greater than zero when set",
			));
		}
		if let Some(region) = self.region_ttl_secs.iter().find(|(_, ttl)| **ttl == 0).map(|(r, _)| r) {
			return Err(CacheError::invalid_config(
				"store.region_ttl_secs",
				format!("ttl for region `{region}` must be greater than zero"),
			));
		}
		Ok(())
	}

	/// Validate and build the store.
	pub fn build(&self) -> Result<MemoryStore> {
		self.validate()?;
		let mut store = MemoryStore::with_shards(self.shards);
		if let Some(secs) = self.default_ttl_secs {
			store = store.with_default_ttl(Duration::from_secs(secs));
		}
		for (region, secs) in &self.region_ttl_secs {
			store = store.with_region_ttl(region.clone(), Duration::from_secs(*secs));
		}
		Ok(store)
	}
}

/// Complete settings: coordinator plus store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
	pub coordinator: CoordinatorConfig,
	pub store: StoreConfig,
}

#[derive(Debug, Error)]
pub enum LoadError {
	#[error("failed to build configuration: {0}")]
	Build(#[from] config::ConfigError),
	#[error(transparent)]
	Invalid(#[from] CacheError),
}

impl Settings {
	/// Load settings from `path` (if given) and the environment, then validate them.
	pub fn load(path: Option<&Path>) -> Result<Self, LoadError> {
		let mut builder = Config::builder();
		if let Some(path) = path {
			builder = builder.add_source(File::from(path).required(true));
		}
		builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__").try_parsing(true));

		let settings: Settings = builder.build()?.try_deserialize()?;
		settings.validate()?;
		Ok(settings)
	}

	pub fn validate(&self) -> Result<()> {
		self.coordinator.validate()?;
		self.store.validate()
	}

	/// Build a keylock provider over a memory store.
	pub fn build(&self) -> Result<KeylockCacheProvider<MemoryStore>> {
		let store = self.store.build()?;
		Ok(self.coordinator.builder()?.build(store))
	}
}
