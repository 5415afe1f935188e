#![doc = include_str!("../README.md")]

mod builder;
mod config;
mod context;
mod direct;
mod erased;
mod error;
mod keylock;
mod memory;
#[cfg(feature = "metrics")]
mod metrics;
mod shard;
mod slots;
mod traits;

pub use builder::KeylockBuilder;
pub use config::{CoordinatorConfig, LoadError, Settings, StoreConfig};
pub use context::CallContext;
pub use direct::DirectCacheProvider;
pub use erased::{CacheValue, entry_hash};
pub use error::{CacheError, Result};
pub use keylock::{DEFAULT_LOCK_TIMEOUT, DEFAULT_POLL_INTERVAL, KeylockCacheProvider};
pub use memory::MemoryStore;
#[cfg(feature = "metrics")]
pub use metrics::ProviderMetrics;
pub use slots::DEFAULT_SLOT_COUNT;
pub use traits::{CacheProvider, CacheStore};
