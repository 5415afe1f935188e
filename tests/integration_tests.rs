use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use keylock_cache::{
	CacheError, CacheProvider, DEFAULT_SLOT_COUNT, KeylockBuilder, KeylockCacheProvider, MemoryStore,
	entry_hash,
};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
	let _ = tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::from_default_env())
		.with_test_writer()
		.try_init();
}

fn cache_with_timeout(timeout: Duration) -> Arc<KeylockCacheProvider<MemoryStore>> {
	Arc::new(KeylockBuilder::new().lock_timeout(timeout).build(MemoryStore::new()))
}

#[derive(Clone, Debug, PartialEq)]
struct Sitemap {
	pages: Vec<String>,
	built_by: usize,
}

#[test]
fn test_single_flight_under_load() {
	init_tracing();
	let cache = cache_with_timeout(Duration::from_secs(15));
	let calls = Arc::new(AtomicUsize::new(0));
	let threads = 16;
	let barrier = Arc::new(Barrier::new(threads));

	let handles: Vec<_> = (0..threads)
		.map(|t| {
			let cache = cache.clone();
			let calls = calls.clone();
			let barrier = barrier.clone();
			thread::spawn(move || {
				barrier.wait();
				cache
					.get_or_add("sitemap", "navigation", &[], |_| {
						calls.fetch_add(1, Ordering::SeqCst);
						thread::sleep(Duration::from_millis(50));
						Sitemap {
							pages: vec!["/".into(), "/about".into()],
							built_by: t,
						}
					})
					.expect("no type conflict")
			})
		})
		.collect();

	let results: Vec<Sitemap> =
		handles.into_iter().map(|h| h.join().expect("thread should not panic")).collect();

	assert_eq!(calls.load(Ordering::SeqCst), 1);
	assert!(results.windows(2).all(|pair| pair[0] == pair[1]));
	assert_eq!(cache.try_get::<Sitemap>("sitemap", "navigation"), Ok(Some(results[0].clone())));
}

#[test]
fn test_independent_keys_do_not_serialize() {
	init_tracing();
	let cache = cache_with_timeout(Duration::from_secs(15));

	// Pick a second key that maps to a different slot than the slow one
	let slow_slot = entry_hash("r", "slow") % DEFAULT_SLOT_COUNT as u64;
	let fast_key = (0..)
		.map(|i| format!("fast-{i}"))
		.find(|key| entry_hash("r", key) % DEFAULT_SLOT_COUNT as u64 != slow_slot)
		.expect("some key lands elsewhere");

	let (started_tx, started_rx) = mpsc::channel();
	let (release_tx, release_rx) = mpsc::channel::<()>();

	let slow = {
		let cache = cache.clone();
		thread::spawn(move || {
			cache.get_or_add("slow", "r", &[], move |_| {
				started_tx.send(()).expect("main is listening");
				release_rx.recv().expect("main releases the slow producer");
				1u32
			})
		})
	};

	started_rx.recv().expect("slow producer started");

	// Completes while the slow producer is still holding its slot
	let fast = cache.get_or_add(&fast_key, "r", &[], |_| 2u32);
	assert_eq!(fast, Ok(2));
	assert_eq!(cache.try_get::<u32>("slow", "r"), Ok(None));

	release_tx.send(()).expect("slow producer is waiting");
	assert_eq!(slow.join().expect("thread should not panic"), Ok(1));
}

#[test]
fn test_reentrant_producer_does_not_deadlock() {
	init_tracing();
	let cache = cache_with_timeout(Duration::from_secs(15));
	let inner_calls = AtomicUsize::new(0);

	let started = Instant::now();
	let value = cache
		.get_or_add("menu", "navigation", &[], |ctx| {
			let inner = cache
				.get_or_add_with(ctx, "menu", "navigation", &[], |_| {
					inner_calls.fetch_add(1, Ordering::SeqCst);
					vec!["home".to_string()]
				})
				.expect("inner call");
			let mut menu = inner;
			menu.push("contact".to_string());
			menu
		})
		.expect("outer call");

	assert!(started.elapsed() < Duration::from_secs(1));
	assert_eq!(inner_calls.load(Ordering::SeqCst), 1);
	assert_eq!(value, vec!["home".to_string(), "contact".to_string()]);
	assert_eq!(cache.try_get::<Vec<String>>("menu", "navigation"), Ok(Some(value)));
}

#[test]
fn test_store_round_trip() {
	let cache = cache_with_timeout(Duration::from_secs(15));

	cache.store("k", "r", Some("v".to_string()), &[]);
	assert_eq!(cache.try_get::<String>("k", "r"), Ok(Some("v".to_string())));

	cache.store("k", "r", Some("w".to_string()), &[]);
	assert_eq!(cache.try_get::<String>("k", "r"), Ok(Some("w".to_string())));

	cache.store::<String>("k", "r", None, &[]);
	assert_eq!(cache.try_get::<String>("k", "r"), Ok(None));
	assert!(cache.backend().is_empty());
}

#[test]
fn test_timeout_falls_back_to_uncached_value() {
	init_tracing();
	let cache = cache_with_timeout(Duration::from_millis(50));

	let (started_tx, started_rx) = mpsc::channel();
	let (release_tx, release_rx) = mpsc::channel::<()>();

	let stalled = {
		let cache = cache.clone();
		thread::spawn(move || {
			cache.get_or_add("k", "r", &[], move |_| {
				started_tx.send(()).expect("main is listening");
				release_rx.recv().expect("main releases the stalled producer");
				"from owner".to_string()
			})
		})
	};
	started_rx.recv().expect("stalled producer started");

	let started = Instant::now();
	let fallback = cache.get_or_add("k", "r", &[], |_| "from fallback".to_string());

	assert_eq!(fallback, Ok("from fallback".to_string()));
	assert!(started.elapsed() >= Duration::from_millis(100));
	// The fallback value is returned but never cached
	assert_eq!(cache.try_get::<String>("k", "r"), Ok(None));

	release_tx.send(()).expect("stalled producer is waiting");
	assert_eq!(stalled.join().expect("thread should not panic"), Ok("from owner".to_string()));
	assert_eq!(cache.try_get::<String>("k", "r"), Ok(Some("from owner".to_string())));

	#[cfg(feature = "metrics")]
	{
		let metrics = cache.metrics();
		assert_eq!(metrics.fallbacks, 1);
		assert_eq!(metrics.populations, 1);
	}
}

#[test]
fn test_type_mismatch_is_fatal() {
	let cache = cache_with_timeout(Duration::from_secs(15));
	cache.store("k", "r", Some(42i32), &[]);

	let err = cache.try_get::<String>("k", "r").expect_err("wrong type");
	assert_eq!(
		err,
		CacheError::TypeMismatch {
			region: "r".to_string(),
			key: "k".to_string(),
			expected: std::any::type_name::<String>(),
			found: "i32",
		}
	);
	assert!(err.to_string().contains("r/k"));

	// The stored value is untouched
	assert_eq!(cache.try_get::<i32>("k", "r"), Ok(Some(42)));
}

#[test]
fn test_producer_error_propagates_and_is_not_cached() {
	#[derive(Debug, PartialEq)]
	enum LoadError {
		Broker(String),
		Cache(CacheError),
	}

	impl From<CacheError> for LoadError {
		fn from(err: CacheError) -> Self {
			LoadError::Cache(err)
		}
	}

	let cache = cache_with_timeout(Duration::from_secs(15));

	let result = cache.try_get_or_add::<String, LoadError, _>("page", "pages", &[], |_| {
		Err(LoadError::Broker("broker unavailable".to_string()))
	});
	assert_eq!(result, Err(LoadError::Broker("broker unavailable".to_string())));
	assert_eq!(cache.try_get::<String>("page", "pages"), Ok(None));

	let result = cache.try_get_or_add::<String, LoadError, _>("page", "pages", &[], |_| {
		Ok("<html/>".to_string())
	});
	assert_eq!(result, Ok("<html/>".to_string()));

	// A type conflict surfaces through the caller's own error type
	let result =
		cache.try_get_or_add::<u64, LoadError, _>("page", "pages", &[], |_| Ok(1));
	assert!(matches!(result, Err(LoadError::Cache(CacheError::TypeMismatch { .. }))));
}

#[test]
fn test_panicking_producer_releases_slot() {
	init_tracing();
	let cache = cache_with_timeout(Duration::from_secs(15));

	let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
		cache.get_or_add::<u32, _>("k", "r", &[], |_| panic!("producer failed"))
	}));
	assert!(outcome.is_err());

	let waiter = {
		let cache = cache.clone();
		thread::spawn(move || {
			let started = Instant::now();
			let value = cache.get_or_add("k", "r", &[], |_| 7u32);
			(value, started.elapsed())
		})
	};
	let (value, elapsed) = waiter.join().expect("thread should not panic");

	assert_eq!(value, Ok(7));
	assert!(elapsed < Duration::from_secs(1));
	assert_eq!(cache.try_get::<u32>("k", "r"), Ok(Some(7)));
}

#[test]
fn test_dependency_invalidation_forces_recompute() {
	let cache = cache_with_timeout(Duration::from_secs(15));
	let calls = AtomicUsize::new(0);
	let build = |_: &keylock_cache::CallContext| calls.fetch_add(1, Ordering::SeqCst) + 1;

	assert_eq!(cache.get_or_add("teaser", "component-presentations", &["tcm:5-1"], build), Ok(1));
	assert_eq!(cache.get_or_add("teaser", "component-presentations", &["tcm:5-1"], build), Ok(1));

	assert_eq!(cache.backend().invalidate("tcm:5-1"), 1);

	assert_eq!(cache.get_or_add("teaser", "component-presentations", &["tcm:5-1"], build), Ok(2));
}

#[test]
fn test_many_keys_many_threads() {
	init_tracing();
	let cache = cache_with_timeout(Duration::from_secs(15));
	let calls = Arc::new(AtomicUsize::new(0));

	let handles: Vec<_> = (0..8)
		.map(|_| {
			let cache = cache.clone();
			let calls = calls.clone();
			thread::spawn(move || {
				for i in 0..200u64 {
					let key = format!("item-{}", i % 50);
					let value = cache
						.get_or_add(&key, "items", &[], |_| {
							calls.fetch_add(1, Ordering::SeqCst);
							i % 50
						})
						.expect("no type conflict");
					assert_eq!(value, i % 50);
				}
			})
		})
		.collect();

	for handle in handles {
		handle.join().expect("thread should not panic");
	}

	assert_eq!(calls.load(Ordering::SeqCst), 50);
	assert_eq!(cache.backend().len(), 50);
}
