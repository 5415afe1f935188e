//! Explicit reentrancy context for a logical call chain.
//!
//! A population function that itself calls `get_or_add` on the same `(region, key)` would wait
//! on its own slot forever. The context remembers which hashes the current call chain is
//! populating so the nested call can detect this and compute directly.
//!
//! The context is passed by reference into every value producer. Nested calls made from a
//! producer must reuse the context they were handed; a fresh context is a fresh call chain.

use std::cell::{Cell, RefCell};
use std::sync::atomic::{AtomicU64, Ordering};

/// Source of owner ids. Zero is reserved for "free" in the slot table.
static NEXT_OWNER_ID: AtomicU64 = AtomicU64::new(1);

/// State of one logical call chain.
///
/// `Send` but not `Sync`: a context may move between threads with its call chain but is never
/// used from two threads at once.
#[derive(Debug)]
pub struct CallContext {
	owner: u64,
	in_flight: RefCell<Vec<u64>>,
	reentries: Cell<usize>,
}

impl CallContext {
	/// Start a new call chain with a fresh owner id.
	pub fn new() -> Self {
		Self {
			owner: NEXT_OWNER_ID.fetch_add(1, Ordering::Relaxed),
			in_flight: RefCell::new(Vec::new()),
			reentries: Cell::new(0),
		}
	}

	/// Id written into slots claimed by this chain. Never zero.
	pub fn owner_id(&self) -> u64 {
		self.owner
	}

	/// Number of populations currently active in this chain.
	pub fn reentries(&self) -> usize {
		self.reentries.get()
	}

	/// Whether `hash` is being populated further up this chain.
	pub fn is_in_flight(&self, hash: u64) -> bool {
		self.in_flight.borrow().contains(&hash)
	}

	/// Register `hash` as in flight.
	///
	/// Returns `None` if the hash is already in flight, i.e. the call is reentrant.
	pub(crate) fn enter(&self, hash: u64) -> Option<InFlight<'_>> {
		let mut in_flight = self.in_flight.borrow_mut();
		if in_flight.contains(&hash) {
			return None;
		}
		in_flight.push(hash);
		let depth = self.reentries.get() + 1;
		self.reentries.set(depth);
		Some(InFlight {
			context: self,
			hash,
			depth,
		})
	}

	fn leave(&self, hash: u64) {
		let mut in_flight = self.in_flight.borrow_mut();
		if let Some(pos) = in_flight.iter().rposition(|h| *h == hash) {
			in_flight.swap_remove(pos);
		}
		self.reentries.set(self.reentries.get().saturating_sub(1));
	}
}

impl Default for CallContext {
	fn default() -> Self {
		Self::new()
	}
}

/// Registration of one in-flight hash. Dropping it unregisters the hash.
pub(crate) struct InFlight<'a> {
	context: &'a CallContext,
	hash: u64,
	depth: usize,
}

impl InFlight<'_> {
	/// Reentries count at the time of entry (at least 1).
	pub fn depth(&self) -> usize {
		self.depth
	}
}

impl Drop for InFlight<'_> {
	fn drop(&mut self) {
		self.context.leave(self.hash);
	}
}
