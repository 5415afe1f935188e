//! Lock-striping table used to elect a single populator per key.
//!
//! Each slot holds `0` when free or the owner id of the call context currently populating a key
//! that maps to it. Slots are only ever changed through compare-and-swap, so a slot is always
//! either free or held by exactly one owner.

use std::sync::atomic::{AtomicU64, Ordering};

/// Default number of slots. Prime, so `hash % N` spreads well.
pub const DEFAULT_SLOT_COUNT: usize = 257;

const FREE: u64 = 0;

/// Outcome of a claim attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Claim {
	/// The slot was free and now belongs to the caller.
	Acquired,
	/// The caller's context already holds the slot further up its call chain.
	AlreadyHeld,
	/// Another owner holds the slot.
	Busy(u64),
}

pub(crate) struct SlotTable {
	slots: Box<[AtomicU64]>,
}

impl SlotTable {
	/// Create a table with `count` slots (at least one).
	pub fn new(count: usize) -> Self {
		let count = count.max(1);
		Self {
			slots: (0..count).map(|_| AtomicU64::new(FREE)).collect(),
		}
	}

	pub fn len(&self) -> usize {
		self.slots.len()
	}

	/// Slot for `hash` at the given reentry depth.
	///
	/// The depth multiplier moves nested populations of one call chain onto different slots,
	/// which keeps a small table from colliding repeatedly under deep reentrancy.
	pub fn index_for(&self, hash: u64, depth: usize) -> usize {
		let n = self.slots.len() as u64;
		let base = hash % n;
		((base as u128 * depth.max(1) as u128) % n as u128) as usize
	}

	/// Try to take `slot` for `owner`.
	pub fn claim(&self, slot: usize, owner: u64) -> Claim {
		match self.slots[slot].compare_exchange(FREE, owner, Ordering::AcqRel, Ordering::Acquire) {
			Ok(_) => Claim::Acquired,
			Err(current) if current == owner => Claim::AlreadyHeld,
			Err(current) => Claim::Busy(current),
		}
	}

	/// Free `slot` if `owner` still holds it.
	pub fn release(&self, slot: usize, owner: u64) -> bool {
		self.slots[slot].compare_exchange(owner, FREE, Ordering::AcqRel, Ordering::Relaxed).is_ok()
	}

	/// Current holder of `slot`, if any.
	pub fn holder(&self, slot: usize) -> Option<u64> {
		match self.slots[slot].load(Ordering::Acquire) {
			FREE => None,
			owner => Some(owner),
		}
	}

	/// Take `slot` for `owner`, or report the other owner holding it.
	///
	/// A slot already held by `owner` further up its call chain is granted without taking
	/// ownership, so only the outermost claim releases it.
	pub fn acquire(&self, slot: usize, owner: u64) -> Result<SlotClaim<'_>, u64> {
		match self.claim(slot, owner) {
			Claim::Acquired => Ok(SlotClaim {
				table: self,
				slot,
				owner,
				releases: true,
			}),
			Claim::AlreadyHeld => Ok(SlotClaim {
				table: self,
				slot,
				owner,
				releases: false,
			}),
			Claim::Busy(holder) => Err(holder),
		}
	}
}

/// Permission to populate a slot. Dropping it releases the slot if this claim took it.
pub(crate) struct SlotClaim<'a> {
	table: &'a SlotTable,
	slot: usize,
	owner: u64,
	releases: bool,
}

impl SlotClaim<'_> {
	pub fn slot(&self) -> usize {
		self.slot
	}
}

impl Drop for SlotClaim<'_> {
	fn drop(&mut self) {
		if self.releases {
			self.table.release(self.slot, self.owner);
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;
	use std::thread;

	use super::*;

	#[test]
	fn test_index_for_depth_one_is_plain_modulo() {
		let table = SlotTable::new(DEFAULT_SLOT_COUNT);
		for hash in [0u64, 1, 256, 257, 1_000_003, u64::MAX] {
			assert_eq!(table.index_for(hash, 1), (hash % 257) as usize);
		}
	}

	#[test]
	fn test_index_for_scales_with_depth() {
		let table = SlotTable::new(257);
		assert_eq!(table.index_for(10, 2), 20);
		assert_eq!(table.index_for(200, 2), 400 % 257);
		assert!(table.index_for(u64::MAX, usize::MAX) < 257);
	}

	#[test]
	fn test_claim_and_release() {
		let table = SlotTable::new(4);

		assert_eq!(table.claim(1, 10), Claim::Acquired);
		assert_eq!(table.claim(1, 10), Claim::AlreadyHeld);
		assert_eq!(table.claim(1, 11), Claim::Busy(10));
		assert_eq!(table.holder(1), Some(10));

		// Only the holder can release
		assert!(!table.release(1, 11));
		assert!(table.release(1, 10));
		assert_eq!(table.holder(1), None);
		assert!(!table.release(1, 10));
	}

	#[test]
	fn test_acquire_releases_on_drop() {
		let table = SlotTable::new(2);
		{
			let claim = table.acquire(0, 5).expect("slot is free");
			assert_eq!(claim.slot(), 0);
			assert_eq!(table.holder(0), Some(5));
			assert_eq!(table.acquire(0, 6).err(), Some(5));
		}
		assert_eq!(table.holder(0), None);
	}

	#[test]
	fn test_nested_acquire_keeps_outer_claim() {
		let table = SlotTable::new(2);
		let outer = table.acquire(1, 9).expect("slot is free");
		{
			let _inner = table.acquire(1, 9).expect("same owner");
		}
		// Inner claim must not free the slot held by the outer one
		assert_eq!(table.holder(1), Some(9));
		drop(outer);
		assert_eq!(table.holder(1), None);
	}

	#[test]
	fn test_zero_count_is_clamped() {
		let table = SlotTable::new(0);
		assert_eq!(table.len(), 1);
		assert_eq!(table.index_for(12345, 3), 0);
	}

	#[test]
	fn test_concurrent_claims_elect_one_owner() {
		let table = Arc::new(SlotTable::new(1));
		let handles: Vec<_> = (1..=8u64)
			.map(|owner| {
				let table = table.clone();
				thread::spawn(move || table.claim(0, owner) == Claim::Acquired)
			})
			.collect();

		let winners = handles
			.into_iter()
			.map(|h| h.join().expect("thread should not panic"))
			.filter(|won| *won)
			.count();
		assert_eq!(winners, 1);
	}
}
