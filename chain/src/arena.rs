// Copyright 2024 The Bitnode Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Bump allocator over a preallocated region, used to build per-block
//! prevout/validation scratch without heap fragmentation.
//!
//! Deallocation is a no-op in the allocator itself; [`Retainer`] scope
//! guards track how many allocations are still outstanding so the arena
//! knows when it's safe to wrap the offset back to zero.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::error::{Error, ErrorKind};

struct State {
	offset: usize,
}

/// A bump allocator with a wrap-and-block policy: once the next aligned
/// allocation would overrun the arena, callers block until every
/// outstanding [`Retainer`] has dropped, then the offset resets to zero.
pub struct Arena {
	capacity: usize,
	state: Mutex<State>,
	drained: Condvar,
	outstanding: AtomicUsize,
}

/// A scope guard for one allocation. Dropping it releases the allocation's
/// claim on the arena; when the last retainer for a generation drops, any
/// thread blocked in [`Arena::allocate`] waiting to wrap is woken.
pub struct Retainer {
	arena: Arc<Arena>,
}

impl Drop for Retainer {
	fn drop(&mut self) {
		if self.arena.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
			self.arena.drained.notify_all();
		}
	}
}

impl Arena {
	/// Builds an arena of `capacity` bytes.
	pub fn new(capacity: usize) -> Arc<Arena> {
		Arc::new(Arena {
			capacity,
			state: Mutex::new(State { offset: 0 }),
			drained: Condvar::new(),
			outstanding: AtomicUsize::new(0),
		})
	}

	/// Total capacity of the arena, in bytes.
	pub fn capacity(&self) -> usize {
		self.capacity
	}

	/// Reserves `bytes` aligned to `align`, returning the byte offset into
	/// the arena's backing region and a [`Retainer`] that must be held for
	/// as long as the allocation is in use.
	///
	/// Blocks if the allocation doesn't fit before the end of the region
	/// and other allocations are still outstanding; once they all drop,
	/// the offset wraps to zero and the allocation retries there. Fails
	/// with [`ErrorKind::AllocationTooLarge`] if `bytes` alone exceeds
	/// `capacity`.
	pub fn allocate(self: &Arc<Self>, bytes: usize, align: usize) -> Result<(usize, Retainer), Error> {
		if bytes > self.capacity {
			return Err(ErrorKind::AllocationTooLarge(bytes).into());
		}
		let mut state = self.state.lock();
		loop {
			let aligned = align_up(state.offset, align);
			if aligned.saturating_add(bytes) <= self.capacity {
				state.offset = aligned + bytes;
				self.outstanding.fetch_add(1, Ordering::SeqCst);
				return Ok((
					aligned,
					Retainer {
						arena: Arc::clone(self),
					},
				));
			}
			if self.outstanding.load(Ordering::SeqCst) == 0 {
				state.offset = 0;
				continue;
			}
			self.drained.wait(&mut state);
		}
	}

	/// Resets the arena to empty regardless of outstanding retainers.
	/// Intended for use between test cases or after a `fault`, never
	/// during normal operation (outstanding retainers would then alias a
	/// reused region).
	pub fn reset(&self) {
		let mut state = self.state.lock();
		state.offset = 0;
	}

	/// Current bump offset, for tests and diagnostics.
	pub fn offset(&self) -> usize {
		self.state.lock().offset
	}
}

fn align_up(offset: usize, align: usize) -> usize {
	if align <= 1 {
		return offset;
	}
	(offset + align - 1) & !(align - 1)
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn allocations_are_aligned_and_non_overlapping() {
		let arena = Arena::new(1024);
		let (a, _ra) = arena.allocate(10, 8).unwrap();
		let (b, _rb) = arena.allocate(10, 8).unwrap();
		assert_eq!(a % 8, 0);
		assert_eq!(b % 8, 0);
		assert!(b >= a + 10);
	}

	#[test]
	fn oversized_allocation_fails() {
		let arena = Arena::new(16);
		assert!(arena.allocate(17, 1).is_err());
	}

	#[test]
	fn wraps_once_all_retainers_drop() {
		let arena = Arena::new(16);
		{
			let (_off, retainer) = arena.allocate(16, 1).unwrap();
			drop(retainer);
		}
		let (off, _r) = arena.allocate(16, 1).unwrap();
		assert_eq!(off, 0);
	}
}
