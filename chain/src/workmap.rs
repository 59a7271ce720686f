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

//! The Check chaser: owns the Work Map, the shared pool of download units
//! handed out to peer channels.
//!
//! A `Map` is an ordered set of [`Item`]s; the chaser holds a FIFO of maps
//! and a channel atomically pops one. Ownership of a map transfers whole —
//! the FIFO and a channel's held map are never both non-empty for the same
//! item at once, matching the "at most one outstanding map plus at most
//! one in-flight channel" invariant.

use std::collections::VecDeque;
use std::sync::Arc;

use bitnode_store::{Archive, Item};
use parking_lot::Mutex;

use crate::bus::{Bus, EventKind, EventValue};
use crate::error::Error;

/// An ordered set of download items, the unit handed to a channel.
pub type Map = Vec<Item>;

struct Inner {
	fifo: VecDeque<Map>,
}

/// Owns the Work Map FIFO and knows how to rebuild maps from the archive.
pub struct CheckChaser {
	archive: Arc<dyn Archive>,
	bus: Arc<Bus>,
	inventory: usize,
	inner: Mutex<Inner>,
}

impl CheckChaser {
	/// Builds a Check chaser over `archive`, posting download events to
	/// `bus`. `inventory` is the batch size used when pulling unassociated
	/// items from the archive.
	pub fn new(archive: Arc<dyn Archive>, bus: Arc<Bus>, inventory: usize) -> CheckChaser {
		CheckChaser {
			archive,
			bus,
			inventory,
			inner: Mutex::new(Inner {
				fifo: VecDeque::new(),
			}),
		}
	}

	/// At startup, pulls unassociated candidate items above the confirmed
	/// fork in batches of `inventory` until the archive is exhausted,
	/// pushing one map per batch.
	pub fn initialize(&self) -> Result<(), Error> {
		let mut height = self.archive.get_fork()?;
		loop {
			let map = self.make_map(height, self.inventory)?;
			if map.is_empty() {
				break;
			}
			height = map.last().map(|i| i.context.height).unwrap_or(height);
			self.put_hashes(map);
		}
		Ok(())
	}

	/// Builds a map of up to `count` unassociated items above `height`
	/// directly from the archive, without touching the FIFO.
	pub fn make_map(&self, height: u64, count: usize) -> Result<Map, Error> {
		Ok(self.archive.get_unassociated_above(height, count)?)
	}

	/// Pops one map off the front of the FIFO. Returns an empty map if
	/// there's no outstanding work.
	pub fn get_hashes(&self) -> Map {
		self.inner.lock().fifo.pop_front().unwrap_or_default()
	}

	/// Pushes a non-empty map to the back of the FIFO and emits
	/// `download(count)`. A no-op for an empty map.
	pub fn put_hashes(&self, map: Map) {
		if map.is_empty() {
			return;
		}
		let count = map.len() as u64;
		self.inner.lock().fifo.push_back(map);
		self.bus
			.notify(EventKind::Download, EventValue::Count(count));
	}

	/// Splits `map` by extracting every other item (starting at the head)
	/// into a new map, up to half of `map`'s length, and leaving the rest
	/// in place. Used to subdivide a slow channel's work on `split`/
	/// `stall` so the new channel and the old one each keep a spread of
	/// heights rather than the old one keeping only a stale head.
	pub fn split(map: &mut Map) -> Map {
		let limit = (map.len() + 1) / 2;
		let mut extracted = Vec::with_capacity(limit);
		let mut i = 0;
		while i < map.len() && extracted.len() < limit {
			extracted.push(map.remove(i));
			i += 1;
		}
		extracted
	}

	/// Rebuilds a map from `branch_point` and appends it to the FIFO,
	/// called on `header(branch_point)`.
	pub fn on_header(&self, branch_point: u64) -> Result<(), Error> {
		let map = self.make_map(branch_point, self.inventory)?;
		self.put_hashes(map);
		Ok(())
	}

	/// Number of maps currently queued, for tests.
	pub fn fifo_len(&self) -> usize {
		self.inner.lock().fifo.len()
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use bitnode_core::{Block, BlockHeader, Transaction};
	use bitnode_store::MemoryArchive;

	fn genesis() -> Block {
		Block {
			header: BlockHeader {
				previous: bitnode_core::hash::ZERO_HASH,
				height: 0,
				time: 0,
				bits: 0x1d00_ffff,
				nonce: 0,
				merkle_root: bitnode_core::hash::ZERO_HASH,
				witness_commitment: None,
			},
			txs: vec![Transaction {
				txid: bitnode_core::hash::ZERO_HASH,
				wtxid: bitnode_core::hash::ZERO_HASH,
				is_coinbase: true,
			}],
		}
	}

	fn header_at(height: u64, previous: bitnode_core::Hash32) -> BlockHeader {
		BlockHeader {
			previous,
			height,
			time: height as u32,
			bits: 0x1d00_ffff,
			nonce: height as u32,
			merkle_root: bitnode_core::hash::ZERO_HASH,
			witness_commitment: None,
		}
	}

	fn archive_with_candidates(n: u64) -> Arc<MemoryArchive> {
		let archive = Arc::new(MemoryArchive::new(genesis()));
		let mut prev = bitnode_core::hash::ZERO_HASH;
		for h in 1..=n {
			let header = header_at(h, prev);
			use bitnode_core::Hashed;
			prev = header.hash();
			let link = archive.ingest_header(header).unwrap();
			archive.push_candidate(link).unwrap();
		}
		archive
	}

	#[test]
	fn initialize_pulls_all_unassociated_items() {
		let archive = archive_with_candidates(5);
		let bus = Arc::new(Bus::new());
		let check = CheckChaser::new(archive, bus, 2);
		check.initialize().unwrap();
		let mut total = 0;
		loop {
			let map = check.get_hashes();
			if map.is_empty() {
				break;
			}
			total += map.len();
		}
		assert_eq!(total, 5);
	}

	#[test]
	fn split_extracts_every_other_item_starting_at_the_head() {
		let archive = archive_with_candidates(4);
		let mut map = archive.get_unassociated_above(0, 10).unwrap();
		let original_len = map.len();
		let heights: Vec<u64> = map.iter().map(|i| i.context.height).collect();
		assert_eq!(heights, vec![1, 2, 3, 4]);

		let extracted = CheckChaser::split(&mut map);
		assert_eq!(map.len() + extracted.len(), original_len);
		let extracted_heights: Vec<u64> = extracted.iter().map(|i| i.context.height).collect();
		let remaining_heights: Vec<u64> = map.iter().map(|i| i.context.height).collect();
		assert_eq!(extracted_heights, vec![1, 3]);
		assert_eq!(remaining_heights, vec![2, 4]);
	}

	#[test]
	fn put_hashes_ignores_empty_maps() {
		let archive = archive_with_candidates(1);
		let bus = Arc::new(Bus::new());
		let check = CheckChaser::new(archive, bus, 2);
		check.put_hashes(Vec::new());
		assert_eq!(check.fifo_len(), 0);
	}
}
