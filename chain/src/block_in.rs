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

//! Block-In Protocol: one state machine per peer channel, driving block
//! requests through to the archive.
//!
//! Runs entirely on the channel's own strand — `BlockInChannel` is not
//! `Sync` by design, callers serialize access (e.g. by owning one per
//! worker thread or wrapping in a mutex at a higher layer).

use std::sync::Arc;

use bitnode_core::{Block, Hashed};
use bitnode_store::Archive;
use log::{debug, warn};

use crate::bus::{Bus, EventKind, EventValue};
use crate::error::{Error, ErrorKind};
use crate::workmap::{CheckChaser, Map};

/// Channel state.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ChannelState {
	/// No outstanding map; waiting for work or for the chain to be current.
	Idle,
	/// Holding a map, blocks are being requested/received.
	Downloading,
	/// Tearing down: releasing any held map, about to exit.
	Stopping,
}

/// One peer channel's Block-In state.
pub struct BlockInChannel {
	id: u64,
	state: ChannelState,
	map: Map,
	bypass_height: u64,
	bytes_this_period: u64,
	check: Arc<CheckChaser>,
	archive: Arc<dyn Archive>,
	bus: Arc<Bus>,
}

impl BlockInChannel {
	/// Builds a channel in the idle state.
	pub fn new(
		id: u64,
		check: Arc<CheckChaser>,
		archive: Arc<dyn Archive>,
		bus: Arc<Bus>,
		bypass_height: u64,
	) -> BlockInChannel {
		BlockInChannel {
			id,
			state: ChannelState::Idle,
			map: Vec::new(),
			bypass_height,
			bytes_this_period: 0,
			check,
			archive,
			bus,
		}
	}

	/// This channel's id, as used for `notify_one` targeting.
	pub fn id(&self) -> u64 {
		self.id
	}

	/// Current state, for tests and diagnostics.
	pub fn state(&self) -> ChannelState {
		self.state
	}

	/// Number of items still outstanding in this channel's map.
	pub fn outstanding(&self) -> usize {
		self.map.len()
	}

	/// Called when the channel becomes ready and the chain is current.
	/// Pulls a map; on an empty result, emits `starved` and stays idle.
	pub fn on_ready(&mut self) {
		let map = self.check.get_hashes();
		if map.is_empty() {
			self.bus
				.notify(EventKind::Starved, EventValue::ChannelId(self.id));
			self.state = ChannelState::Idle;
			return;
		}
		self.map = map;
		self.bytes_this_period = 0;
		self.state = ChannelState::Downloading;
	}

	/// Handles one incoming block. Returns the outcome so callers can
	/// decide whether to keep the channel open.
	pub fn on_block(&mut self, block: Block) -> Result<Code, Error> {
		let hash = block.header.hash();
		let pos = match self.map.iter().position(|item| item.hash == hash) {
			Some(p) => p,
			None => {
				debug!(
					"channel {}: received block {} not in current map, ignoring",
					self.id, hash
				);
				return Ok(Code::Unsolicited);
			}
		};
		let item = self.map[pos].clone();

		let malleated64 = self.archive.is_malleated64(&block)?;
		if malleated64 {
			warn!(
				"channel {}: block {} is malleated64, stopping channel",
				self.id, hash
			);
			self.stop_and_return_map();
			return Err(ErrorKind::MalleatedBlock.into());
		}

		let bypass = item.context.height <= self.bypass_height;
		let result = block.check(bypass);

		if !result.is_ok() {
			if result.is_integrity() {
				warn!(
					"channel {}: block {} check hit an archive integrity failure ({:?}), stopping",
					self.id, hash, result
				);
				self.stop_and_return_map();
				return Err(ErrorKind::Integrity(format!("block {} check: {:?}", hash, result)).into());
			}
			if result.is_malleable() {
				warn!(
					"channel {}: block {} is malleable ({:?}), stopping without marking unconfirmable",
					self.id, hash, result
				);
				self.stop_and_return_map();
				return Err(ErrorKind::MalleatedBlock.into());
			}
			warn!(
				"channel {}: block {} failed check: {:?}",
				self.id, hash, result
			);
			self.archive.set_block_unconfirmable(item.link)?;
			self.bus
				.notify(EventKind::Unchecked, EventValue::HLink(item.link));
			self.stop_and_return_map();
			return Ok(Code::Failed);
		}

		let size = block.txs.len() as u64;
		let stored = self.archive.store_txs(item.link, &block.txs, size, bypass)?;
		if !stored.is_ok() {
			if stored.is_integrity() {
				warn!(
					"channel {}: block {} store hit an archive integrity failure ({:?}), stopping",
					self.id, hash, stored
				);
				self.stop_and_return_map();
				return Err(ErrorKind::Integrity(format!("block {} store_txs: {:?}", hash, stored)).into());
			}
			if stored.is_malleable() {
				warn!(
					"channel {}: block {} store detected malleation ({:?})",
					self.id, hash, stored
				);
				self.stop_and_return_map();
				return Err(ErrorKind::MalleatedBlock.into());
			}
			self.archive.set_block_unconfirmable(item.link)?;
			self.bus
				.notify(EventKind::Unchecked, EventValue::HLink(item.link));
			self.stop_and_return_map();
			return Ok(Code::Failed);
		}

		self.map.remove(pos);
		self.bytes_this_period += size;
		self.bus
			.notify(EventKind::Checked, EventValue::Height(item.context.height));

		if self.map.is_empty() && self.state == ChannelState::Downloading {
			self.on_ready();
		}

		Ok(Code::Accepted)
	}

	/// `split(_)`: if the held map has more than one item, halves it,
	/// stashes the tail half back via `put_hashes`, then stops the
	/// channel. A no-op on a map of size ≤ 1.
	pub fn on_split(&mut self) {
		if self.map.len() > 1 {
			let tail = CheckChaser::split(&mut self.map);
			self.check.put_hashes(tail);
			self.stop_with(ErrorKind::SacrificedChannel);
		}
	}

	/// `stall(_)`: same handling as `split`, triggered collectively when a
	/// `starved` broadcast indicates another channel has no work.
	pub fn on_stall(&mut self) {
		self.on_split();
	}

	/// `purge(_)`: drops the remaining map (it is not returned to the
	/// pool) and stops the channel.
	pub fn on_purge(&mut self) {
		self.map.clear();
		self.stop_with(ErrorKind::SacrificedChannel);
	}

	/// `download(_)`: if idle, restarts the performance timer and fetches
	/// a fresh map.
	pub fn on_download(&mut self) {
		if self.state == ChannelState::Idle {
			self.bytes_this_period = 0;
			self.on_ready();
		}
	}

	/// `bypass(h)`: updates the local bypass-height cursor.
	pub fn on_bypass(&mut self, height: u64) {
		self.bypass_height = height;
	}

	/// `report(seq)`: logs the channel's current map size.
	pub fn on_report(&self, seq: u64) {
		debug!(
			"channel {} report #{}: {} items outstanding",
			self.id,
			seq,
			self.map.len()
		);
	}

	/// `stop`: releases any held map back to the pool and transitions to
	/// stopping. Idempotent.
	pub fn on_stop(&mut self) {
		self.stop_and_return_map();
	}

	fn stop_and_return_map(&mut self) {
		let map = std::mem::take(&mut self.map);
		self.check.put_hashes(map);
		self.state = ChannelState::Stopping;
	}

	fn stop_with(&mut self, _reason: ErrorKind) {
		self.stop_and_return_map();
	}
}

/// Outcome of handling one inbound block, distinct from [`bitnode_core::Code`]
/// because it also covers channel-protocol conditions (unsolicited blocks)
/// that never reach the pure block contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Code {
	/// Stored and removed from the map.
	Accepted,
	/// Check or store failed for a non-malleable reason; archive updated.
	Failed,
	/// Block didn't match anything in the current map.
	Unsolicited,
}

#[cfg(test)]
mod test {
	use super::*;
	use bitnode_core::{BlockHeader, Transaction};
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

	fn block_at(height: u64, previous: bitnode_core::Hash32) -> Block {
		let tx = Transaction {
			txid: bitnode_core::hash::double_sha256(&height.to_be_bytes()),
			wtxid: bitnode_core::hash::double_sha256(&height.to_be_bytes()),
			is_coinbase: true,
		};
		let (root, _) = bitnode_core::block::merkle_root(&[tx.txid]);
		let header = BlockHeader {
			previous,
			height,
			time: height as u32,
			bits: 0x1d00_ffff,
			nonce: height as u32,
			merkle_root: root,
			witness_commitment: None,
		};
		Block {
			header,
			txs: vec![tx],
		}
	}

	fn setup(n: u64) -> (Arc<MemoryArchive>, Arc<CheckChaser>, Arc<Bus>, Vec<Block>) {
		let archive = Arc::new(MemoryArchive::new(genesis()));
		let bus = Arc::new(Bus::new());
		let mut prev = bitnode_core::hash::ZERO_HASH;
		let mut blocks = Vec::new();
		for h in 1..=n {
			let block = block_at(h, prev);
			prev = block.header.hash();
			let link = archive.ingest_header(block.header.clone()).unwrap();
			archive.push_candidate(link).unwrap();
			blocks.push(block);
		}
		let check = Arc::new(CheckChaser::new(archive.clone(), bus.clone(), 10));
		check.initialize().unwrap();
		(archive, check, bus, blocks)
	}

	#[test]
	fn accepted_block_is_removed_from_map_and_emits_checked() {
		let (archive, check, bus, blocks) = setup(2);
		let mut channel = BlockInChannel::new(1, check, archive, bus, 0);
		channel.on_ready();
		assert_eq!(channel.outstanding(), 2);
		let code = channel.on_block(blocks[0].clone()).unwrap();
		assert_eq!(code, Code::Accepted);
		assert_eq!(channel.outstanding(), 1);
	}

	#[test]
	fn starved_when_no_work_available() {
		let archive = Arc::new(MemoryArchive::new(genesis()));
		let bus = Arc::new(Bus::new());
		let check = Arc::new(CheckChaser::new(archive.clone(), bus.clone(), 10));
		let mut channel = BlockInChannel::new(1, check, archive, bus.clone(), 0);
		channel.on_ready();
		assert_eq!(channel.state(), ChannelState::Idle);
	}

	#[test]
	fn split_returns_half_the_map_and_stops() {
		let (archive, check, bus, _blocks) = setup(4);
		let mut channel = BlockInChannel::new(1, check.clone(), archive, bus, 0);
		channel.on_ready();
		assert_eq!(channel.outstanding(), 4);
		channel.on_split();
		assert_eq!(channel.state(), ChannelState::Stopping);
		assert_eq!(check.fifo_len(), 1);
	}

	#[test]
	fn purge_drops_map_without_returning_it() {
		let (archive, check, bus, _blocks) = setup(3);
		let mut channel = BlockInChannel::new(1, check.clone(), archive, bus, 0);
		channel.on_ready();
		channel.on_purge();
		assert_eq!(channel.outstanding(), 0);
		assert_eq!(check.fifo_len(), 0);
	}
}
