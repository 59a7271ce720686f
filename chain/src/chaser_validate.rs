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

//! Validate Chaser: sequentially advances `validated_top`, running
//! `accept`+`connect` on each candidate block in turn and chaining the
//! neutrino (BIP157) filter-header digest over validated blocks.

use std::sync::Arc;

use bitnode_core::{HLink, Hash32, StateCode};
use bitnode_store::Archive;
use log::{debug, warn};
use parking_lot::Mutex;

use crate::bus::{Bus, EventKind, EventValue};
use crate::error::Error;

struct Cursor {
	validated_top: u64,
	neutrino: Hash32,
}

/// Outcome of validating one height, mirrors the component design's
/// post-conditions.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Outcome {
	/// Passed, or skipped under bypass.
	Advanced,
	/// The candidate link has no stored transactions yet.
	WaitingForAssociation,
	/// Block is malleable and must be redownloaded; loop halted.
	Malleated,
	/// Block is non-malleably invalid; loop halted.
	Invalid,
}

/// Rule parameters threaded through `accept`, not modeled further since
/// the concrete subsidy schedule is out of scope.
#[derive(Debug, Copy, Clone)]
pub struct RuleParams {
	/// Spacing in blocks between subsidy halvings.
	pub subsidy_interval: u64,
	/// Subsidy paid by the first block.
	pub initial_subsidy: u64,
}

/// The Validate Chaser.
pub struct ValidateChaser {
	archive: Arc<dyn Archive>,
	bus: Arc<Bus>,
	bypass_height: u64,
	rules: RuleParams,
	cursor: Mutex<Cursor>,
}

impl ValidateChaser {
	/// Builds a Validate chaser starting at genesis (`validated_top = 0`,
	/// filter chain seeded with the zero hash).
	pub fn new(
		archive: Arc<dyn Archive>,
		bus: Arc<Bus>,
		bypass_height: u64,
		rules: RuleParams,
	) -> ValidateChaser {
		ValidateChaser {
			archive,
			bus,
			bypass_height,
			rules,
			cursor: Mutex::new(Cursor {
				validated_top: 0,
				neutrino: bitnode_core::hash::ZERO_HASH,
			}),
		}
	}

	/// Current validated height.
	pub fn validated_top(&self) -> u64 {
		self.cursor.lock().validated_top
	}

	/// On `start`/`bump`/`checked(h)`: drives the advance loop forward
	/// from `validated_top + 1` until it hits unassociated work, a
	/// malleation, or an invalid block.
	pub fn advance(&self) -> Result<Outcome, Error> {
		loop {
			let next = self.cursor.lock().validated_top + 1;
			let top = self.archive.get_candidate_top()?;
			if next > top {
				return Ok(Outcome::Advanced);
			}
			let link = match self.archive.to_candidate(next)? {
				Some(l) => l,
				None => return Ok(Outcome::WaitingForAssociation),
			};
			if !self.archive.is_associated(link)? {
				return Ok(Outcome::WaitingForAssociation);
			}

			let outcome = self.validate_one(link, next)?;
			match outcome {
				Outcome::Advanced => {
					self.cursor.lock().validated_top = next;
					self.bus.notify(EventKind::Valid, EventValue::Height(next));
				}
				Outcome::Malleated | Outcome::Invalid | Outcome::WaitingForAssociation => {
					return Ok(outcome);
				}
			}
		}
	}

	fn validate_one(&self, link: HLink, height: u64) -> Result<Outcome, Error> {
		let bypassed_height = height <= self.bypass_height;
		let milestone = self.archive.is_milestone(link)?;
		let malleable = self.archive.is_malleable(link)?;

		if (bypassed_height || milestone) && !malleable {
			self.chain_filter(link)?;
			self.archive.set_block_valid(link)?;
			self.archive.set_txs_connected(link)?;
			debug!("height {}: validation bypassed (checkpoint/milestone)", height);
			return Ok(Outcome::Advanced);
		}

		match self.archive.get_block_state(link)? {
			StateCode::BlockValid | StateCode::BlockConfirmable | StateCode::BlockUnconfirmable => {
				return Ok(Outcome::Advanced);
			}
			_ => {}
		}

		let block = match self.archive.get_block(link)? {
			Some(b) => b,
			None => return Ok(Outcome::WaitingForAssociation),
		};
		let ctx = self.archive.get_context(link)?;

		if !self.archive.populate(&block)? {
			warn!("height {}: missing previous output", height);
			self.archive.set_block_unconfirmable(link)?;
			self.bus.notify(EventKind::Unvalid, EventValue::HLink(link));
			return Ok(Outcome::Invalid);
		}

		let accept = block.accept(&ctx, self.rules.subsidy_interval, self.rules.initial_subsidy);
		let result = if accept.is_ok() {
			block.connect(&ctx)
		} else {
			accept
		};

		if !result.is_ok() {
			if result.is_malleable() {
				warn!("height {}: malleable block failed validation, requesting redownload", height);
				self.bus.notify(EventKind::Malleated, EventValue::HLink(link));
				return Ok(Outcome::Malleated);
			}
			warn!("height {}: validation failed: {:?}", height, result);
			self.archive.set_block_unconfirmable(link)?;
			self.bus.notify(EventKind::Unvalid, EventValue::HLink(link));
			return Ok(Outcome::Invalid);
		}

		self.chain_filter(link)?;
		self.archive.set_block_valid(link)?;
		self.archive.set_txs_connected(link)?;
		Ok(Outcome::Advanced)
	}

	fn chain_filter(&self, link: HLink) -> Result<(), Error> {
		if !self.archive.neutrino_enabled() {
			return Ok(());
		}
		let mut cursor = self.cursor.lock();
		// The filter body itself is a stand-in: the concrete BIP157
		// construction is out of scope, so the header key doubles as the
		// per-block filter input to the chain.
		let filter = self.archive.get_header_key(link)?;
		let head = cursor.neutrino.chain(&filter);
		cursor.neutrino = head;
		drop(cursor);
		self.archive.set_filter(link, head, filter)?;
		Ok(())
	}

	/// On `regressed(b)`: if `b < validated_top`, rewinds the cursor to
	/// `b` and recomputes the neutrino digest from the archive.
	pub fn on_regressed(&self, b: u64) -> Result<(), Error> {
		let should_rewind = self.cursor.lock().validated_top > b;
		if !should_rewind {
			return Ok(());
		}
		let neutrino = if b == 0 {
			bitnode_core::hash::ZERO_HASH
		} else if let Some(link) = self.archive.to_candidate(b)? {
			self.archive.get_filter_head(link)?
		} else {
			bitnode_core::hash::ZERO_HASH
		};
		let mut cursor = self.cursor.lock();
		cursor.validated_top = b;
		cursor.neutrino = neutrino;
		Ok(())
	}

	/// On `disorganized(top)`: resets the cursor to `top` and resumes the
	/// advance loop (left to the caller, typically via `advance` again).
	pub fn on_disorganized(&self, top: u64) -> Result<(), Error> {
		self.on_regressed(top)
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use bitnode_core::hash::ZERO_HASH;
	use bitnode_core::{Block, BlockHeader, Transaction};
	use bitnode_store::MemoryArchive;

	fn genesis() -> Block {
		Block {
			header: BlockHeader {
				previous: ZERO_HASH,
				height: 0,
				time: 0,
				bits: 0x1d00_ffff,
				nonce: 0,
				merkle_root: ZERO_HASH,
				witness_commitment: None,
			},
			txs: vec![Transaction {
				txid: ZERO_HASH,
				wtxid: ZERO_HASH,
				is_coinbase: true,
			}],
		}
	}

	fn rules() -> RuleParams {
		RuleParams {
			subsidy_interval: 210_000,
			initial_subsidy: 50_0000_0000,
		}
	}

	fn push_block(archive: &Arc<MemoryArchive>, height: u64, time: u32, previous: Hash32) -> Hash32 {
		use bitnode_core::Hashed;
		let tx = Transaction {
			txid: bitnode_core::hash::double_sha256(&height.to_be_bytes()),
			wtxid: bitnode_core::hash::double_sha256(&height.to_be_bytes()),
			is_coinbase: true,
		};
		let (root, _) = bitnode_core::block::merkle_root(&[tx.txid]);
		let header = BlockHeader {
			previous,
			height,
			time,
			bits: 0x1d00_ffff,
			nonce: height as u32,
			merkle_root: root,
			witness_commitment: None,
		};
		let hash = header.hash();
		let link = archive.ingest_header(header).unwrap();
		archive.push_candidate(link).unwrap();
		archive.store_txs(link, &[tx], 1, false).unwrap();
		hash
	}

	#[test]
	fn advances_through_associated_blocks() {
		let archive = Arc::new(MemoryArchive::new(genesis()));
		let bus = Arc::new(Bus::new());
		let mut prev = genesis().header.hash();
		use bitnode_core::Hashed;
		for h in 1..=3u64 {
			prev = push_block(&archive, h, h as u32, prev);
		}
		let chaser = ValidateChaser::new(archive, bus, 0, rules());
		let outcome = chaser.advance().unwrap();
		assert_eq!(outcome, Outcome::Advanced);
		assert_eq!(chaser.validated_top(), 3);
	}

	#[test]
	fn stops_waiting_when_not_yet_associated() {
		let archive = Arc::new(MemoryArchive::new(genesis()));
		let bus = Arc::new(Bus::new());
		let header = BlockHeader {
			previous: genesis().header.hash(),
			height: 1,
			time: 1,
			bits: 0x1d00_ffff,
			nonce: 1,
			merkle_root: ZERO_HASH,
			witness_commitment: None,
		};
		let link = archive.ingest_header(header).unwrap();
		archive.push_candidate(link).unwrap();

		let chaser = ValidateChaser::new(archive, bus, 0, rules());
		let outcome = chaser.advance().unwrap();
		assert_eq!(outcome, Outcome::WaitingForAssociation);
		assert_eq!(chaser.validated_top(), 0);
	}
}
