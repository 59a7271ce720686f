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

//! End-to-end scenarios driving the chasers together through the `Node`
//! facade and the per-channel Block-In protocol.

use std::sync::Arc;

use parking_lot::Mutex;

use bitnode_chain::block_in::BlockInChannel;
use bitnode_chain::bus::{Bus, Event, EventKind};
use bitnode_chain::chaser_confirm::ConfirmChaser;
use bitnode_chain::chaser_header::HeaderChaser;
use bitnode_chain::chaser_validate::{RuleParams, ValidateChaser};
use bitnode_chain::workmap::CheckChaser;
use bitnode_core::hash::{double_sha256, ZERO_HASH};
use bitnode_core::{Block, BlockHeader, Hash32, Hashed, Transaction};
use bitnode_store::{Archive, MemoryArchive};

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

fn block_at(height: u64, time: u32, nonce_salt: u8, previous: Hash32) -> Block {
	let tx = Transaction {
		txid: double_sha256(&[height.to_be_bytes().to_vec(), vec![nonce_salt]].concat()),
		wtxid: double_sha256(&[height.to_be_bytes().to_vec(), vec![nonce_salt]].concat()),
		is_coinbase: true,
	};
	let (root, _) = bitnode_core::block::merkle_root(&[tx.txid]);
	let header = BlockHeader {
		previous,
		height,
		time,
		bits: 0x1d00_ffff,
		nonce: height as u32 + nonce_salt as u32,
		merkle_root: root,
		witness_commitment: None,
	};
	Block {
		header,
		txs: vec![tx],
	}
}

fn rules() -> RuleParams {
	RuleParams {
		subsidy_interval: 210_000,
		initial_subsidy: 50_0000_0000,
	}
}

struct Harness {
	archive: Arc<MemoryArchive>,
	bus: Arc<Bus>,
	header: Arc<HeaderChaser>,
	check: Arc<CheckChaser>,
	validate: Arc<ValidateChaser>,
	confirm: Arc<ConfirmChaser>,
	events: Arc<Mutex<Vec<Event>>>,
}

impl Harness {
	fn new() -> Harness {
		let archive = Arc::new(MemoryArchive::new(genesis()));
		let bus = Arc::new(Bus::new());
		let dyn_archive: Arc<dyn Archive> = archive.clone();
		let header = Arc::new(HeaderChaser::new(dyn_archive.clone(), bus.clone(), 24 * 60 * 60));
		let check = Arc::new(CheckChaser::new(dyn_archive.clone(), bus.clone(), 50));
		let validate = Arc::new(ValidateChaser::new(dyn_archive.clone(), bus.clone(), 0, rules()));
		let confirm = Arc::new(ConfirmChaser::new(dyn_archive, bus.clone(), 2));

		// Mirrors the wiring `Node::new` does: header events drive the
		// validate cursor's rewind and the check chaser's map rebuild.
		{
			let validate = validate.clone();
			bus.subscribe(Box::new(move |event| {
				if event.kind == EventKind::Regressed {
					validate.on_regressed(event.value.as_u64()).ok();
				}
				true
			}));
		}
		{
			let validate = validate.clone();
			bus.subscribe(Box::new(move |event| {
				if event.kind == EventKind::Disorganized {
					validate.on_disorganized(event.value.as_u64()).ok();
				}
				true
			}));
		}
		{
			let check = check.clone();
			bus.subscribe(Box::new(move |event| {
				if event.kind == EventKind::Header {
					check.on_header(event.value.as_u64()).ok();
				}
				true
			}));
		}

		let events = Arc::new(Mutex::new(Vec::new()));
		{
			let events = events.clone();
			bus.subscribe(Box::new(move |event| {
				events.lock().push(event);
				true
			}));
		}

		Harness {
			archive,
			bus,
			header,
			check,
			validate,
			confirm,
			events,
		}
	}

	fn dyn_archive(&self) -> Arc<dyn Archive> {
		self.archive.clone()
	}

	/// Number of captured bus events of `kind`, pumped or not yet pumped
	/// notwithstanding -- callers that care about ordering should `drive`
	/// (which pumps) before checking this.
	fn event_count(&self, kind: EventKind) -> usize {
		self.events.lock().iter().filter(|e| e.kind == kind).count()
	}

	/// Runs the validate+confirm half of the pipeline to quiescence,
	/// pumping the bus before and after each round so a header event
	/// queued by `header.organize` is delivered and acted on before (and
	/// any event this round produces is delivered after) validate/confirm
	/// run, mirroring `Node::run`.
	fn drive(&self) {
		loop {
			self.bus.pump();
			let before = (self.validate.validated_top(), self.archive.get_top_confirmed().unwrap());
			self.validate.advance().ok();
			let confirmed_top = self.archive.get_top_confirmed().unwrap();
			self.confirm.on_candidate_event(confirmed_top + 1).ok();
			self.bus.pump();
			let after = (self.validate.validated_top(), self.archive.get_top_confirmed().unwrap());
			if before == after {
				break;
			}
		}
	}
}

/// (a) Linear sync: feed ten headers and their blocks through one
/// channel, expect the confirmed tip to reach height 10.
#[test]
fn scenario_linear_sync() {
	let h = Harness::new();
	let mut prev = genesis().header.hash();
	let mut blocks = Vec::new();
	for height in 1..=10u64 {
		let block = block_at(height, height as u32, 0, prev);
		prev = block.header.hash();
		h.header.organize(block.header.clone()).unwrap();
		blocks.push(block);
	}

	let mut channel = BlockInChannel::new(1, h.check.clone(), h.dyn_archive(), h.bus.clone(), 0);
	channel.on_ready();
	for block in blocks {
		channel.on_block(block).unwrap();
	}
	h.drive();

	assert_eq!(h.archive.get_candidate_top().unwrap(), 10);
	assert_eq!(h.validate.validated_top(), 10);
	assert_eq!(h.archive.get_top_confirmed().unwrap(), 10);
}

/// (b) Header reorg above tip: after a 10-block linear sync, a competing
/// branch forking at height 7 with more cumulative work should become the
/// new candidate (and eventually confirmed) chain.
#[test]
fn scenario_header_reorg_above_tip() {
	let h = Harness::new();
	let mut prev = genesis().header.hash();
	let mut blocks = Vec::new();
	let mut hash_at = vec![genesis().header.hash()];
	for height in 1..=10u64 {
		let block = block_at(height, height as u32, 0, prev);
		prev = block.header.hash();
		hash_at.push(prev);
		h.header.organize(block.header.clone()).unwrap();
		blocks.push(block);
	}
	let mut channel = BlockInChannel::new(1, h.check.clone(), h.dyn_archive(), h.bus.clone(), 0);
	channel.on_ready();
	for block in blocks {
		channel.on_block(block).unwrap();
	}
	h.drive();
	assert_eq!(h.archive.get_top_confirmed().unwrap(), 10);

	// Fork from height 7, five blocks against the original's three. The
	// bits are chosen so a single fork block, or any prefix of up to four
	// of them, is still weaker than the three original blocks it's
	// replacing -- only the full five-block branch out-works them. This
	// forces the header chaser to hold the losing branch in its tree
	// across several `organize` calls and only splice it in once the
	// fifth header arrives, rather than winning outright on the first
	// header the way an easier-chosen bits value would.
	let fork_bits: u32 = 0x1d01_57c1;
	let mut fork_prev = hash_at[7];
	let mut fork_blocks = Vec::new();
	for height in 8..=12u64 {
		let tx = Transaction {
			txid: double_sha256(&[height.to_be_bytes().to_vec(), vec![99]].concat()),
			wtxid: double_sha256(&[height.to_be_bytes().to_vec(), vec![99]].concat()),
			is_coinbase: true,
		};
		let (root, _) = bitnode_core::block::merkle_root(&[tx.txid]);
		let header = BlockHeader {
			previous: fork_prev,
			height,
			time: height as u32 + 100,
			bits: fork_bits,
			nonce: height as u32 + 99,
			merkle_root: root,
			witness_commitment: None,
		};
		fork_prev = header.hash();
		let block = Block {
			header,
			txs: vec![tx],
		};
		fork_blocks.push(block);
	}

	for (i, block) in fork_blocks.iter().enumerate() {
		h.header.organize(block.header.clone()).unwrap();
		if i < fork_blocks.len() - 1 {
			// Still losing against the three original blocks it would
			// replace: the candidate tip hasn't moved and the branch is
			// waiting in the header chaser's tree, not discarded.
			assert_eq!(h.archive.get_candidate_top().unwrap(), 10);
			assert!(h.header.tree_len() > 0);
		}
	}
	assert_eq!(h.archive.get_candidate_top().unwrap(), 12);
	assert_eq!(h.header.tree_len(), 0);

	let mut channel2 = BlockInChannel::new(2, h.check.clone(), h.dyn_archive(), h.bus.clone(), 0);
	channel2.on_ready();
	for block in fork_blocks {
		channel2.on_block(block).unwrap();
	}
	h.drive();

	assert_eq!(h.validate.validated_top(), 12);
	assert_eq!(h.archive.get_top_confirmed().unwrap(), 12);

	// The fork's height-8 block was actually re-validated under the new
	// chain rather than inheriting stale state from the original height-8
	// block it replaced.
	let new_link_8 = h.archive.to_candidate(8).unwrap().unwrap();
	assert_eq!(
		h.archive.get_block_state(new_link_8).unwrap(),
		bitnode_core::StateCode::BlockValid
	);

	// Exactly one regression, to height 7 -- the four declined promotion
	// attempts must not have touched the candidate chain or the bus.
	assert_eq!(h.event_count(EventKind::Regressed), 1);
	// The three original blocks at heights 8, 9, 10 popped off the
	// confirmed chain during rollback-and-reapply.
	assert_eq!(h.event_count(EventKind::Reorganized), 3);
}

/// (c) Malleated64: a block whose witness layout fails the commitment
/// check despite a familiar hash must stop the channel without marking
/// the block unconfirmable, and its map slot must be preserved.
#[test]
fn scenario_malleated64_stops_channel_without_marking_unconfirmable() {
	let h = Harness::new();
	let mut block = block_at(1, 1, 0, genesis().header.hash());
	// A witness commitment that doesn't match the block's own witness
	// merkle root: same header hash, invalid tx-commitment semantics.
	block.header.witness_commitment = Some(Hash32([0xee; 32]));
	h.header.organize(block.header.clone()).unwrap();

	let mut channel = BlockInChannel::new(1, h.check.clone(), h.dyn_archive(), h.bus.clone(), 0);
	channel.on_ready();
	assert_eq!(channel.outstanding(), 1);
	let err = channel.on_block(block.clone()).unwrap_err();
	assert_eq!(err.kind(), bitnode_chain::error::ErrorKind::MalleatedBlock);

	let link = h.archive.to_candidate(1).unwrap().unwrap();
	assert_eq!(
		h.archive.get_block_state(link).unwrap(),
		bitnode_core::StateCode::Unassociated
	);
	assert_eq!(h.check.fifo_len(), 1);
}

/// (d) Split under starvation: channel A holds a map of 10; a `stall`
/// results in A giving up half its map to the pool.
#[test]
fn scenario_split_under_starvation() {
	let h = Harness::new();
	let mut prev = genesis().header.hash();
	for height in 1..=10u64 {
		let block = block_at(height, height as u32, 0, prev);
		prev = block.header.hash();
		h.header.organize(block.header.clone()).unwrap();
	}

	let mut channel_a = BlockInChannel::new(1, h.check.clone(), h.dyn_archive(), h.bus.clone(), 0);
	channel_a.on_ready();
	assert_eq!(channel_a.outstanding(), 10);

	channel_a.on_stall();
	assert_eq!(channel_a.outstanding(), 5);
	assert_eq!(h.check.fifo_len(), 1);

	let mut channel_b = BlockInChannel::new(2, h.check.clone(), h.dyn_archive(), h.bus.clone(), 0);
	channel_b.on_ready();
	assert_eq!(channel_b.outstanding(), 5);
}

/// (e) Confirmability race failure: one of four transactions fails
/// `tx_confirmable`; expect the block marked unconfirmable and a full
/// rollback to the prior confirmed state.
#[test]
fn scenario_confirmability_race_failure_rolls_back() {
	let h = Harness::new();

	let make_block = |height: u64, previous: Hash32, fail_idx: Option<usize>| -> Block {
		let mut txs = vec![Transaction {
			txid: double_sha256(&height.to_be_bytes()),
			wtxid: double_sha256(&height.to_be_bytes()),
			is_coinbase: true,
		}];
		for i in 0..3 {
			let seed = [height.to_be_bytes().to_vec(), vec![i as u8 + 1]].concat();
			let txid = double_sha256(&seed);
			txs.push(Transaction {
				txid,
				wtxid: txid,
				is_coinbase: false,
			});
		}
		if let Some(idx) = fail_idx {
			h.archive.force_tx_failure(txs[idx].txid);
		}
		let leaves: Vec<_> = txs.iter().map(|t| t.txid).collect();
		let (root, _) = bitnode_core::block::merkle_root(&leaves);
		let header = BlockHeader {
			previous,
			height,
			time: height as u32,
			bits: 0x1d00_ffff,
			nonce: height as u32,
			merkle_root: root,
			witness_commitment: None,
		};
		Block { header, txs }
	};

	let mut prev = genesis().header.hash();
	let good = make_block(1, prev, None);
	prev = good.header.hash();
	h.header.organize(good.header.clone()).unwrap();
	let link1 = h.archive.ingest_header(good.header.clone()).unwrap();
	h.archive.store_txs(link1, &good.txs, 1, false).unwrap();
	h.drive();
	let confirmed_before = h.archive.get_top_confirmed().unwrap();
	assert_eq!(confirmed_before, 1);

	let bad = make_block(2, prev, Some(2));
	h.header.organize(bad.header.clone()).unwrap();
	let link2 = h.archive.ingest_header(bad.header.clone()).unwrap();
	h.archive.store_txs(link2, &bad.txs, 1, false).unwrap();
	h.drive();

	assert_eq!(h.archive.get_top_confirmed().unwrap(), confirmed_before);
	assert_eq!(
		h.archive.get_block_state(link2).unwrap(),
		bitnode_core::StateCode::BlockUnconfirmable
	);
	assert!(!h.confirm.is_busy());
}

/// (f) Purge on disorganize: a channel holding a map of 8 receives
/// `purge`; its map is cleared and never returned to the pool.
#[test]
fn scenario_purge_on_disorganize() {
	let h = Harness::new();
	let mut prev = genesis().header.hash();
	for height in 1..=8u64 {
		let block = block_at(height, height as u32, 0, prev);
		prev = block.header.hash();
		h.header.organize(block.header.clone()).unwrap();
	}

	let mut channel = BlockInChannel::new(1, h.check.clone(), h.dyn_archive(), h.bus.clone(), 0);
	channel.on_ready();
	assert_eq!(channel.outstanding(), 8);

	channel.on_purge();
	assert_eq!(channel.outstanding(), 0);
	assert_eq!(h.check.fifo_len(), 0);
}
