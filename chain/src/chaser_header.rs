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

//! Header Chaser: maintains the tree of weak (not-yet-candidate) branches
//! and promotes the strongest one to the candidate chain.
//!
//! Branches accumulate in `tree`, keyed by header hash, until a chain of
//! proposed headers links back to the candidate chain and beats its work
//! over the same span; then the whole branch is spliced in one promotion.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bitnode_core::{BlockHeader, Hash32, Hashed, Proof};
use bitnode_store::Archive;
use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::bus::{Bus, EventKind, EventValue};
use crate::error::{Error, ErrorKind};

struct Node {
	header: BlockHeader,
}

struct Inner {
	/// Proposed headers not yet known to descend from the candidate chain.
	tree: HashMap<Hash32, Node>,
	/// Well-known checkpoint/milestone hashes, keyed by height.
	checkpoints: HashMap<u64, Hash32>,
}

/// The Header Chaser.
pub struct HeaderChaser {
	archive: Arc<dyn Archive>,
	bus: Arc<Bus>,
	currency_window: u32,
	inner: Mutex<Inner>,
}

impl HeaderChaser {
	/// Builds a Header chaser over `archive`. `currency_window` is the
	/// number of seconds the tip timestamp may lag wall-clock and still be
	/// considered current.
	pub fn new(archive: Arc<dyn Archive>, bus: Arc<Bus>, currency_window: u32) -> HeaderChaser {
		HeaderChaser {
			archive,
			bus,
			currency_window,
			inner: Mutex::new(Inner {
				tree: HashMap::new(),
				checkpoints: HashMap::new(),
			}),
		}
	}

	/// Registers a well-known hash as a checkpoint/milestone, which forces
	/// strict equality at that height.
	pub fn add_checkpoint(&self, height: u64, hash: Hash32) {
		self.inner.lock().checkpoints.insert(height, hash);
	}

	/// Number of headers currently held as weak (non-candidate) branches.
	pub fn tree_len(&self) -> usize {
		self.inner.lock().tree.len()
	}

	/// Whether the candidate tip is within `currency_window` seconds of
	/// wall-clock.
	pub fn is_current(&self) -> Result<bool, Error> {
		let top = self.archive.get_candidate_top()?;
		let link = match self.archive.to_candidate(top)? {
			Some(l) => l,
			None => return Ok(false),
		};
		let header = self.archive.get_header(link)?;
		let now = SystemTime::now()
			.duration_since(UNIX_EPOCH)
			.map(|d| d.as_secs())
			.unwrap_or(0);
		Ok(now.saturating_sub(u64::from(header.time)) <= u64::from(self.currency_window))
	}

	/// `organize(header)`: the entry point for every inbound header.
	pub fn organize(&self, header: BlockHeader) -> Result<(), Error> {
		self.check_checkpoint(&header)?;

		let top = self.archive.get_candidate_top()?;
		let tip_link = self.archive.to_candidate(top)?;
		let tip_hash = match tip_link {
			Some(l) => self.archive.get_header_key(l)?,
			None => bitnode_core::hash::ZERO_HASH,
		};

		if header.previous == tip_hash {
			self.promote_chain_at(vec![header], top)?;
			return Ok(());
		}

		if let Some(parent_height) = self.find_candidate_height(&header)? {
			let hash = header.hash();
			let promoted = self.promote_chain_at(vec![header.clone()], parent_height)?;
			if !promoted {
				self.inner.lock().tree.insert(hash, Node { header });
			}
			return Ok(());
		}

		let known_parent = self.inner.lock().tree.contains_key(&header.previous);
		if known_parent {
			let hash = header.hash();
			self.inner.lock().tree.insert(hash, Node { header });
			self.try_splice()?;
			return Ok(());
		}

		warn!(
			"header {} has unknown parent, rejecting as orphan",
			header.hash()
		);
		Err(ErrorKind::OrphanHeader.into())
	}

	fn check_checkpoint(&self, header: &BlockHeader) -> Result<(), Error> {
		let inner = self.inner.lock();
		if let Some(expected) = inner.checkpoints.get(&header.height) {
			if *expected != header.hash() {
				return Err(ErrorKind::CheckpointMismatch(header.height).into());
			}
		}
		Ok(())
	}

	/// Finds the candidate-chain height of `header`'s parent, using the
	/// height the sender claims (parent height + 1) rather than scanning:
	/// the candidate chain is contiguous, so the only height a parent can
	/// sit at is `header.height - 1`.
	fn find_candidate_height(&self, header: &BlockHeader) -> Result<Option<u64>, Error> {
		if header.height == 0 {
			return Ok(None);
		}
		let parent_height = header.height - 1;
		let top = self.archive.get_candidate_top()?;
		if parent_height > top {
			return Ok(None);
		}
		match self.archive.to_candidate(parent_height)? {
			Some(link) if self.archive.get_header_key(link)? == header.previous => {
				Ok(Some(parent_height))
			}
			_ => Ok(None),
		}
	}

	/// Attempts to splice any branch in `tree` that now chains down to the
	/// candidate chain, recursing upward through intermediate parents.
	///
	/// A root whose attempted promotion is declined (it doesn't yet beat
	/// the candidate chain's work) stays in `tree` rather than being
	/// dropped -- it may still win once more headers stack onto it. `skip`
	/// tracks such roots for the rest of this call so the loop makes
	/// progress on other roots instead of retrying the same losing branch
	/// forever.
	fn try_splice(&self) -> Result<(), Error> {
		let mut skip: HashSet<Hash32> = HashSet::new();
		loop {
			let candidate = {
				let inner = self.inner.lock();
				inner.tree.iter().find_map(|(hash, node)| {
					if skip.contains(hash) {
						return None;
					}
					if !inner.tree.contains_key(&node.header.previous) {
						Some(*hash)
					} else {
						None
					}
				})
			};
			let root_hash = match candidate {
				Some(h) => h,
				None => return Ok(()),
			};

			// Walk from this root upward collecting the branch as long as
			// it is still rooted in `tree`'s leaves; then check whether
			// its parent is on the candidate chain.
			let header = {
				let inner = self.inner.lock();
				match inner.tree.get(&root_hash) {
					Some(n) => n.header.clone(),
					None => return Ok(()),
				}
			};

			let parent_height = match self.find_candidate_height(&header)? {
				Some(h) => h,
				None => {
					skip.insert(root_hash);
					continue;
				}
			};

			let mut branch = vec![header];
			loop {
				let next_hash = branch.last().unwrap().hash();
				let next = {
					let inner = self.inner.lock();
					inner
						.tree
						.iter()
						.find(|(_, n)| n.header.previous == next_hash)
						.map(|(h, n)| (*h, n.header.clone()))
				};
				match next {
					Some((_, hdr)) => branch.push(hdr),
					None => break,
				}
			}

			let promoted = self.promote_chain_at(branch.clone(), parent_height)?;
			if !promoted {
				skip.insert(root_hash);
				continue;
			}
			let mut inner = self.inner.lock();
			for hdr in &branch {
				inner.tree.remove(&hdr.hash());
			}
			if inner.tree.is_empty() {
				return Ok(());
			}
		}
	}

	fn branch_work(&self, branch: &[BlockHeader]) -> u128 {
		branch.iter().map(|h| Proof::new(h.bits).work()).sum()
	}

	fn candidate_work_above(&self, from_height: u64, count: usize) -> Result<u128, Error> {
		let mut total = 0u128;
		for h in from_height..from_height + count as u64 {
			if let Some(link) = self.archive.to_candidate(h)? {
				let bits = self.archive.get_bits(link)?;
				total += Proof::new(bits).work();
			}
		}
		Ok(total)
	}

	/// Compares `branch`'s work against the candidate chain's work over
	/// the same span above `parent_height`, and if it wins, ingests and
	/// pushes every header in `branch` as the new candidate tip. Returns
	/// whether the branch was promoted; a caller that gets back `false`
	/// is responsible for keeping the branch around for a future attempt.
	fn promote_chain_at(&self, branch: Vec<BlockHeader>, parent_height: u64) -> Result<bool, Error> {
		let top = self.archive.get_candidate_top()?;
		let span = (top.saturating_sub(parent_height)) as usize;
		let branch_work = self.branch_work(&branch);
		let candidate_work = self.candidate_work_above(parent_height + 1, span)?;

		if span > 0 && branch_work <= candidate_work {
			debug!(
				"branch at {} (work {}) does not beat candidate work {}, keeping in tree",
				parent_height, branch_work, candidate_work
			);
			return Ok(false);
		}

		let regressed = parent_height < top;
		if regressed {
			self.archive.truncate_candidate(parent_height)?;
		}
		for header in branch {
			let link = self.archive.ingest_header(header)?;
			self.archive.push_candidate(link)?;
		}

		if regressed {
			info!("candidate chain regressed to height {}", parent_height);
			self.bus
				.notify(EventKind::Regressed, EventValue::Height(parent_height));
		}
		self.bus.notify(
			EventKind::Header,
			EventValue::Height(parent_height + 1),
		);
		Ok(true)
	}
}
