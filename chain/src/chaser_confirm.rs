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

//! Confirm Chaser: fork detection by accumulated work, atomic confirmed-
//! chain reorg, parallel per-transaction confirmability, and rollback.

use std::sync::Arc;

use bitnode_core::{Code, Context, HLink, Proof, StateCode};
use bitnode_store::Archive;
use log::{debug, info, warn};
use parking_lot::Mutex;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::bus::{Bus, EventKind, EventValue};
use crate::error::{Error, ErrorKind};

/// A confirmation attempt in progress: the candidate-chain span above the
/// fork point, ordered top-first (as detected), plus the confirmed
/// entries popped so far to reach the fork point.
#[derive(Default)]
struct Attempt {
	fork_point: u64,
	/// Top-first: `fork[0]` is the highest candidate height in the span.
	fork: Vec<HLink>,
	popped: Vec<HLink>,
}

/// The Confirm Chaser.
pub struct ConfirmChaser {
	archive: Arc<dyn Archive>,
	bus: Arc<Bus>,
	pool: ThreadPool,
	attempt: Mutex<Option<Attempt>>,
}

impl ConfirmChaser {
	/// Builds a Confirm chaser with a `threads`-sized pool dedicated to
	/// parallel per-transaction confirmability checks.
	pub fn new(archive: Arc<dyn Archive>, bus: Arc<Bus>, threads: usize) -> ConfirmChaser {
		let pool = ThreadPoolBuilder::new()
			.num_threads(threads.max(1))
			.build()
			.expect("failed to build confirm-chaser thread pool");
		ConfirmChaser {
			archive,
			bus,
			pool,
			attempt: Mutex::new(None),
		}
	}

	/// Whether a confirmation attempt is currently in progress.
	pub fn is_busy(&self) -> bool {
		self.attempt.lock().is_some()
	}

	/// On `valid(h)` or `blocks(h)`: if no attempt is in progress, begins
	/// one. Permissive and idempotent per the design notes — either event
	/// is treated as a signal to (re-)scan.
	pub fn on_candidate_event(&self, h: u64) -> Result<(), Error> {
		if self.is_busy() {
			return Ok(());
		}
		match self.detect_fork(h)? {
			Some(attempt) => self.run_attempt(attempt),
			None => Ok(()),
		}
	}

	/// Walks down from `h` on the candidate chain, summing work, until a
	/// confirmed ancestor is reached. Returns `None` if the descent hits
	/// the genesis without finding one (candidate chain regressed below
	/// the confirmed chain; caller should treat as aborted).
	fn detect_fork(&self, h: u64) -> Result<Option<Attempt>, Error> {
		let mut fork = Vec::new();
		let mut fork_work: u128 = 0;
		let mut height = h;

		loop {
			let link = match self.archive.to_candidate(height)? {
				Some(l) => l,
				None => return Ok(None),
			};
			if self.archive.is_confirmed_block(link)? {
				let fork_point = height;
				if fork.is_empty() {
					return Ok(None);
				}
				let strong = self.strength_test(fork_point, fork_work)?;
				if !strong {
					debug!(
						"fork at {} (work {}) does not beat confirmed work, no reorg",
						fork_point, fork_work
					);
					return Ok(None);
				}
				return Ok(Some(Attempt {
					fork_point,
					fork,
					popped: Vec::new(),
				}));
			}
			let bits = self.archive.get_bits(link)?;
			fork_work += Proof::new(bits).work();
			fork.push(link);
			if height == 0 {
				return Ok(None);
			}
			height -= 1;
		}
	}

	/// Sums confirmed-chain work from the current confirmed top down to
	/// `fork_point + 1` and compares against `fork_work`. Strong iff
	/// strictly greater; ties favor the confirmed chain.
	fn strength_test(&self, fork_point: u64, fork_work: u128) -> Result<bool, Error> {
		let confirmed_top = self.archive.get_top_confirmed()?;
		let mut confirmed_work: u128 = 0;
		let mut height = confirmed_top;
		while height > fork_point {
			if let Some(link) = self.archive.to_confirmed(height)? {
				let bits = self.archive.get_bits(link)?;
				confirmed_work += Proof::new(bits).work();
			}
			height -= 1;
		}
		Ok(fork_work > confirmed_work)
	}

	fn run_attempt(&self, mut attempt: Attempt) -> Result<(), Error> {
		let confirmed_top = self.archive.get_top_confirmed()?;
		for height in (attempt.fork_point + 1..=confirmed_top).rev() {
			let link = self
				.archive
				.to_confirmed(height)?
				.ok_or_else(|| ErrorKind::Integrity(format!("missing confirmed link at {}", height)))?;
			self.archive.set_unstrong(link)?;
			self.archive.pop_confirmed()?;
			attempt.popped.push(link);
			self.bus
				.notify(EventKind::Reorganized, EventValue::HLink(link));
		}

		*self.attempt.lock() = Some(attempt);
		self.do_organize()
	}

	/// Push phase: walks `fork` bottom-up (i.e. reverse of detection
	/// order), confirming each block in turn.
	fn do_organize(&self) -> Result<(), Error> {
		loop {
			let next = {
				let mut guard = self.attempt.lock();
				let attempt = match guard.as_mut() {
					Some(a) => a,
					None => return Ok(()),
				};
				attempt.fork.pop()
			};
			let link = match next {
				Some(l) => l,
				None => {
					*self.attempt.lock() = None;
					return Ok(());
				}
			};

			let height = self.archive.get_context(link)?.height;
			match self.archive.get_block_state(link)? {
				StateCode::BlockUnconfirmable => {
					warn!("height {}: block is unconfirmable, rolling back", height);
					self.bus
						.notify(EventKind::Unconfirmable, EventValue::HLink(link));
					self.roll_back(link, height)?;
					return Ok(());
				}
				StateCode::BlockConfirmable => {
					self.archive.set_strong(link)?;
					self.archive.push_confirmed(link)?;
					self.bus
						.notify(EventKind::Confirmable, EventValue::Height(height));
					continue;
				}
				_ => {}
			}

			let milestone = self.archive.is_milestone(link)?;
			if milestone {
				self.archive.set_strong(link)?;
				self.archive.set_block_confirmable(link, 0)?;
				self.archive.push_confirmed(link)?;
				self.bus
					.notify(EventKind::Confirmable, EventValue::Height(height));
				continue;
			}

			match self.confirm_transactions(link, height)? {
				Some(fees) => {
					self.archive.set_strong(link)?;
					self.archive.set_block_confirmable(link, fees)?;
					self.archive.push_confirmed(link)?;
					self.bus
						.notify(EventKind::Confirmable, EventValue::Height(height));
				}
				None => {
					self.archive.set_block_unconfirmable(link)?;
					self.bus
						.notify(EventKind::Unconfirmable, EventValue::HLink(link));
					self.roll_back(link, height)?;
					return Ok(());
				}
			}
		}
	}

	/// Parallel per-transaction confirmability. Checks the coinbase's
	/// unspent-duplicate rule serially first (failure there fails the
	/// whole block without touching the pool); dispatches every remaining
	/// transaction to the shared pool and races to the first failure.
	/// Returns `Some(fees)` on success, `None` on (non-integrity) failure.
	fn confirm_transactions(&self, link: HLink, height: u64) -> Result<Option<u64>, Error> {
		let ctx = self.archive.get_context(link)?;
		let txs = self.archive.to_transactions(link)?;
		if txs.is_empty() {
			return Err(ErrorKind::Integrity(format!("block {} has no transactions", link)).into());
		}

		let coinbase = txs[0];
		match self.archive.unspent_duplicates(coinbase, ctx)? {
			Code::Ok => {}
			code if code.is_integrity() => {
				return Err(ErrorKind::Integrity(format!(
					"archive integrity failure checking coinbase duplicates: {:?}",
					code
				))
				.into());
			}
			code => {
				warn!("height {}: coinbase duplicate-unspent check failed: {:?}", height, code);
				return Ok(None);
			}
		}

		if txs.len() == 1 {
			return Ok(Some(0));
		}

		let archive = self.archive.clone();
		let rest = &txs[1..];
		let outcome = self.pool.install(|| {
			use rayon::prelude::*;
			rest.par_iter()
				.map(|tx| archive.tx_confirmable(*tx, ctx))
				.find_any(|result| match result {
					Ok(code) => !code.is_ok(),
					Err(_) => true,
				})
		});

		match outcome {
			None => Ok(Some(0)),
			Some(Err(store_err)) => Err(store_err.into()),
			Some(Ok(code)) if code.is_integrity() => {
				warn!("height {}: tx confirmability archive integrity failure", height);
				Err(ErrorKind::Integrity(format!("{:?}", code)).into())
			}
			Some(Ok(code)) => {
				warn!("height {}: a transaction failed confirmability: {:?}", height, code);
				debug!("height {}: only the first failing transaction is reported; remaining errors this round are suppressed", height);
				Ok(None)
			}
		}
	}

	/// Rolls back a failed confirmation attempt: unstrongs the just-pushed
	/// (but unconfirmed) block, pops and un-strongs everything down to the
	/// fork point, then re-pushes `popped` in reverse to restore the
	/// pre-attempt confirmed chain. Clears the attempt.
	fn roll_back(&self, link: HLink, top: u64) -> Result<(), Error> {
		self.archive.set_unstrong(link)?;

		let (fork_point, popped) = {
			let mut guard = self.attempt.lock();
			let attempt = guard
				.take()
				.ok_or_else(|| ErrorKind::Integrity("roll_back called with no attempt".into()))?;
			(attempt.fork_point, attempt.popped)
		};

		let mut height = top;
		while height > fork_point {
			if let Some(confirmed_link) = self.archive.to_confirmed(height)? {
				self.archive.set_unstrong(confirmed_link)?;
				self.archive.pop_confirmed()?;
				self.bus
					.notify(EventKind::Reorganized, EventValue::HLink(confirmed_link));
			}
			height -= 1;
		}

		for popped_link in popped.into_iter().rev() {
			self.archive.set_strong(popped_link)?;
			self.archive.push_confirmed(popped_link)?;
			self.bus
				.notify(EventKind::Organized, EventValue::HLink(popped_link));
		}

		self.bus
			.notify(EventKind::Disorganized, EventValue::Height(fork_point));
		info!("rollback complete, confirmed chain restored to pre-attempt state");
		Ok(())
	}

	/// Stall prevention: re-enters the push phase if the next candidate is
	/// already valid/confirmable but a fresh `valid` event hasn't arrived
	/// to trigger it.
	pub fn nudge(&self) -> Result<(), Error> {
		if self.is_busy() {
			return self.do_organize();
		}
		let confirmed_top = self.archive.get_top_confirmed()?;
		self.on_candidate_event(confirmed_top + 1)
	}
}
