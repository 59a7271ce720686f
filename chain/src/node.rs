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

//! Node Facade: owns the [`Archive`] handle, wires up the chasers and the
//! event bus, and exposes the small set of operations a launcher (or a
//! test) drives the node through.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bitnode_core::BlockHeader;
use bitnode_store::Archive;
use bitnode_util::NodeConfig;
use log::{error, info, warn};

use crate::arena::Arena;
use crate::bus::{Bus, EventKind, EventValue};
use crate::chaser_confirm::ConfirmChaser;
use crate::chaser_header::HeaderChaser;
use crate::chaser_validate::{RuleParams, ValidateChaser};
use crate::error::Error;
use crate::workmap::CheckChaser;

/// A terminal fault code, recorded when [`Node::fault`] is called.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
	/// Human-readable description of what went wrong.
	pub reason: String,
}

/// The node facade. Holds every chaser and the bus that couples them.
pub struct Node {
	archive: Arc<dyn Archive>,
	bus: Arc<Bus>,
	arena: Arc<Arena>,
	header: Arc<HeaderChaser>,
	check: Arc<CheckChaser>,
	validate: Arc<ValidateChaser>,
	confirm: Arc<ConfirmChaser>,
	suspended: AtomicBool,
	closed: AtomicBool,
	fault: parking_lot::Mutex<Option<Fault>>,
}

impl Node {
	/// Builds a node over `archive` using `config`. Chasers are wired to
	/// the same bus but not yet started; call [`Node::start`] to begin
	/// processing.
	pub fn new(archive: Arc<dyn Archive>, config: &NodeConfig) -> Node {
		let bus = Arc::new(Bus::new());
		let arena = Arena::new(config.arena_capacity);
		let header = Arc::new(HeaderChaser::new(
			archive.clone(),
			bus.clone(),
			config.currency_window,
		));
		let check = Arc::new(CheckChaser::new(archive.clone(), bus.clone(), config.inventory));
		let validate = Arc::new(ValidateChaser::new(
			archive.clone(),
			bus.clone(),
			config.bypass_height,
			RuleParams {
				subsidy_interval: 210_000,
				initial_subsidy: 50_0000_0000,
			},
		));
		let confirm = Arc::new(ConfirmChaser::new(archive.clone(), bus.clone(), config.threads));

		{
			let validate = validate.clone();
			bus.subscribe(Box::new(move |event| {
				if event.kind == EventKind::Regressed {
					if let Err(e) = validate.on_regressed(event.value.as_u64()) {
						error!("validate chaser failed handling regressed event: {}", e);
					}
				}
				true
			}));
		}
		{
			let validate = validate.clone();
			bus.subscribe(Box::new(move |event| {
				if event.kind == EventKind::Disorganized {
					if let Err(e) = validate.on_disorganized(event.value.as_u64()) {
						error!("validate chaser failed handling disorganized event: {}", e);
					}
				}
				true
			}));
		}
		{
			let check = check.clone();
			bus.subscribe(Box::new(move |event| {
				if event.kind == EventKind::Header {
					if let Err(e) = check.on_header(event.value.as_u64()) {
						error!("check chaser failed handling header event: {}", e);
					}
				}
				true
			}));
		}

		Node {
			archive,
			bus,
			arena,
			header,
			check,
			validate,
			confirm,
			suspended: AtomicBool::new(false),
			closed: AtomicBool::new(false),
			fault: parking_lot::Mutex::new(None),
		}
	}

	/// The shared event bus, for channels and tests to subscribe to.
	pub fn bus(&self) -> &Arc<Bus> {
		&self.bus
	}

	/// The archive this node is running against.
	pub fn archive(&self) -> &Arc<dyn Archive> {
		&self.archive
	}

	/// The block arena, for building per-block validation scratch.
	pub fn arena(&self) -> &Arc<Arena> {
		&self.arena
	}

	/// The header chaser.
	pub fn header_chaser(&self) -> &Arc<HeaderChaser> {
		&self.header
	}

	/// The check (work-map) chaser.
	pub fn check_chaser(&self) -> &Arc<CheckChaser> {
		&self.check
	}

	/// The validate chaser.
	pub fn validate_chaser(&self) -> &Arc<ValidateChaser> {
		&self.validate
	}

	/// The confirm chaser.
	pub fn confirm_chaser(&self) -> &Arc<ConfirmChaser> {
		&self.confirm
	}

	/// Starts the node: pulls the initial work map and emits `start`.
	pub fn start(&self) -> Result<(), Error> {
		self.check.initialize()?;
		self.bus.notify(EventKind::Start, EventValue::Count(0));
		info!("node started");
		Ok(())
	}

	/// Drives one round of the pipeline: first pumps the bus so any
	/// `regressed`/`disorganized`/`header` event queued by a prior
	/// `organize` call is delivered to its subscriber and rewinds the
	/// validate cursor or rebuilds the work map *before* this round's
	/// work runs against it, then advances validation as far as it'll
	/// go, then lets the confirm chaser catch up, then pumps the bus
	/// again so subscribers observe what this round produced. Callers
	/// loop this (or drive it from their own event loop) as new
	/// headers/blocks arrive.
	pub fn run(&self) -> Result<(), Error> {
		if self.is_suspended() || self.is_closed() {
			return Ok(());
		}
		self.bus.pump();
		self.validate.advance()?;
		let confirmed_top = self.archive.get_top_confirmed()?;
		self.confirm.on_candidate_event(confirmed_top + 1)?;
		self.bus.pump();
		Ok(())
	}

	/// Feeds one header through the header chaser, then drives a round.
	pub fn organize(&self, header: BlockHeader) -> Result<(), Error> {
		self.header.organize(header)?;
		self.run()
	}

	/// Whether the node is suspended.
	pub fn is_suspended(&self) -> bool {
		self.suspended.load(Ordering::SeqCst)
	}

	/// Whether the node has been closed.
	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}

	/// Suspends the node: chasers stop acting on new events but the bus
	/// and all chasers remain alive (`true`, "keep-alive") so `resume`
	/// can pick back up without re-subscribing.
	pub fn suspend(&self) -> bool {
		self.suspended.store(true, Ordering::SeqCst);
		self.bus.notify(EventKind::Suspend, EventValue::Count(0));
		true
	}

	/// Resumes a suspended node.
	pub fn resume(&self) {
		self.suspended.store(false, Ordering::SeqCst);
	}

	/// Records a terminal fault and emits `stop`. The archive is not
	/// further mutated; callers observe `stop` and close.
	pub fn fault(&self, reason: impl Into<String>) {
		let reason = reason.into();
		warn!("node fault: {}", reason);
		*self.fault.lock() = Some(Fault { reason });
		self.closed.store(true, Ordering::SeqCst);
		self.bus.notify(EventKind::Stop, EventValue::Count(0));
	}

	/// The recorded fault, if any.
	pub fn fault_reason(&self) -> Option<Fault> {
		self.fault.lock().clone()
	}

	/// Closes the node gracefully, emitting `stop`.
	pub fn close(&self) {
		self.closed.store(true, Ordering::SeqCst);
		self.bus.notify(EventKind::Stop, EventValue::Count(0));
	}

	/// Invokes `handler` with the current candidate and confirmed tip
	/// heights, for callers that want a lightweight consistency snapshot
	/// without reaching into the archive themselves.
	pub fn snapshot<F>(&self, handler: F) -> Result<(), Error>
	where
		F: FnOnce(u64, u64),
	{
		let candidate_top = self.archive.get_candidate_top()?;
		let confirmed_top = self.archive.get_top_confirmed()?;
		handler(candidate_top, confirmed_top);
		Ok(())
	}

	/// Invokes `handler` with the node's current configuration knobs that
	/// are safe to hot-reload (bypass height propagated to in-flight
	/// channels is the caller's responsibility; this only reports state).
	pub fn reload<F>(&self, handler: F)
	where
		F: FnOnce(bool, bool),
	{
		handler(self.is_suspended(), self.is_closed());
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use bitnode_core::hash::ZERO_HASH;
	use bitnode_core::{Block, Transaction};
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

	#[test]
	fn start_and_run_do_not_error_on_a_fresh_archive() {
		let archive: Arc<dyn Archive> = Arc::new(MemoryArchive::new(genesis()));
		let node = Node::new(archive, &NodeConfig::default());
		node.start().unwrap();
		node.run().unwrap();
	}

	#[test]
	fn fault_closes_the_node_and_emits_stop() {
		let archive: Arc<dyn Archive> = Arc::new(MemoryArchive::new(genesis()));
		let node = Node::new(archive, &NodeConfig::default());
		node.fault("archive integrity failure");
		assert!(node.is_closed());
		assert!(node.fault_reason().is_some());
	}

	#[test]
	fn suspend_then_resume_clears_the_flag() {
		let archive: Arc<dyn Archive> = Arc::new(MemoryArchive::new(genesis()));
		let node = Node::new(archive, &NodeConfig::default());
		assert!(node.suspend());
		assert!(node.is_suspended());
		node.resume();
		assert!(!node.is_suspended());
	}
}
