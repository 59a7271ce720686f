//! In-memory reference implementation of [`Archive`].
//!
//! Exists so the chasers (and their tests) have something to run against
//! without a real storage engine. Not tuned for concurrent access beyond
//! what correctness requires — a single `Mutex` guards everything.

use std::collections::{HashMap, HashSet};

use log::debug;
use parking_lot::Mutex;

use bitnode_core::block::merkle_root;
use bitnode_core::context::flags;
use bitnode_core::{Block, BlockHeader, Code, Context, HLink, Hash32, StateCode, TLink, Transaction};

use crate::archive::{Archive, Item};
use crate::error::Error;

struct Inner {
	next_hlink: u32,
	next_tlink: u32,

	headers: HashMap<HLink, BlockHeader>,
	hash_to_link: HashMap<Hash32, HLink>,

	candidate: Vec<HLink>,
	confirmed: Vec<HLink>,

	blocks: HashMap<HLink, Block>,
	tx_owner: HashMap<TLink, (HLink, usize)>,
	tx_by_block: HashMap<HLink, Vec<TLink>>,

	state: HashMap<HLink, StateCode>,
	strong: HashSet<HLink>,
	malleable: HashSet<HLink>,
	filters: HashMap<HLink, (Hash32, Hash32)>,

	/// Transactions tests have asked to behave as unconfirmable.
	forced_failures: HashSet<Hash32>,
	/// Transactions tests have asked to behave as duplicate-unspent.
	forced_duplicates: HashSet<Hash32>,
}

/// An in-memory [`Archive`]. Construct with [`MemoryArchive::new`], seeding
/// the genesis block at height zero on both chains.
pub struct MemoryArchive {
	inner: Mutex<Inner>,
	milestones: HashSet<u64>,
	neutrino_enabled: bool,
}

impl MemoryArchive {
	/// Builds a fresh archive with `genesis` confirmed at height zero.
	pub fn new(genesis: Block) -> MemoryArchive {
		let hash = genesis_hash(&genesis);
		let mut headers = HashMap::new();
		let mut hash_to_link = HashMap::new();
		let mut blocks = HashMap::new();
		let mut tx_by_block = HashMap::new();
		let mut tx_owner = HashMap::new();
		let mut state = HashMap::new();

		let link = HLink(0);
		headers.insert(link, genesis.header.clone());
		hash_to_link.insert(hash, link);
		let mut tlinks = Vec::new();
		for (i, _tx) in genesis.txs.iter().enumerate() {
			let tlink = TLink(i as u32);
			tx_owner.insert(tlink, (link, i));
			tlinks.push(tlink);
		}
		tx_by_block.insert(link, tlinks);
		blocks.insert(link, genesis);
		state.insert(link, StateCode::BlockConfirmable);

		MemoryArchive {
			inner: Mutex::new(Inner {
				next_hlink: 1,
				next_tlink: 1,
				headers,
				hash_to_link,
				candidate: vec![link],
				confirmed: vec![link],
				blocks,
				tx_owner,
				tx_by_block,
				state,
				strong: HashSet::new(),
				malleable: HashSet::new(),
				filters: HashMap::new(),
				forced_failures: HashSet::new(),
				forced_duplicates: HashSet::new(),
			}),
			milestones: HashSet::new(),
			neutrino_enabled: true,
		}
	}

	/// Declares a height a milestone (forces bypass validation/confirmation).
	pub fn add_milestone(&mut self, height: u64) {
		self.milestones.insert(height);
	}

	/// Forces future `tx_confirmable` calls for this txid to fail.
	pub fn force_tx_failure(&self, txid: Hash32) {
		self.inner.lock().forced_failures.insert(txid);
	}

	/// Forces future `unspent_duplicates` calls for this txid to fail.
	pub fn force_duplicate(&self, txid: Hash32) {
		self.inner.lock().forced_duplicates.insert(txid);
	}
}

fn genesis_hash(genesis: &Block) -> Hash32 {
	use bitnode_core::Hashed;
	genesis.header.hash()
}

impl Archive for MemoryArchive {
	fn get_fork(&self) -> Result<u64, Error> {
		let inner = self.inner.lock();
		Ok((inner.confirmed.len() as u64).saturating_sub(1))
	}

	fn get_top_confirmed(&self) -> Result<u64, Error> {
		let inner = self.inner.lock();
		Ok((inner.confirmed.len() as u64).saturating_sub(1))
	}

	fn get_candidate_top(&self) -> Result<u64, Error> {
		let inner = self.inner.lock();
		Ok((inner.candidate.len() as u64).saturating_sub(1))
	}

	fn to_candidate(&self, height: u64) -> Result<Option<HLink>, Error> {
		let inner = self.inner.lock();
		Ok(inner.candidate.get(height as usize).copied())
	}

	fn to_confirmed(&self, height: u64) -> Result<Option<HLink>, Error> {
		let inner = self.inner.lock();
		Ok(inner.confirmed.get(height as usize).copied())
	}

	fn get_header_key(&self, link: HLink) -> Result<Hash32, Error> {
		use bitnode_core::Hashed;
		let inner = self.inner.lock();
		inner
			.headers
			.get(&link)
			.map(|h| h.hash())
			.ok_or(Error::NotFound)
	}

	fn get_header(&self, link: HLink) -> Result<BlockHeader, Error> {
		let inner = self.inner.lock();
		inner.headers.get(&link).cloned().ok_or(Error::NotFound)
	}

	fn is_associated(&self, link: HLink) -> Result<bool, Error> {
		let inner = self.inner.lock();
		Ok(inner.blocks.contains_key(&link))
	}

	fn is_confirmed_block(&self, link: HLink) -> Result<bool, Error> {
		let inner = self.inner.lock();
		Ok(inner.confirmed.contains(&link))
	}

	fn get_bits(&self, link: HLink) -> Result<u32, Error> {
		let inner = self.inner.lock();
		inner
			.headers
			.get(&link)
			.map(|h| h.bits)
			.ok_or(Error::NotFound)
	}

	fn get_context(&self, link: HLink) -> Result<Context, Error> {
		let inner = self.inner.lock();
		let header = inner.headers.get(&link).ok_or(Error::NotFound)?;
		let mtp = if header.height == 0 {
			0
		} else {
			inner
				.candidate
				.get((header.height - 1) as usize)
				.and_then(|l| inner.headers.get(l))
				.map(|h| h.time)
				.unwrap_or(0)
		};
		Ok(Context::new(
			header.height,
			mtp,
			flags::BIP141 | flags::BIP34 | flags::BIP113,
		))
	}

	fn get_block(&self, link: HLink) -> Result<Option<Block>, Error> {
		let inner = self.inner.lock();
		Ok(inner.blocks.get(&link).cloned())
	}

	fn get_block_state(&self, link: HLink) -> Result<StateCode, Error> {
		let inner = self.inner.lock();
		Ok(inner
			.state
			.get(&link)
			.copied()
			.unwrap_or(StateCode::Unassociated))
	}

	fn get_unassociated_above(&self, height: u64, count: usize) -> Result<Vec<Item>, Error> {
		let inner = self.inner.lock();
		let mut items = Vec::new();
		let start = height as usize + 1;
		for h in start..inner.candidate.len() {
			let link = inner.candidate[h];
			if inner.blocks.contains_key(&link) {
				continue;
			}
			let header = inner.headers.get(&link).ok_or(Error::Integrity(
				"candidate link missing header".to_string(),
			))?;
			let mtp = if h == 0 {
				0
			} else {
				inner
					.headers
					.get(&inner.candidate[h - 1])
					.map(|p| p.time)
					.unwrap_or(0)
			};
			items.push(Item {
				hash: {
					use bitnode_core::Hashed;
					header.hash()
				},
				link,
				context: Context::new(h as u64, mtp, flags::BIP141 | flags::BIP34 | flags::BIP113),
			});
			if items.len() >= count {
				break;
			}
		}
		Ok(items)
	}

	fn to_transactions(&self, link: HLink) -> Result<Vec<TLink>, Error> {
		let inner = self.inner.lock();
		Ok(inner.tx_by_block.get(&link).cloned().unwrap_or_default())
	}

	fn get_tx_key(&self, link: TLink) -> Result<Hash32, Error> {
		let inner = self.inner.lock();
		let (block, idx) = inner.tx_owner.get(&link).ok_or(Error::NotFound)?;
		let block = inner.blocks.get(block).ok_or(Error::NotFound)?;
		Ok(block.txs[*idx].txid)
	}

	fn populate(&self, block: &Block) -> Result<bool, Error> {
		// Prevout population is out of scope (no UTXO set is modeled);
		// every transaction beyond the coinbase is treated as populatable.
		Ok(!block.txs.is_empty())
	}

	fn is_milestone(&self, link: HLink) -> Result<bool, Error> {
		let inner = self.inner.lock();
		let header = inner.headers.get(&link).ok_or(Error::NotFound)?;
		Ok(self.milestones.contains(&header.height))
	}

	fn is_malleated64(&self, block: &Block) -> Result<bool, Error> {
		let ctx = Context::new(block.header.height, 0, flags::BIP141);
		Ok(block.is_malleated64(&ctx))
	}

	fn is_malleable(&self, link: HLink) -> Result<bool, Error> {
		let inner = self.inner.lock();
		Ok(inner.malleable.contains(&link))
	}

	fn unspent_duplicates(&self, tx: TLink, _ctx: Context) -> Result<Code, Error> {
		let txid = self.get_tx_key(tx)?;
		let inner = self.inner.lock();
		if inner.forced_duplicates.contains(&txid) {
			return Ok(Code::DuplicateUnspent);
		}
		Ok(Code::Ok)
	}

	fn tx_confirmable(&self, tx: TLink, _ctx: Context) -> Result<Code, Error> {
		let txid = self.get_tx_key(tx)?;
		let inner = self.inner.lock();
		if inner.forced_failures.contains(&txid) {
			return Ok(Code::DoubleSpend);
		}
		Ok(Code::Ok)
	}

	fn neutrino_enabled(&self) -> bool {
		self.neutrino_enabled
	}

	fn get_filter_head(&self, link: HLink) -> Result<Hash32, Error> {
		let inner = self.inner.lock();
		Ok(inner
			.filters
			.get(&link)
			.map(|(head, _)| *head)
			.unwrap_or(bitnode_core::hash::ZERO_HASH))
	}

	fn store_txs(
		&self,
		link: HLink,
		txs: &[Transaction],
		_size: u64,
		bypass: bool,
	) -> Result<Code, Error> {
		let header = {
			let inner = self.inner.lock();
			inner.headers.get(&link).cloned().ok_or(Error::NotFound)?
		};
		let block = Block {
			header,
			txs: txs.to_vec(),
		};
		let code = block.check(bypass);
		let leaves: Vec<Hash32> = block.txs.iter().map(|t| t.txid).collect();
		let (_, mutated) = merkle_root(&leaves);

		let mut inner = self.inner.lock();
		if mutated {
			inner.malleable.insert(link);
		}
		if !code.is_ok() {
			debug!("store_txs: block {} failed check: {:?}", link, code);
			return Ok(code);
		}

		let mut tlinks = Vec::with_capacity(block.txs.len());
		for (i, _tx) in block.txs.iter().enumerate() {
			let tlink = TLink(inner.next_tlink);
			inner.next_tlink += 1;
			inner.tx_owner.insert(tlink, (link, i));
			tlinks.push(tlink);
		}
		inner.tx_by_block.insert(link, tlinks);
		inner.blocks.insert(link, block);
		inner.state.insert(link, StateCode::Unvalidated);
		Ok(Code::Ok)
	}

	fn set_block_valid(&self, link: HLink) -> Result<(), Error> {
		let mut inner = self.inner.lock();
		inner.state.insert(link, StateCode::BlockValid);
		Ok(())
	}

	fn set_block_confirmable(&self, link: HLink, _fees: u64) -> Result<(), Error> {
		let mut inner = self.inner.lock();
		inner.state.insert(link, StateCode::BlockConfirmable);
		Ok(())
	}

	fn set_block_unconfirmable(&self, link: HLink) -> Result<(), Error> {
		let mut inner = self.inner.lock();
		inner.state.insert(link, StateCode::BlockUnconfirmable);
		Ok(())
	}

	fn set_txs_connected(&self, _link: HLink) -> Result<(), Error> {
		Ok(())
	}

	fn set_strong(&self, link: HLink) -> Result<(), Error> {
		let mut inner = self.inner.lock();
		inner.strong.insert(link);
		Ok(())
	}

	fn set_unstrong(&self, link: HLink) -> Result<(), Error> {
		let mut inner = self.inner.lock();
		inner.strong.remove(&link);
		Ok(())
	}

	fn push_confirmed(&self, link: HLink) -> Result<(), Error> {
		let mut inner = self.inner.lock();
		inner.confirmed.push(link);
		Ok(())
	}

	fn pop_confirmed(&self) -> Result<Option<HLink>, Error> {
		let mut inner = self.inner.lock();
		Ok(inner.confirmed.pop())
	}

	fn set_filter(&self, link: HLink, head: Hash32, body: Hash32) -> Result<(), Error> {
		let mut inner = self.inner.lock();
		inner.filters.insert(link, (head, body));
		Ok(())
	}

	fn ingest_header(&self, header: BlockHeader) -> Result<HLink, Error> {
		use bitnode_core::Hashed;
		let hash = header.hash();
		let mut inner = self.inner.lock();
		if let Some(existing) = inner.hash_to_link.get(&hash) {
			return Ok(*existing);
		}
		let link = HLink(inner.next_hlink);
		inner.next_hlink += 1;
		inner.headers.insert(link, header);
		inner.hash_to_link.insert(hash, link);
		Ok(link)
	}

	fn push_candidate(&self, link: HLink) -> Result<(), Error> {
		let mut inner = self.inner.lock();
		if !inner.headers.contains_key(&link) {
			return Err(Error::Integrity(format!(
				"push_candidate: unknown link {}",
				link
			)));
		}
		inner.candidate.push(link);
		Ok(())
	}

	fn truncate_candidate(&self, height: u64) -> Result<(), Error> {
		let mut inner = self.inner.lock();
		if height as usize + 1 > inner.candidate.len() {
			return Err(Error::Integrity(
				"truncate_candidate: height above current tip".to_string(),
			));
		}
		inner.candidate.truncate(height as usize + 1);
		Ok(())
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use bitnode_core::hash::ZERO_HASH;

	fn genesis_block() -> Block {
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
	fn genesis_is_confirmed_at_height_zero() {
		let archive = MemoryArchive::new(genesis_block());
		assert_eq!(archive.get_top_confirmed().unwrap(), 0);
		assert_eq!(archive.get_candidate_top().unwrap(), 0);
		assert_eq!(
			archive.get_block_state(HLink(0)).unwrap(),
			StateCode::BlockConfirmable
		);
	}

	#[test]
	fn ingest_header_is_idempotent_on_hash() {
		let archive = MemoryArchive::new(genesis_block());
		let header = BlockHeader {
			previous: ZERO_HASH,
			height: 1,
			time: 1,
			bits: 0x1d00_ffff,
			nonce: 1,
			merkle_root: ZERO_HASH,
			witness_commitment: None,
		};
		let a = archive.ingest_header(header.clone()).unwrap();
		let b = archive.ingest_header(header).unwrap();
		assert_eq!(a, b);
	}

	#[test]
	fn truncate_candidate_rejects_height_above_tip() {
		let archive = MemoryArchive::new(genesis_block());
		assert!(archive.truncate_candidate(5).is_err());
	}
}
