//! The narrow interface the candidate-chain core is written against.
//!
//! Everything on-disk — indices, the UTXO set, compaction — is explicitly
//! out of scope; this trait is the seam. A production implementation would
//! back it with a real KV store the way `grin_store` backs `ChainStore`;
//! this crate ships only [`memory::MemoryArchive`] for tests.

use bitnode_core::{Block, BlockHeader, Code, Context, HLink, Hash32, StateCode, TLink, Transaction};

use crate::error::Error;

/// A single download unit: a candidate header above the download frontier
/// that doesn't yet have its transactions stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
	/// Header hash, used to match inbound blocks to outstanding work.
	pub hash: Hash32,
	/// Archive handle for the associated header.
	pub link: HLink,
	/// Rule context active at this item's height.
	pub context: Context,
}

/// The archive: persistent storage for headers, blocks, transactions and
/// the candidate/confirmed chain indices. See §6.2 of the specification
/// for the canonical operation list; a handful of header-ingestion
/// operations are added here because promoting a branch to candidate has
/// to go somewhere, and the narrowed interface otherwise assumes it
/// already happened.
pub trait Archive: Send + Sync {
	// -- reads --------------------------------------------------------

	/// Height of the fork point between candidate and confirmed chains.
	fn get_fork(&self) -> Result<u64, Error>;
	/// Height of the confirmed chain tip.
	fn get_top_confirmed(&self) -> Result<u64, Error>;
	/// Height of the candidate chain tip.
	fn get_candidate_top(&self) -> Result<u64, Error>;
	/// Candidate-chain link at the given height, if any.
	fn to_candidate(&self, height: u64) -> Result<Option<HLink>, Error>;
	/// Confirmed-chain link at the given height, if any.
	fn to_confirmed(&self, height: u64) -> Result<Option<HLink>, Error>;
	/// Header hash for a link.
	fn get_header_key(&self, link: HLink) -> Result<Hash32, Error>;
	/// The full header for a link.
	fn get_header(&self, link: HLink) -> Result<BlockHeader, Error>;
	/// Whether transactions have been stored for this link.
	fn is_associated(&self, link: HLink) -> Result<bool, Error>;
	/// Whether this link is on the confirmed chain.
	fn is_confirmed_block(&self, link: HLink) -> Result<bool, Error>;
	/// Compact proof-of-work bits for a link's header.
	fn get_bits(&self, link: HLink) -> Result<u32, Error>;
	/// Rule context (flags/height/mtp) active for a link.
	fn get_context(&self, link: HLink) -> Result<Context, Error>;
	/// The stored block, if its transactions have been associated.
	fn get_block(&self, link: HLink) -> Result<Option<Block>, Error>;
	/// Archive-reported validation state for a link.
	fn get_block_state(&self, link: HLink) -> Result<StateCode, Error>;
	/// Up to `count` unassociated candidate items above `height`.
	fn get_unassociated_above(&self, height: u64, count: usize) -> Result<Vec<Item>, Error>;
	/// Transaction links stored for a block, coinbase first.
	fn to_transactions(&self, link: HLink) -> Result<Vec<TLink>, Error>;
	/// Transaction hash for a link.
	fn get_tx_key(&self, link: TLink) -> Result<Hash32, Error>;
	/// Populates prevout/context scratch so `accept`/`connect` can run;
	/// returns `false` when a previous output could not be found.
	fn populate(&self, block: &Block) -> Result<bool, Error>;
	/// Whether this link sits at a well-known checkpoint/milestone height.
	fn is_milestone(&self, link: HLink) -> Result<bool, Error>;
	/// Whether a live block is a malleated64 instance of a link we already
	/// know about.
	fn is_malleated64(&self, block: &Block) -> Result<bool, Error>;
	/// Whether the archived block at this link is known to be malleable
	/// (set when it was stored).
	fn is_malleable(&self, link: HLink) -> Result<bool, Error>;
	/// Coinbase-unspent-duplicate check for a transaction.
	fn unspent_duplicates(&self, tx: TLink, ctx: Context) -> Result<Code, Error>;
	/// Per-transaction confirmability check.
	fn tx_confirmable(&self, tx: TLink, ctx: Context) -> Result<Code, Error>;
	/// Whether neutrino (BIP157) filters are enabled for this archive.
	fn neutrino_enabled(&self) -> bool;
	/// The rolling filter-header digest at a link.
	fn get_filter_head(&self, link: HLink) -> Result<Hash32, Error>;

	// -- writes ---------------------------------------------------------

	/// Persists a block's transactions, running `Block::check` first.
	fn store_txs(
		&self,
		link: HLink,
		txs: &[Transaction],
		size: u64,
		bypass: bool,
	) -> Result<Code, Error>;
	/// Marks a link as having passed `accept`+`connect`.
	fn set_block_valid(&self, link: HLink) -> Result<(), Error>;
	/// Marks a link confirmable with the given collected fees.
	fn set_block_confirmable(&self, link: HLink, fees: u64) -> Result<(), Error>;
	/// Marks a link as permanently unconfirmable.
	fn set_block_unconfirmable(&self, link: HLink) -> Result<(), Error>;
	/// Marks a link's transactions as connected (spent-set applied).
	fn set_txs_connected(&self, link: HLink) -> Result<(), Error>;
	/// Marks a link as provisionally strong (pushed but not yet confirmed).
	fn set_strong(&self, link: HLink) -> Result<(), Error>;
	/// Clears the provisional-strong mark.
	fn set_unstrong(&self, link: HLink) -> Result<(), Error>;
	/// Appends a link to the confirmed chain.
	fn push_confirmed(&self, link: HLink) -> Result<(), Error>;
	/// Pops the confirmed-chain tip, returning the link that was removed.
	fn pop_confirmed(&self) -> Result<Option<HLink>, Error>;
	/// Records the chained neutrino filter for a link.
	fn set_filter(&self, link: HLink, head: Hash32, body: Hash32) -> Result<(), Error>;

	// -- header ingestion -------------------------------------------------

	/// Assigns a link to a header without touching the candidate index.
	/// Used by the header chaser while a branch is still weak.
	fn ingest_header(&self, header: BlockHeader) -> Result<HLink, Error>;
	/// Extends the candidate chain by one height with an already-ingested
	/// header link.
	fn push_candidate(&self, link: HLink) -> Result<(), Error>;
	/// Truncates the candidate chain back to `height`, dropping everything
	/// above (used when a stronger branch forks below the current tip).
	fn truncate_candidate(&self, height: u64) -> Result<(), Error>;
}
