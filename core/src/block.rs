//! The pure block contract.
//!
//! Consensus rules themselves are out of scope for this crate: `check`,
//! `accept` and `connect` below are intentionally simplified stand-ins for
//! rules a real node would implement (script interpreter, UTXO set lookups,
//! subsidy schedule). What matters for the chasers is the *shape* of the
//! contract — three pure functions returning a [`Code`], called in a fixed
//! order, plus the two malleation classes callers must distinguish.

use crate::codes::Code;
use crate::context::{flags, Context};
use crate::hash::{Hash32, Hashed};

/// A block header, the unit the header chaser reasons about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
	/// Hash of the parent header.
	pub previous: Hash32,
	/// Height of this header, i.e. parent height + 1.
	pub height: u64,
	/// Wall-clock time claimed by the miner.
	pub time: u32,
	/// Compact proof-of-work target.
	pub bits: u32,
	/// Proof-of-work nonce.
	pub nonce: u32,
	/// Merkle root over the block's transactions (legacy, non-witness).
	pub merkle_root: Hash32,
	/// Witness commitment found in the coinbase output, if any (BIP141).
	pub witness_commitment: Option<Hash32>,
}

impl Hashed for BlockHeader {
	fn bytes(&self) -> Vec<u8> {
		let mut out = Vec::with_capacity(32 + 8 + 4 + 4 + 4 + 32);
		out.extend_from_slice(self.previous.as_bytes());
		out.extend_from_slice(&self.height.to_be_bytes());
		out.extend_from_slice(&self.time.to_be_bytes());
		out.extend_from_slice(&self.bits.to_be_bytes());
		out.extend_from_slice(&self.nonce.to_be_bytes());
		out.extend_from_slice(self.merkle_root.as_bytes());
		out
	}
}

/// A transaction, opaque beyond what the pure contract needs to reason
/// about: its identity, whether it's the coinbase, and its two merkle
/// leaves (legacy and witness).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
	/// Legacy (non-witness) transaction id, used for the header merkle root.
	pub txid: Hash32,
	/// Witness transaction id, used for the witness commitment (equal to
	/// `txid` for the coinbase and for pre-segwit transactions).
	pub wtxid: Hash32,
	/// Whether this is the block's coinbase (must be `txs[0]`).
	pub is_coinbase: bool,
}

/// A full block: header plus transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
	/// The block header.
	pub header: BlockHeader,
	/// Transactions, coinbase first.
	pub txs: Vec<Transaction>,
}

impl Hashed for Block {
	fn bytes(&self) -> Vec<u8> {
		self.header.bytes()
	}
}

impl Block {
	/// Structural, merkle and malleation32 checks. Full depth when
	/// `bypass` is false; `bypass` skips the expensive re-walk of the
	/// merkle tree mutation check (still recomputes the root itself).
	pub fn check(&self, bypass: bool) -> Code {
		if self.txs.is_empty() || !self.txs[0].is_coinbase {
			return Code::Malformed("missing coinbase".into());
		}
		let leaves: Vec<Hash32> = self.txs.iter().map(|t| t.txid).collect();
		let (root, mutated) = merkle_root(&leaves);
		if !bypass && mutated {
			return Code::Malleated32;
		}
		if root != self.header.merkle_root {
			return Code::BadMerkleRoot;
		}
		Code::Ok
	}

	/// Witness commitment check (BIP141), only meaningful when `BIP141` is
	/// active in `ctx`. Detects the malleated64 class: the witness merkle
	/// root no longer matches the committed value even though the legacy
	/// merkle root (and therefore the block hash) is untouched.
	pub fn check_commitment(&self, ctx: &Context, bypass: bool) -> Code {
		if !ctx.has(flags::BIP141) {
			return Code::Ok;
		}
		let commitment = match self.header.witness_commitment {
			Some(c) => c,
			None => return Code::Ok,
		};
		if bypass {
			return Code::Ok;
		}
		let leaves: Vec<Hash32> = self.txs.iter().map(|t| t.wtxid).collect();
		let (root, _) = merkle_root(&leaves);
		if root != commitment {
			return Code::Malleated64;
		}
		Code::Ok
	}

	/// Whether this in-memory block is a malleated64 instance: same header
	/// hash (hence same `merkle_root`) as something already known, but a
	/// witness layout that fails the commitment check.
	pub fn is_malleated64(&self, ctx: &Context) -> bool {
		self.check_commitment(ctx, false) == Code::Malleated64
	}

	/// Consensus-level acceptance: height continuity, subsidy, coinbase
	/// maturity rules. Simplified to height/time checks, which is enough
	/// to exercise the chaser control flow this crate is responsible for.
	pub fn accept(&self, ctx: &Context, _subsidy_interval: u64, _initial_subsidy: u64) -> Code {
		if self.header.height != ctx.height {
			return Code::BadHeight;
		}
		if ctx.has(flags::BIP113) && self.header.time <= ctx.mtp {
			return Code::TimeTooOld;
		}
		Code::Ok
	}

	/// Script execution / spend-time rules. Real connect would walk every
	/// input against the UTXO set; that set lives in the archive and is
	/// out of scope here, so this is a structural no-op beyond what
	/// `accept` already checked.
	pub fn connect(&self, _ctx: &Context) -> Code {
		Code::Ok
	}
}

/// Computes a merkle root the way Bitcoin Core does, including the
/// CVE-2012-2459 duplicate-subtree detection: whenever a level has an odd
/// count and the last node is carried forward by duplicating itself, and
/// that duplicated pair match a sibling pair elsewhere, the tree is
/// considered "mutated" — malleable without changing the root.
pub fn merkle_root(leaves: &[Hash32]) -> (Hash32, bool) {
	if leaves.is_empty() {
		return (crate::hash::ZERO_HASH, false);
	}
	let mut level = leaves.to_vec();
	let mut mutated = false;
	while level.len() > 1 {
		if level.len() % 2 == 1 {
			let last = *level.last().unwrap();
			level.push(last);
		}
		let mut next = Vec::with_capacity(level.len() / 2);
		for pair in level.chunks(2) {
			if pair[0] == pair[1] {
				mutated = true;
			}
			next.push(pair[0].chain(&pair[1]));
		}
		level = next;
	}
	(level[0], mutated)
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::hash::double_sha256;

	fn leaf(b: u8) -> Hash32 {
		double_sha256(&[b])
	}

	#[test]
	fn odd_leaf_count_duplicates_last() {
		let (root_three, mutated_three) = merkle_root(&[leaf(1), leaf(2), leaf(3)]);
		let (root_four, _) = merkle_root(&[leaf(1), leaf(2), leaf(3), leaf(3)]);
		assert_eq!(root_three, root_four);
		assert!(mutated_three);
	}

	#[test]
	fn even_leaf_count_is_not_mutated() {
		let (_, mutated) = merkle_root(&[leaf(1), leaf(2), leaf(3), leaf(4)]);
		assert!(!mutated);
	}

	#[test]
	fn check_rejects_bad_merkle_root() {
		let header = BlockHeader {
			previous: crate::hash::ZERO_HASH,
			height: 1,
			time: 0,
			bits: 0x1d00_ffff,
			nonce: 0,
			merkle_root: crate::hash::ZERO_HASH,
			witness_commitment: None,
		};
		let block = Block {
			header,
			txs: vec![Transaction {
				txid: leaf(1),
				wtxid: leaf(1),
				is_coinbase: true,
			}],
		};
		assert_eq!(block.check(false), Code::BadMerkleRoot);
	}
}
