//! Result and state codes returned across the archive/block boundary.

/// Archive-visible state of a block, as reported by `get_block_state`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateCode {
	/// Header known but transactions not yet stored.
	Unassociated,
	/// Transactions stored but not yet validated.
	Unvalidated,
	/// Passed `accept`/`connect`, filter chained.
	BlockValid,
	/// Passed per-tx confirmability and is on the confirmed chain.
	BlockConfirmable,
	/// Failed a non-malleable rule; will never be retried.
	BlockUnconfirmable,
	/// The archive has no opinion (used for defensive matches).
	UnknownState,
	/// The archive reported an internal inconsistency.
	Integrity,
}

/// Result of running a pure block-level check (`check`/`accept`/`connect`)
/// or a per-transaction confirmability check.
///
/// The concrete consensus rules are out of scope for this crate (see the
/// [purpose & scope](crate) notes); this enum exists so chasers can branch
/// on *classes* of failure without knowing the rule that produced them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Code {
	/// Check passed.
	Ok,
	/// Two distinct transaction orderings hash to the same merkle root
	/// (CVE-2012-2459 style duplicate-subtree ambiguity).
	Malleated32,
	/// Witness data was substituted in a way that preserves the block hash
	/// but changes transaction-commitment semantics.
	Malleated64,
	/// Structural parse/size/encoding failure.
	Malformed(String),
	/// Computed merkle root doesn't match the header.
	BadMerkleRoot,
	/// Witness commitment is missing or doesn't match (BIP141).
	BadWitnessCommitment,
	/// Proof of work doesn't meet the target.
	BadProofOfWork,
	/// Coinbase transaction violates height/subsidy rules.
	BadCoinbase,
	/// Block height doesn't follow its parent.
	BadHeight,
	/// Block timestamp is not greater than the median-time-past.
	TimeTooOld,
	/// Block timestamp is too far in the future.
	TimeTooNew,
	/// Cumulative work/hash target rule failed.
	HighHash,
	/// A transaction failed structural or semantic checks.
	BadTransaction(String),
	/// An input spends an already-spent output.
	DoubleSpend,
	/// Script execution failed.
	ScriptError(String),
	/// Outputs exceed inputs plus subsidy.
	InvalidAmount,
	/// Spend of a coinbase output before maturity.
	ImmatureCoinbase,
	/// An output commitment already exists (should be unique).
	DuplicateUnspent,
	/// The archive reported an internal inconsistency while answering this
	/// query; always escalates to `fault`.
	Integrity(String),
}

impl Code {
	/// Whether this code represents success.
	pub fn is_ok(&self) -> bool {
		matches!(self, Code::Ok)
	}

	/// Whether this failure is one of the two malleation classes, in which
	/// case the block must not be marked unconfirmable (redownload may
	/// recover it).
	pub fn is_malleable(&self) -> bool {
		matches!(self, Code::Malleated32 | Code::Malleated64)
	}

	/// Whether this failure is an archive-reported integrity violation,
	/// which escalates to `fault` rather than being treated as bad data.
	pub fn is_integrity(&self) -> bool {
		matches!(self, Code::Integrity(_))
	}
}
