//! Per-height rule context.

/// Rule flags active at a given height. Only the bits the pure `Block`
/// contract cares about are named here; the rest are opaque to this crate.
pub mod flags {
	/// BIP141 segregated witness / witness commitment rules are active.
	pub const BIP141: u32 = 0b0000_0001;
	/// BIP34 height-in-coinbase rule is active.
	pub const BIP34: u32 = 0b0000_0010;
	/// BIP113 median-time-past lock-time rule is active.
	pub const BIP113: u32 = 0b0000_0100;
}

/// Rule flags, height and median-time-past active at a given block,
/// threaded through `accept`/`connect`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
	/// Bitset of active rule flags, see [`flags`].
	pub flags: u32,
	/// Height of the block this context describes.
	pub height: u64,
	/// Median time past at this height, used for time-locked rules.
	pub mtp: u32,
}

impl Context {
	/// Builds a context for a given height with the given flags and mtp.
	pub fn new(height: u64, mtp: u32, flags: u32) -> Context {
		Context { flags, height, mtp }
	}

	/// Whether the given rule flag is active in this context.
	pub fn has(&self, flag: u32) -> bool {
		self.flags & flag != 0
	}
}
