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

//! Error types for the candidate-chain core.
//!
//! Three classes, matching the error-handling design: protocol/consensus
//! (bad data, never the chaser's fault to retry), resource/performance
//! (recoverable by redistributing work), and integrity (escalates to
//! `fault`). [`ErrorKind::is_bad_data`] lets callers decide whether to
//! log-and-continue or tear the node down.

use std::fmt::{self, Display};

use failure::{Backtrace, Context, Fail};

use bitnode_store::Error as StoreError;

/// Opaque chain error, wrapping a [`failure::Context<ErrorKind>`].
#[derive(Debug, Fail)]
pub struct Error {
	inner: Context<ErrorKind>,
}

/// Chain error definitions.
#[derive(Clone, Eq, PartialEq, Debug, Fail)]
pub enum ErrorKind {
	/// A header's parent is not on the candidate chain and not in the
	/// proposed-header tree.
	#[fail(display = "Orphan header")]
	OrphanHeader,
	/// A checkpoint/milestone height didn't match the expected hash.
	#[fail(display = "Checkpoint mismatch at height {}", _0)]
	CheckpointMismatch(u64),
	/// A block claimed to extend a link the archive has no header for.
	#[fail(display = "Unknown link: {}", _0)]
	UnknownLink(u32),
	/// `Block::check`/`accept`/`connect` failed with a non-malleable code.
	#[fail(display = "Block check failed: {}", _0)]
	InvalidBlock(String),
	/// Block is malleated32 (duplicate-tx merkle ambiguity).
	#[fail(display = "Malleated block (duplicate-tx merkle ambiguity)")]
	MalleatedBlock,
	/// A previous output referenced by the block could not be populated.
	#[fail(display = "Missing previous output")]
	MissingPreviousOutput,
	/// A peer channel's outstanding map was sacrificed to relieve another
	/// channel (split/stall/purge).
	#[fail(display = "Sacrificed channel")]
	SacrificedChannel,
	/// An arena allocation exceeded the arena's total capacity.
	#[fail(display = "Allocation of {} bytes exceeds arena capacity", _0)]
	AllocationTooLarge(usize),
	/// The archive reported an inconsistency in its own bookkeeping.
	#[fail(display = "Archive integrity error: {}", _0)]
	StoreErr(StoreError),
	/// Catch-all for conditions that indicate a programming error rather
	/// than bad peer data (always escalates to `fault`).
	#[fail(display = "Integrity error: {}", _0)]
	Integrity(String),
}

impl Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		Display::fmt(&self.inner, f)
	}
}

impl Error {
	/// The underlying error kind.
	pub fn kind(&self) -> ErrorKind {
		self.inner.get_context().clone()
	}

	/// The wrapped cause, if any.
	pub fn cause(&self) -> Option<&dyn Fail> {
		self.inner.cause()
	}

	/// The captured backtrace, if any.
	pub fn backtrace(&self) -> Option<&Backtrace> {
		self.inner.backtrace()
	}

	/// Whether this error is the block/header's fault (protocol/consensus,
	/// §7 class 1) as opposed to a resource condition or an integrity
	/// failure that must escalate.
	pub fn is_bad_data(&self) -> bool {
		match self.kind() {
			ErrorKind::OrphanHeader
			| ErrorKind::CheckpointMismatch(_)
			| ErrorKind::InvalidBlock(_)
			| ErrorKind::MissingPreviousOutput => true,
			ErrorKind::MalleatedBlock => true,
			_ => false,
		}
	}

	/// Whether this error must escalate to `fault` rather than being
	/// handled by the issuing chaser (§7 class 3).
	pub fn is_integrity(&self) -> bool {
		matches!(
			self.kind(),
			ErrorKind::UnknownLink(_) | ErrorKind::StoreErr(_) | ErrorKind::Integrity(_)
		)
	}
}

impl From<ErrorKind> for Error {
	fn from(kind: ErrorKind) -> Error {
		Error {
			inner: Context::new(kind),
		}
	}
}

impl From<Context<ErrorKind>> for Error {
	fn from(inner: Context<ErrorKind>) -> Error {
		Error { inner }
	}
}

impl From<StoreError> for Error {
	fn from(error: StoreError) -> Error {
		Error {
			inner: Context::new(ErrorKind::StoreErr(error)),
		}
	}
}
