//! Error type for the archive boundary.

use std::fmt;

/// Errors an [`Archive`](crate::Archive) implementation can return.
///
/// Kept deliberately small: the candidate-chain core classifies every
/// failure crossing this boundary as an [integrity
/// failure](crate) and escalates to `fault`, so there is no need for a rich
/// error hierarchy here the way there is in `bitnode_chain`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
	/// The requested link, height or hash is not known to the archive.
	NotFound,
	/// The archive detected an inconsistency in its own bookkeeping.
	Integrity(String),
}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			Error::NotFound => write!(f, "not found"),
			Error::Integrity(msg) => write!(f, "archive integrity error: {}", msg),
		}
	}
}

impl std::error::Error for Error {}
