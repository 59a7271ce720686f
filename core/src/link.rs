//! Opaque archive handles.
//!
//! An `HLink`/`TLink` is assigned by the archive at ingestion time and is
//! stable for the life of the process. Chasers never interpret the value,
//! they only pass it back to the archive.

use std::fmt;

/// Opaque handle to a header/block known to the archive.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HLink(pub u32);

/// Opaque handle to a transaction known to the archive.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TLink(pub u32);

impl fmt::Display for HLink {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "h#{}", self.0)
	}
}

impl fmt::Display for TLink {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "t#{}", self.0)
	}
}

impl From<u32> for HLink {
	fn from(v: u32) -> HLink {
		HLink(v)
	}
}

impl From<u32> for TLink {
	fn from(v: u32) -> TLink {
		TLink(v)
	}
}
