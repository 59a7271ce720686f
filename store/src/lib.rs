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

//! The `Archive` boundary: headers, blocks, transactions and the
//! candidate/confirmed chain indices, as the candidate-chain core needs to
//! see them. On-disk storage itself is out of scope; see [`memory`] for the
//! in-memory stand-in used by tests.

#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]
#![warn(missing_docs)]

pub mod archive;
pub mod error;
pub mod memory;

pub use crate::archive::{Archive, Item};
pub use crate::error::Error;
pub use crate::memory::MemoryArchive;
