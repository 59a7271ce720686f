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

//! Core data model shared by every chaser: hashes, opaque archive handles,
//! per-height context, state/result codes and the pure block contract that
//! consensus rules are delegated to.

#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]
#![warn(missing_docs)]

extern crate serde;
#[macro_use]
extern crate serde_derive;

pub mod block;
pub mod codes;
pub mod context;
pub mod hash;
pub mod link;
pub mod work;

pub use crate::block::{Block, BlockHeader, Transaction};
pub use crate::codes::{Code, StateCode};
pub use crate::context::Context;
pub use crate::hash::{Hash32, Hashed};
pub use crate::link::{HLink, TLink};
pub use crate::work::Proof;
