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

//! The candidate-chain progression core: the cooperating chasers that
//! drive headers, block download, validation and confirmation from raw
//! peer input to an authoritative confirmed chain, coupled by an event
//! bus. Peer transport, on-disk storage and wire parsing live outside
//! this crate; see [`bitnode_store::Archive`] for the storage seam.

#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]
#![warn(missing_docs)]

#[macro_use]
extern crate failure_derive;

pub mod arena;
pub mod block_in;
pub mod bus;
pub mod chaser_confirm;
pub mod chaser_header;
pub mod chaser_validate;
pub mod error;
pub mod node;
pub mod workmap;

pub use crate::arena::{Arena, Retainer};
pub use crate::block_in::{BlockInChannel, ChannelState};
pub use crate::bus::{Bus, Event, EventKind, EventValue};
pub use crate::chaser_confirm::ConfirmChaser;
pub use crate::chaser_header::HeaderChaser;
pub use crate::chaser_validate::{RuleParams, ValidateChaser};
pub use crate::error::{Error, ErrorKind};
pub use crate::node::Node;
pub use crate::workmap::{CheckChaser, Map};
