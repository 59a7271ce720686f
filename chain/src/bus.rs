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

//! The event bus coupling every chaser.
//!
//! Subscribers observe events in issuer order (`notify` pushes onto every
//! subscriber's queue under one lock, in the order it's called). Delivery
//! itself happens on each subscriber's own strand via [`Bus::pump`] so a
//! slow subscriber never blocks another's view of the stream. A subscriber
//! closure returns `false` to unsubscribe.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use bitnode_core::{HLink, TLink};
use parking_lot::Mutex;

/// The event kinds carried on the bus. Each kind interprets its one
/// [`EventValue`] payload per the component design; see the module docs
/// above for the full semantics of each kind.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
	/// Node or chaser starting up.
	Start,
	/// Generic "re-check your cursor" nudge.
	Bump,
	/// Arena space became available.
	Space,
	/// Node-wide suspend requested.
	Suspend,
	/// A channel found no work (`ChannelId`).
	Starved,
	/// Ask a channel to give up half its map (`ChannelId`).
	Split,
	/// Collective stall signal following a `starved` (`ChannelId`).
	Stall,
	/// Drop a channel's outstanding map (`ChannelId`).
	Purge,
	/// Request a channel report its status (`Count` as a sequence number).
	Report,
	/// A raw block arrived on a channel (`ChannelId`).
	Block,
	/// A header was accepted, value is the branch point height (`Height`).
	Header,
	/// The Check chaser issued a download batch (`Count`).
	Download,
	/// The candidate chain regressed to a height (`Height`).
	Regressed,
	/// The confirmed chain was forced back to a height (`Height`).
	Disorganized,
	/// A malleable block needs redownload (`HLink`).
	Malleated,
	/// A block passed check-on-arrival (`Height`).
	Checked,
	/// A block failed check-on-arrival, non-malleable (`HLink`).
	Unchecked,
	/// A block passed validation (`Height`).
	Valid,
	/// A block failed validation, non-malleable (`HLink`).
	Unvalid,
	/// A block passed per-tx confirmability (`Height`).
	Confirmable,
	/// A block failed per-tx confirmability (`HLink`).
	Unconfirmable,
	/// A block was pushed onto the confirmed chain (`HLink`).
	Organized,
	/// A block was popped off the confirmed chain (`HLink`).
	Reorganized,
	/// A transaction-level event (`TLink`).
	Transaction,
	/// A mining/fee-estimation template refresh request (`Height`).
	Template,
	/// Terminal event. No further events are emitted after this one.
	Stop,
}

/// The typed payload carried with an [`EventKind`]. Keeps the wire-level
/// "one 64-bit slot" compact by projecting every variant to `u64`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EventValue {
	/// A chain height.
	Height(u64),
	/// A generic count (batch size, sequence number).
	Count(u64),
	/// A peer channel identifier.
	ChannelId(u64),
	/// A header link.
	HLink(HLink),
	/// A transaction link.
	TLink(TLink),
	/// An opaque key, used where no more specific interpretation applies.
	ObjectKey(u64),
}

impl EventValue {
	/// Projects this value to its wire-compatible `u64` representation.
	pub fn as_u64(&self) -> u64 {
		match self {
			EventValue::Height(v) => *v,
			EventValue::Count(v) => *v,
			EventValue::ChannelId(v) => *v,
			EventValue::HLink(l) => u64::from(l.0),
			EventValue::TLink(l) => u64::from(l.0),
			EventValue::ObjectKey(v) => *v,
		}
	}
}

/// A single posted event.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Event {
	/// The kind of event.
	pub kind: EventKind,
	/// Its payload.
	pub value: EventValue,
}

impl Event {
	/// Builds an event.
	pub fn new(kind: EventKind, value: EventValue) -> Event {
		Event { kind, value }
	}
}

/// A subscriber handler: returns `true` to keep receiving events, `false`
/// to unsubscribe.
pub type Handler = Box<dyn FnMut(Event) -> bool + Send>;

struct Subscriber {
	id: u64,
	handler: Handler,
	queue: VecDeque<Event>,
}

struct Inner {
	subscribers: Vec<Subscriber>,
	stopped: bool,
}

/// The shared event bus. Cheap to clone (an `Arc` internally would be the
/// usual wrapping; callers hold this behind their own `Arc<Bus>`).
pub struct Bus {
	inner: Mutex<Inner>,
	next_id: AtomicU64,
}

impl Default for Bus {
	fn default() -> Bus {
		Bus::new()
	}
}

impl Bus {
	/// Builds an empty bus.
	pub fn new() -> Bus {
		Bus {
			inner: Mutex::new(Inner {
				subscribers: Vec::new(),
				stopped: false,
			}),
			next_id: AtomicU64::new(1),
		}
	}

	/// Subscribes a handler, returning its id (usable to target
	/// [`Bus::notify_one`]). The handler is invoked on [`Bus::pump`], never
	/// inline with `notify`.
	pub fn subscribe(&self, handler: Handler) -> u64 {
		let id = self.next_id.fetch_add(1, Ordering::SeqCst);
		self.inner.lock().subscribers.push(Subscriber {
			id,
			handler,
			queue: VecDeque::new(),
		});
		id
	}

	/// Broadcasts an event to every current subscriber's queue, in issuer
	/// order. A no-op once [`EventKind::Stop`] has been broadcast.
	pub fn notify(&self, kind: EventKind, value: EventValue) {
		let mut inner = self.inner.lock();
		if inner.stopped {
			return;
		}
		let event = Event::new(kind, value);
		for sub in inner.subscribers.iter_mut() {
			sub.queue.push_back(event);
		}
		if kind == EventKind::Stop {
			inner.stopped = true;
		}
	}

	/// Delivers an event to exactly one subscriber, identified by the id
	/// returned from [`Bus::subscribe`]. Unknown ids are silently ignored.
	pub fn notify_one(&self, id: u64, kind: EventKind, value: EventValue) {
		let mut inner = self.inner.lock();
		if inner.stopped {
			return;
		}
		let event = Event::new(kind, value);
		if let Some(sub) = inner.subscribers.iter_mut().find(|s| s.id == id) {
			sub.queue.push_back(event);
		}
	}

	/// Drains and dispatches every subscriber's queued events in FIFO
	/// order. Not reentrant per subscriber: a handler must not call `pump`
	/// from within itself. Unsubscribes any handler that returns `false`.
	pub fn pump(&self) {
		let mut inner = self.inner.lock();
		let mut i = 0;
		while i < inner.subscribers.len() {
			let mut keep = true;
			while let Some(event) = inner.subscribers[i].queue.pop_front() {
				if !(inner.subscribers[i].handler)(event) {
					keep = false;
					break;
				}
			}
			if keep {
				i += 1;
			} else {
				inner.subscribers.remove(i);
			}
		}
	}

	/// Number of currently subscribed handlers, for tests.
	pub fn subscriber_count(&self) -> usize {
		self.inner.lock().subscribers.len()
	}
}
