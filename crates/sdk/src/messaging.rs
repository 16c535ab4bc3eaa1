// Copyright 2025 itscheems
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

//! Messaging collaborator interface
//!
//! The trading core does not own a network stack. Outbound traffic goes
//! through [`Messenger::publish`]; inbound traffic arrives as
//! [`PeerEvent`]s that the embedder feeds into the node's ingress queue.
//! Connection handling, authentication and room membership are the
//! transport's problem.
//!
//! [`MemoryTransport`] is the in-process implementation used throughout
//! the test suites: a set of rooms with join/leave notifications and
//! direct per-account delivery, no networking.

use std::sync::Arc;

use crossbeam::channel::{Receiver, Sender, unbounded};
use dashmap::DashMap;
use thiserror::Error;

use crate::wire::PeerEvent;

/// Failure to hand a payload to the transport
#[derive(Debug, Error)]
pub enum PublishError {
	#[error("transport unavailable: {0}")]
	Unavailable(String),
}

/// Outbound half of the messaging collaborator
///
/// `publish` must not block on network I/O; transports are expected to
/// queue internally. Delivery is at-least-once with per-room ordering.
pub trait Messenger: Send + Sync {
	fn publish(&self, room: &str, payload: &[u8]) -> Result<(), PublishError>;
}

/// In-process messaging transport
///
/// Shared by all test peers of one scenario. Rooms track their members
/// and emit `Joined`/`Left` events; payloads published to a room are
/// delivered to every member except the sender. Direct rooms
/// (`dm:<account>`) deliver straight to the target's inbox without any
/// membership.
pub struct MemoryTransport {
	/// Account -> inbox for all events addressed to that peer
	inboxes: DashMap<String, Sender<PeerEvent>>,
	/// Room -> member accounts, in join order
	rooms: DashMap<String, Vec<String>>,
}

impl MemoryTransport {
	pub fn new() -> Arc<Self> {
		Arc::new(Self {
			inboxes: DashMap::new(),
			rooms: DashMap::new(),
		})
	}

	/// Register a peer and return its handle
	///
	/// Reconnecting under an existing account replaces the old inbox.
	pub fn connect(self: &Arc<Self>, account: &str) -> MemoryPeer {
		let (sender, receiver) = unbounded();
		self.inboxes.insert(account.to_string(), sender);
		MemoryPeer {
			transport: self.clone(),
			account: account.to_string(),
			events: receiver,
		}
	}

	fn deliver(&self, account: &str, event: PeerEvent) {
		if let Some(inbox) = self.inboxes.get(account) {
			// A dropped receiver just means the peer is gone
			let _ = inbox.send(event);
		}
	}

	fn members(&self, room: &str) -> Vec<String> {
		self.rooms
			.get(room)
			.map(|m| m.value().clone())
			.unwrap_or_default()
	}
}

/// One connected peer of a [`MemoryTransport`]
pub struct MemoryPeer {
	transport: Arc<MemoryTransport>,
	account: String,
	events: Receiver<PeerEvent>,
}

impl MemoryPeer {
	pub fn account(&self) -> &str {
		&self.account
	}

	/// Inbound event stream for this peer
	///
	/// Clones share the same underlying queue; exactly one consumer
	/// should drain it.
	pub fn events(&self) -> Receiver<PeerEvent> {
		self.events.clone()
	}

	/// Enter a room, notifying the existing members
	pub fn join(&self, room: &str) {
		let mut members = self
			.transport
			.rooms
			.entry(room.to_string())
			.or_default();
		if members.iter().any(|m| m == &self.account) {
			return;
		}
		members.push(self.account.clone());
		let others: Vec<String> = members
			.iter()
			.filter(|m| *m != &self.account)
			.cloned()
			.collect();
		drop(members);

		for member in others {
			self.transport.deliver(
				&member,
				PeerEvent::Joined {
					room: room.to_string(),
					account: self.account.clone(),
				},
			);
		}
	}

	/// Leave a room, notifying the remaining members
	pub fn leave(&self, room: &str) {
		let remaining = {
			let mut members = match self.transport.rooms.get_mut(room) {
				Some(members) => members,
				None => return,
			};
			let before = members.len();
			members.retain(|m| m != &self.account);
			if members.len() == before {
				return;
			}
			members.clone()
		};

		for member in remaining {
			self.transport.deliver(
				&member,
				PeerEvent::Left {
					room: room.to_string(),
					account: self.account.clone(),
				},
			);
		}
	}

	/// Drop the connection: leaves every room and removes the inbox
	///
	/// Members of each room see a `Left` event, which is what triggers
	/// stale-order eviction downstream.
	pub fn disconnect(&self) {
		let rooms: Vec<String> = self
			.transport
			.rooms
			.iter()
			.filter(|e| e.value().iter().any(|m| m == &self.account))
			.map(|e| e.key().clone())
			.collect();
		for room in rooms {
			self.leave(&room);
		}
		self.transport.inboxes.remove(&self.account);
	}
}

impl Messenger for MemoryPeer {
	fn publish(&self, room: &str, payload: &[u8]) -> Result<(), PublishError> {
		// Direct rooms bypass membership
		if let Some(target) = room.strip_prefix("dm:") {
			if !self.transport.inboxes.contains_key(target) {
				return Err(PublishError::Unavailable(format!(
					"no such peer: {}",
					target
				)));
			}
			self.transport.deliver(
				target,
				PeerEvent::Message {
					room: room.to_string(),
					sender: self.account.clone(),
					payload: payload.to_vec(),
				},
			);
			return Ok(());
		}

		for member in self.transport.members(room) {
			if member == self.account {
				continue;
			}
			self.transport.deliver(
				&member,
				PeerEvent::Message {
					room: room.to_string(),
					sender: self.account.clone(),
					payload: payload.to_vec(),
				},
			);
		}
		Ok(())
	}
}
