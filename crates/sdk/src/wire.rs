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

//! Peer wire protocol
//!
//! Messages exchanged between peers over the group-messaging transport,
//! JSON-encoded. Order traffic (announce/retract) goes to the shared
//! order room; swap negotiation goes to per-account direct rooms.
//!
//! The announcing account is never part of the payload: the transport
//! reports the sender, and trusting a claimed owner instead would let
//! any peer forge retractions in an unauthenticated room.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Side;

/// A message published by a peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PeerMessage {
	/// Advertise a new open order
	Announce {
		asset: String,
		side: Side,
		quantity: u64,
		price: u64,
		sequence: u64,
	},
	/// Withdraw one of the sender's own orders
	Retract { sequence: u64 },
	/// Swap negotiation traffic (direct rooms)
	Swap(SwapMessage),
}

/// Two-party swap handshake messages
///
/// Terms in `Accept` are a full echo of the proposal; the initiator
/// aborts on any difference rather than renegotiating, so there is
/// never ambiguity about which terms bind.
///
/// Tagged `op` so it nests inside the `type`-tagged [`PeerMessage`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SwapMessage {
	Propose {
		/// Session identifier chosen by the initiator
		session: String,
		asset: String,
		quantity: u64,
		/// Execution price in settlement-asset units per unit
		price: u64,
		/// Hex-encoded SHA-256 hash-lock commitment
		commitment: String,
		/// Sequence of the receiver's order this proposal targets
		counter_sequence: u64,
		/// Sequence of the initiator's own order backing the proposal
		initiator_sequence: u64,
	},
	Accept {
		session: String,
		asset: String,
		quantity: u64,
		price: u64,
	},
	Reject {
		session: String,
		reason: String,
	},
	/// Sender's chain lock reached finality
	LockDone {
		session: String,
		lock_id: String,
	},
	Abort {
		session: String,
		reason: String,
	},
}

impl SwapMessage {
	/// Session id this message belongs to
	pub fn session(&self) -> &str {
		match self {
			SwapMessage::Propose { session, .. } => session,
			SwapMessage::Accept { session, .. } => session,
			SwapMessage::Reject { session, .. } => session,
			SwapMessage::LockDone { session, .. } => session,
			SwapMessage::Abort { session, .. } => session,
		}
	}
}

/// Events delivered by the messaging transport
///
/// Delivery is at-least-once and ordered per room; there is no ordering
/// guarantee across senders. Membership changes are explicit events, not
/// inferred timeouts, so a slow-but-alive peer is never evicted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
	/// A payload published to a room by another peer
	Message {
		room: String,
		sender: String,
		payload: Vec<u8>,
	},
	/// A peer joined a room
	Joined { room: String, account: String },
	/// A peer left a room (or its connection dropped)
	Left { room: String, account: String },
}

/// Malformed peer message
///
/// Decode failures are non-fatal: the synchronizer drops the message,
/// logs it, and keeps going.
#[derive(Debug, Error)]
#[error("malformed peer message: {0}")]
pub struct DecodeError(#[from] serde_json::Error);

impl PeerMessage {
	/// Serialize for publication
	pub fn encode(&self) -> Vec<u8> {
		// Serialization of these enums cannot fail
		serde_json::to_vec(self).unwrap_or_default()
	}

	/// Parse a received payload
	pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
		Ok(serde_json::from_slice(payload)?)
	}
}

/// Name of the direct room used to reach one account
///
/// Swap negotiation is point-to-point; each peer listens on its own
/// direct room alongside the shared order room.
pub fn direct_room(account: &str) -> String {
	format!("dm:{}", account)
}
