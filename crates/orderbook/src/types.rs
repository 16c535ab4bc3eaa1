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

use bazaar_sdk::types::{Order, OrderState, Side};
use serde::{Deserialize, Serialize};

/// A reconciliation event for the order ledger
///
/// Produced by the synchronizer from decoded peer messages, with the
/// announcing account taken from the transport sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderEvent {
	Announce {
		account: String,
		asset: String,
		side: Side,
		quantity: u64,
		price: u64,
		sequence: u64,
		/// Epoch seconds at receipt, used for order expiry
		timestamp: u64,
	},
	Retract {
		account: String,
		sequence: u64,
	},
}

/// One observable change to the ledger
///
/// Deltas flow to subscribers (UI, automation) through the delta
/// buffer. Snapshots remain the authoritative view; deltas are advisory
/// and may be dropped under backpressure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LedgerDelta {
	/// A new order entered the book
	Opened(Order),
	/// An order left the book; `state` tells why (Cancelled, Settled,
	/// Expired)
	Closed {
		account: String,
		asset: String,
		sequence: u64,
		state: OrderState,
	},
	/// An order was reserved by a swap session
	Locked {
		account: String,
		asset: String,
		sequence: u64,
	},
	/// An order returned to the book: an aborted session released it,
	/// or a partial fill left a remainder
	Reopened(Order),
}

/// Why the ledger refused an operation
///
/// All of these are non-fatal: stale announcements and unknown
/// retractions are expected under at-least-once delivery, and
/// `Unavailable` just means another session won the order.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RejectReason {
	#[error("sequence at or below the account's watermark")]
	StaleSequence,
	#[error("no open order with that account and sequence")]
	NoSuchOrder,
	#[error("order is not open")]
	Unavailable,
}
