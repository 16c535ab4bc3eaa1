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

use serde::{Deserialize, Serialize};

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
	Buy,
	Sell,
}

impl Side {
	/// The side a compatible counter-order must have
	pub fn opposite(self) -> Self {
		match self {
			Side::Buy => Side::Sell,
			Side::Sell => Side::Buy,
		}
	}
}

/// Lifecycle state of an order
///
/// Orders are immutable except for these transitions. An update to
/// price or quantity is modeled as retract-old + announce-new with a
/// fresh sequence number, never as in-place mutation, so that
/// reconciliation from an unordered message stream stays deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderState {
	/// Resting in the book, available for matching
	Open,
	/// Reserved by an in-flight swap session
	Locked,
	/// Fully filled and settled on the chain
	Settled,
	/// Retracted by its owner or evicted on peer departure
	Cancelled,
	/// Dropped after its deadline passed with no matching session
	Expired,
}

impl OrderState {
	/// Terminal states never re-enter the book
	pub fn is_terminal(self) -> bool {
		matches!(
			self,
			OrderState::Settled | OrderState::Cancelled | OrderState::Expired
		)
	}
}

/// One resting trade intention
///
/// `(account, sequence)` identifies an order globally: sequence numbers
/// are assigned monotonically by the announcing account. `price` is in
/// units of the settlement asset per unit of `asset`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
	/// Announcing account (taken from the transport sender, never from
	/// the payload - the room is unauthenticated)
	pub account: String,
	/// Tradable game-resource identifier
	pub asset: String,
	/// Order side
	pub side: Side,
	/// Remaining quantity
	pub quantity: u64,
	/// Limit price in settlement-asset units per unit
	pub price: u64,
	/// Per-account monotonic sequence number
	pub sequence: u64,
	/// Lifecycle state
	pub state: OrderState,
	/// Epoch seconds at which the local peer first saw the order
	pub created_at: u64,
}

impl Order {
	/// True if this order can still be matched or locked
	pub fn is_open(&self) -> bool {
		self.state == OrderState::Open
	}
}
