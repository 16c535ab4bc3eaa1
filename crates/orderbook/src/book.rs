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

//! Snapshot views of the order book
//!
//! These are the read API exposed to UI/automation layers: plain
//! serializable values computed from the ledger at a point in time.
//! They contain only Open orders - an account's entry disappears as
//! soon as its order set becomes empty, and no settled, cancelled or
//! expired order ever appears.

use std::collections::BTreeMap;

use bazaar_sdk::types::{Order, Side};
use serde::{Deserialize, Serialize};

/// One account's open orders, partitioned by side
///
/// Orders are sorted by sequence number within each side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountOrders {
	pub buys: Vec<Order>,
	pub sells: Vec<Order>,
}

impl AccountOrders {
	pub fn is_empty(&self) -> bool {
		self.buys.is_empty() && self.sells.is_empty()
	}

	pub fn len(&self) -> usize {
		self.buys.len() + self.sells.len()
	}

	pub(crate) fn push(&mut self, order: Order) {
		match order.side {
			Side::Buy => self.buys.push(order),
			Side::Sell => self.sells.push(order),
		}
	}
}

/// Snapshot of one asset's book: account -> open orders
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderbookForAsset {
	pub asset: String,
	pub accounts: BTreeMap<String, AccountOrders>,
}

impl OrderbookForAsset {
	pub fn new(asset: &str) -> Self {
		Self {
			asset: asset.to_string(),
			accounts: BTreeMap::new(),
		}
	}

	pub fn is_empty(&self) -> bool {
		self.accounts.is_empty()
	}

	/// Total number of open orders across all accounts
	pub fn open_count(&self) -> usize {
		self.accounts.values().map(AccountOrders::len).sum()
	}

	/// All open orders of one side, across accounts
	pub fn side(&self, side: Side) -> impl Iterator<Item = &Order> {
		self.accounts.values().flat_map(move |a| match side {
			Side::Buy => a.buys.iter(),
			Side::Sell => a.sells.iter(),
		})
	}

	pub(crate) fn insert(&mut self, order: Order) {
		self.accounts
			.entry(order.account.clone())
			.or_default()
			.push(order);
	}
}

/// Snapshot of the whole book: asset -> per-asset book
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderbookByAsset {
	pub assets: BTreeMap<String, OrderbookForAsset>,
}

impl OrderbookByAsset {
	pub fn is_empty(&self) -> bool {
		self.assets.is_empty()
	}

	pub fn open_count(&self) -> usize {
		self.assets.values().map(OrderbookForAsset::open_count).sum()
	}
}

/// Snapshot of one account's open orders across all assets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrdersOfAccount {
	pub account: String,
	pub assets: BTreeMap<String, AccountOrders>,
}

impl OrdersOfAccount {
	pub fn new(account: &str) -> Self {
		Self {
			account: account.to_string(),
			assets: BTreeMap::new(),
		}
	}

	pub fn is_empty(&self) -> bool {
		self.assets.is_empty()
	}

	pub fn open_count(&self) -> usize {
		self.assets.values().map(AccountOrders::len).sum()
	}

	pub(crate) fn insert(&mut self, order: Order) {
		self.assets
			.entry(order.asset.clone())
			.or_default()
			.push(order);
	}
}

#[cfg(test)]
mod tests {
	use bazaar_sdk::types::OrderState;

	use super::*;

	fn order(account: &str, side: Side, seq: u64) -> Order {
		Order {
			account: account.to_string(),
			asset: "wood".to_string(),
			side,
			quantity: 10,
			price: 2,
			sequence: seq,
			state: OrderState::Open,
			created_at: 1000,
		}
	}

	#[test]
	fn test_account_entry_partitions_sides() {
		let mut book = OrderbookForAsset::new("wood");
		book.insert(order("alice", Side::Sell, 1));
		book.insert(order("alice", Side::Buy, 2));
		book.insert(order("bob", Side::Buy, 1));

		assert_eq!(book.open_count(), 3);
		assert_eq!(book.accounts["alice"].sells.len(), 1);
		assert_eq!(book.accounts["alice"].buys.len(), 1);
		assert_eq!(book.side(Side::Buy).count(), 2);
	}

	#[test]
	fn test_snapshots_serialize_for_subscribers() {
		let mut book = OrderbookForAsset::new("wood");
		book.insert(order("alice", Side::Sell, 1));

		// Snapshots are the read API handed to UI/automation layers
		let json = serde_json::to_string(&book).unwrap();
		let back: OrderbookForAsset = serde_json::from_str(&json).unwrap();
		assert_eq!(back, book);
	}
}
