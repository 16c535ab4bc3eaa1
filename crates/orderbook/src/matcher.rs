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

//! Advisory order matching
//!
//! The matcher scans a snapshot of one asset's book for compatible
//! (buy, sell) pairs and ranks them by price-time priority. It never
//! mutates the ledger: a candidate only becomes a trade once the swap
//! coordinator wins the ledger lock on both legs, so two concurrent
//! match passes can safely propose the same order - exactly one
//! session gets it.

use std::sync::{Arc, Mutex};

use bazaar_sdk::types::{Order, Side};

use crate::ledger::OrderLedger;

/// A compatible (buy, sell) candidate
///
/// `quantity` is the fillable amount (minimum of both remainders) and
/// `price` the execution price: the maker's price, where the maker is
/// the order with the earlier sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderPair {
	pub buy: Order,
	pub sell: Order,
	pub quantity: u64,
	pub price: u64,
}

impl OrderPair {
	/// The leg owned by `account`, if any
	pub fn own_leg(&self, account: &str) -> Option<&Order> {
		if self.buy.account == account {
			Some(&self.buy)
		} else if self.sell.account == account {
			Some(&self.sell)
		} else {
			None
		}
	}

	/// The leg not owned by `account`, if the other one is
	pub fn counter_leg(&self, account: &str) -> Option<&Order> {
		if self.buy.account == account {
			Some(&self.sell)
		} else if self.sell.account == account {
			Some(&self.buy)
		} else {
			None
		}
	}

	/// How far the books cross, in price units
	fn spread(&self) -> u64 {
		self.buy.price - self.sell.price
	}

	fn maker_sequence(&self) -> u64 {
		self.buy.sequence.min(self.sell.sequence)
	}
}

/// Scans the ledger for compatible order pairs
pub struct Matcher {
	ledger: Arc<Mutex<OrderLedger>>,
}

impl Matcher {
	pub fn new(ledger: Arc<Mutex<OrderLedger>>) -> Self {
		Self { ledger }
	}

	/// All compatible pairs for one asset, best first
	///
	/// Compatibility: opposite sides, buy price >= sell price, distinct
	/// accounts (an account never trades with itself). Ranking: widest
	/// cross first, then earliest maker sequence, then account ids for
	/// a total order.
	pub fn find_candidates(&self, asset: &str) -> impl Iterator<Item = OrderPair> {
		let snapshot = {
			let ledger = self.ledger.lock().expect("ledger mutex poisoned");
			ledger.snapshot_for_asset(asset)
		};

		let buys: Vec<&Order> = snapshot.side(Side::Buy).collect();
		let sells: Vec<&Order> = snapshot.side(Side::Sell).collect();

		let mut pairs = Vec::new();
		for buy in &buys {
			for sell in &sells {
				if buy.account == sell.account || buy.price < sell.price {
					continue;
				}
				pairs.push(Self::pair(buy, sell));
			}
		}

		pairs.sort_by(|a, b| {
			b.spread()
				.cmp(&a.spread())
				.then(a.maker_sequence().cmp(&b.maker_sequence()))
				.then(a.buy.account.cmp(&b.buy.account))
				.then(a.sell.account.cmp(&b.sell.account))
		});

		pairs.into_iter()
	}

	fn pair(buy: &Order, sell: &Order) -> OrderPair {
		// The maker (earlier sequence) sets the execution price; equal
		// sequences from different accounts tie-break on account id
		let maker_is_buy = (buy.sequence, buy.account.as_str())
			< (sell.sequence, sell.account.as_str());
		let price = if maker_is_buy { buy.price } else { sell.price };

		OrderPair {
			buy: buy.clone(),
			sell: sell.clone(),
			quantity: buy.quantity.min(sell.quantity),
			price,
		}
	}
}

#[cfg(test)]
mod tests {
	use bazaar_sdk::types::OrderState;

	use super::*;
	use crate::types::OrderEvent;

	fn ledger_with(orders: &[(&str, Side, u64, u64, u64)]) -> Arc<Mutex<OrderLedger>> {
		let mut ledger = OrderLedger::new();
		for (account, side, quantity, price, seq) in orders {
			ledger
				.apply(OrderEvent::Announce {
					account: account.to_string(),
					asset: "wood".to_string(),
					side: *side,
					quantity: *quantity,
					price: *price,
					sequence: *seq,
					timestamp: 1000,
				})
				.unwrap();
		}
		Arc::new(Mutex::new(ledger))
	}

	#[test]
	fn test_crossed_orders_pair_up() {
		// Alice sells 10 wood at 2, bob buys 10 at 3
		let ledger = ledger_with(&[
			("alice", Side::Sell, 10, 2, 1),
			("bob", Side::Buy, 10, 3, 1),
		]);
		let matcher = Matcher::new(ledger);

		let pairs: Vec<OrderPair> = matcher.find_candidates("wood").collect();

		assert_eq!(pairs.len(), 1);
		let pair = &pairs[0];
		assert_eq!(pair.sell.account, "alice");
		assert_eq!(pair.buy.account, "bob");
		assert_eq!(pair.quantity, 10);
		assert!(pair.price >= 2 && pair.price <= 3);
	}

	#[test]
	fn test_uncrossed_orders_do_not_pair() {
		let ledger = ledger_with(&[
			("alice", Side::Sell, 10, 5, 1),
			("bob", Side::Buy, 10, 3, 1),
		]);
		let matcher = Matcher::new(ledger);

		assert_eq!(matcher.find_candidates("wood").count(), 0);
	}

	#[test]
	fn test_no_self_trade() {
		let ledger = ledger_with(&[
			("alice", Side::Sell, 10, 2, 1),
			("alice", Side::Buy, 10, 3, 2),
		]);
		let matcher = Matcher::new(ledger);

		assert_eq!(matcher.find_candidates("wood").count(), 0);
	}

	#[test]
	fn test_maker_price_wins() {
		// Alice's sell came first, so her price executes
		let ledger = ledger_with(&[
			("alice", Side::Sell, 10, 2, 1),
			("bob", Side::Buy, 10, 3, 5),
		]);
		let matcher = Matcher::new(ledger);

		let pair = matcher.find_candidates("wood").next().unwrap();
		assert_eq!(pair.price, 2);
	}

	#[test]
	fn test_price_time_ordering() {
		let ledger = ledger_with(&[
			("alice", Side::Sell, 10, 2, 1),
			("carol", Side::Sell, 10, 1, 7),
			("bob", Side::Buy, 10, 3, 5),
		]);
		let matcher = Matcher::new(ledger);

		let pairs: Vec<OrderPair> = matcher.find_candidates("wood").collect();

		// Carol's cheaper sell crosses wider and ranks first
		assert_eq!(pairs.len(), 2);
		assert_eq!(pairs[0].sell.account, "carol");
		assert_eq!(pairs[1].sell.account, "alice");
	}

	#[test]
	fn test_partial_quantity() {
		let ledger = ledger_with(&[
			("alice", Side::Sell, 10, 2, 1),
			("bob", Side::Buy, 4, 3, 1),
		]);
		let matcher = Matcher::new(ledger);

		let pair = matcher.find_candidates("wood").next().unwrap();
		assert_eq!(pair.quantity, 4);
	}

	#[test]
	fn test_locked_orders_are_invisible() {
		let ledger = ledger_with(&[
			("alice", Side::Sell, 10, 2, 1),
			("bob", Side::Buy, 10, 3, 1),
		]);
		{
			let mut guard = ledger.lock().unwrap();
			let locked = guard.lock("alice", 1).unwrap();
			assert_eq!(locked.state, OrderState::Locked);
		}
		let matcher = Matcher::new(ledger);

		assert_eq!(matcher.find_candidates("wood").count(), 0);
	}

	#[test]
	fn test_legs_helpers() {
		let ledger = ledger_with(&[
			("alice", Side::Sell, 10, 2, 1),
			("bob", Side::Buy, 10, 3, 1),
		]);
		let matcher = Matcher::new(ledger);
		let pair = matcher.find_candidates("wood").next().unwrap();

		assert_eq!(pair.own_leg("alice").unwrap().side, Side::Sell);
		assert_eq!(pair.counter_leg("alice").unwrap().account, "bob");
		assert!(pair.own_leg("carol").is_none());
	}
}
