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

//! The order ledger
//!
//! Authoritative in-memory store of currently-known open orders,
//! indexed by asset and by account. Pure data structure: no I/O, no
//! threads. The owning node wraps it in a mutex and shares it between
//! the synchronizer, the matcher and the swap coordinator; every
//! mutation is serialized through that lock.
//!
//! Idempotency: the ledger keeps the highest accepted sequence number
//! per (account, asset) forever. Replayed or stale announcements are
//! rejected against that watermark, which is what makes reconciliation
//! independent of cross-account message interleaving.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use bazaar_sdk::types::{Order, OrderState};

use crate::book::{OrderbookByAsset, OrderbookForAsset, OrdersOfAccount};
use crate::types::{LedgerDelta, OrderEvent, RejectReason};

/// In-memory authoritative store of open orders
#[derive(Debug, Default)]
pub struct OrderLedger {
	/// (account, sequence) -> live order (Open or Locked)
	orders: BTreeMap<(String, u64), Order>,
	/// asset -> account -> sequences of live orders
	by_asset: BTreeMap<String, BTreeMap<String, BTreeSet<u64>>>,
	/// Highest accepted sequence per (account, asset); never forgotten
	watermarks: HashMap<(String, String), u64>,
}

impl OrderLedger {
	pub fn new() -> Self {
		Self::default()
	}

	/// Apply an announce/retract reconciliation event
	///
	/// Stale announcements (sequence at or below the watermark, or a
	/// sequence the account already used) return `StaleSequence`;
	/// retractions with no matching open order return `NoSuchOrder`.
	/// Both are idempotent no-ops for the caller, not failures.
	pub fn apply(&mut self, event: OrderEvent) -> Result<LedgerDelta, RejectReason> {
		match event {
			OrderEvent::Announce {
				account,
				asset,
				side,
				quantity,
				price,
				sequence,
				timestamp,
			} => {
				let wm_key = (account.clone(), asset.clone());
				if let Some(&wm) = self.watermarks.get(&wm_key)
					&& sequence <= wm
				{
					return Err(RejectReason::StaleSequence);
				}
				// Sequences are per account, not per (account, asset):
				// a live order under the same key means a replay that
				// slipped past the per-asset watermark
				if self.orders.contains_key(&(account.clone(), sequence)) {
					return Err(RejectReason::StaleSequence);
				}

				let order = Order {
					account: account.clone(),
					asset: asset.clone(),
					side,
					quantity,
					price,
					sequence,
					state: OrderState::Open,
					created_at: timestamp,
				};

				self.watermarks.insert(wm_key, sequence);
				self.by_asset
					.entry(asset)
					.or_default()
					.entry(account.clone())
					.or_default()
					.insert(sequence);
				self.orders.insert((account, sequence), order.clone());

				Ok(LedgerDelta::Opened(order))
			}
			OrderEvent::Retract { account, sequence } => {
				match self.orders.get(&(account.clone(), sequence)) {
					Some(order) if order.is_open() => {}
					// Locked orders belong to their session until it
					// reaches a terminal state
					_ => return Err(RejectReason::NoSuchOrder),
				}
				Ok(self.remove(&account, sequence, OrderState::Cancelled))
			}
		}
	}

	/// Reserve an open order for a swap session
	///
	/// This is the single mutation point that prevents two concurrent
	/// match attempts from double-booking an order: exactly one caller
	/// sees `Ok`, everyone else gets `Unavailable`.
	pub fn lock(&mut self, account: &str, sequence: u64) -> Result<Order, RejectReason> {
		let order = self
			.orders
			.get_mut(&(account.to_string(), sequence))
			.ok_or(RejectReason::Unavailable)?;
		if !order.is_open() {
			return Err(RejectReason::Unavailable);
		}
		order.state = OrderState::Locked;
		Ok(order.clone())
	}

	/// Return a locked order to the book (session aborted before
	/// anything settled)
	pub fn release(&mut self, account: &str, sequence: u64) -> Option<LedgerDelta> {
		let order = self.orders.get_mut(&(account.to_string(), sequence))?;
		if order.state != OrderState::Locked {
			return None;
		}
		order.state = OrderState::Open;
		Some(LedgerDelta::Reopened(order.clone()))
	}

	/// Complete a locked order after its session settled on the chain
	///
	/// A full fill removes the order; a partial fill re-opens the
	/// remainder with its original sequence number and reduced quantity.
	pub fn settle(
		&mut self,
		account: &str,
		sequence: u64,
		filled: u64,
	) -> Result<LedgerDelta, RejectReason> {
		let order = self
			.orders
			.get_mut(&(account.to_string(), sequence))
			.ok_or(RejectReason::NoSuchOrder)?;
		if order.state != OrderState::Locked {
			return Err(RejectReason::NoSuchOrder);
		}

		if filled >= order.quantity {
			Ok(self.remove(account, sequence, OrderState::Settled))
		} else {
			order.quantity -= filled;
			order.state = OrderState::Open;
			Ok(LedgerDelta::Reopened(order.clone()))
		}
	}

	/// Cancel all of an account's open orders (peer departure)
	///
	/// Locked orders are left alone; their sessions decide their fate.
	pub fn evict_account(&mut self, account: &str) -> Vec<LedgerDelta> {
		let sequences: Vec<u64> = self
			.account_range(account)
			.filter(|(_, o)| o.is_open())
			.map(|((_, seq), _)| *seq)
			.collect();

		sequences
			.into_iter()
			.map(|seq| self.remove(account, seq, OrderState::Cancelled))
			.collect()
	}

	/// Expire open orders first seen before the cutoff
	pub fn expire_before(&mut self, cutoff: u64) -> Vec<LedgerDelta> {
		let expired: Vec<(String, u64)> = self
			.orders
			.values()
			.filter(|o| o.is_open() && o.created_at < cutoff)
			.map(|o| (o.account.clone(), o.sequence))
			.collect();

		expired
			.into_iter()
			.map(|(account, seq)| self.remove(&account, seq, OrderState::Expired))
			.collect()
	}

	/// Snapshot of one asset's book (open orders only)
	pub fn snapshot_for_asset(&self, asset: &str) -> OrderbookForAsset {
		let mut snapshot = OrderbookForAsset::new(asset);
		if let Some(accounts) = self.by_asset.get(asset) {
			for (account, sequences) in accounts {
				for seq in sequences {
					if let Some(order) = self.orders.get(&(account.clone(), *seq))
						&& order.is_open()
					{
						snapshot.insert(order.clone());
					}
				}
			}
		}
		snapshot
	}

	/// Snapshot of the whole book (open orders only)
	pub fn snapshot_by_asset(&self) -> OrderbookByAsset {
		let mut snapshot = OrderbookByAsset::default();
		for asset in self.by_asset.keys() {
			let book = self.snapshot_for_asset(asset);
			if !book.is_empty() {
				snapshot.assets.insert(asset.clone(), book);
			}
		}
		snapshot
	}

	/// Snapshot of one account's open orders across assets
	pub fn snapshot_of_account(&self, account: &str) -> OrdersOfAccount {
		let mut snapshot = OrdersOfAccount::new(account);
		for (_, order) in self.account_range(account) {
			if order.is_open() {
				snapshot.insert(order.clone());
			}
		}
		snapshot
	}

	/// Look up a live order (Open or Locked)
	pub fn get(&self, account: &str, sequence: u64) -> Option<&Order> {
		self.orders.get(&(account.to_string(), sequence))
	}

	/// Highest accepted sequence for (account, asset)
	pub fn watermark(&self, account: &str, asset: &str) -> Option<u64> {
		self.watermarks
			.get(&(account.to_string(), asset.to_string()))
			.copied()
	}

	/// Number of live orders (Open and Locked)
	pub fn len(&self) -> usize {
		self.orders.len()
	}

	pub fn is_empty(&self) -> bool {
		self.orders.is_empty()
	}

	fn account_range(&self, account: &str) -> impl Iterator<Item = (&(String, u64), &Order)> {
		self.orders
			.range((account.to_string(), 0)..=(account.to_string(), u64::MAX))
	}

	fn remove(&mut self, account: &str, sequence: u64, state: OrderState) -> LedgerDelta {
		let order = self
			.orders
			.remove(&(account.to_string(), sequence))
			.expect("caller verified the order exists");

		if let Some(accounts) = self.by_asset.get_mut(&order.asset) {
			if let Some(sequences) = accounts.get_mut(account) {
				sequences.remove(&sequence);
				if sequences.is_empty() {
					accounts.remove(account);
				}
			}
			if accounts.is_empty() {
				self.by_asset.remove(&order.asset);
			}
		}

		LedgerDelta::Closed {
			account: account.to_string(),
			asset: order.asset,
			sequence,
			state,
		}
	}
}
