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

//! Swap coordinator
//!
//! Owns every in-flight session of the local peer. Outbound, it turns
//! a matcher candidate into an initiator session; inbound, it turns a
//! counterparty's proposal into a responder session and routes
//! handshake messages to the session they belong to.
//!
//! The ledger lock acquisition here is the single mutation point that
//! reserves an order: of two concurrent proposals on the same order,
//! exactly one wins and the other fails with `OrderUnavailable`.

use std::sync::{Arc, Mutex};

use bazaar_orderbook::{DeltaProducer, LedgerDelta, OrderLedger, OrderPair};
use bazaar_sdk::messaging::Messenger;
use bazaar_sdk::secret::{Commitment, Secret};
use bazaar_sdk::types::{Order, Side};
use bazaar_sdk::wire::{PeerMessage, SwapMessage, direct_room};
use dashmap::DashMap;
use tokio::sync::mpsc::{
	UnboundedReceiver, UnboundedSender, unbounded_channel,
};
use tracing::{debug, error, info, warn};

use crate::chain::ChainClient;
use crate::config::SwapConfig;
use crate::session::{Session, SessionDeps, SessionOutcome, SwapError};

struct SessionHandle {
	counterparty: String,
	tx: UnboundedSender<SwapMessage>,
}

/// Coordinates all swap sessions of one peer
///
/// Must be created inside a tokio runtime; sessions are spawned onto
/// that runtime, while `handle_message` itself may be called from any
/// thread (typically the synchronizer's router).
pub struct SwapCoordinator {
	deps: Arc<SessionDeps>,
	sessions: Arc<DashMap<String, SessionHandle>>,
	outcome_tx: UnboundedSender<SessionOutcome>,
	runtime: tokio::runtime::Handle,
}

impl SwapCoordinator {
	/// Build the coordinator and the receiver for terminal outcomes
	pub fn new(
		account: &str,
		config: SwapConfig,
		ledger: Arc<Mutex<OrderLedger>>,
		chain: Arc<dyn ChainClient>,
		messenger: Arc<dyn Messenger>,
		deltas: Option<DeltaProducer>,
	) -> (Self, UnboundedReceiver<SessionOutcome>) {
		let (outcome_tx, outcome_rx) = unbounded_channel();
		let coordinator = Self {
			deps: Arc::new(SessionDeps {
				account: account.to_string(),
				config,
				ledger,
				chain,
				messenger,
				deltas,
			}),
			sessions: Arc::new(DashMap::new()),
			outcome_tx,
			runtime: tokio::runtime::Handle::current(),
		};
		(coordinator, outcome_rx)
	}

	/// Start an initiator session for a matcher candidate
	///
	/// Reserves the local leg in the ledger; `OrderUnavailable` means
	/// another session got there first and the caller should re-match
	/// against a fresh snapshot.
	pub fn propose(&self, pair: &OrderPair) -> Result<String, SwapError> {
		let own = pair
			.own_leg(&self.deps.account)
			.ok_or(SwapError::NotParticipant)?;
		let counter = pair
			.counter_leg(&self.deps.account)
			.ok_or(SwapError::NotParticipant)?;

		let locked = self.lock_own_order(own.sequence)?;

		let id = uuid::Uuid::new_v4().to_string();
		let secret = Secret::generate();
		let (tx, rx) = unbounded_channel();
		self.sessions.insert(
			id.clone(),
			SessionHandle {
				counterparty: counter.account.clone(),
				tx,
			},
		);

		let session = Session::new(
			id.clone(),
			counter.account.clone(),
			locked.asset,
			pair.quantity,
			pair.price,
			locked.side,
			own.sequence,
			counter.sequence,
			self.deps.clone(),
			rx,
		);

		let sessions = self.sessions.clone();
		let outcomes = self.outcome_tx.clone();
		self.runtime.spawn(async move {
			let outcome = session.run_initiator(secret).await;
			finish(&sessions, &outcomes, outcome);
		});

		Ok(id)
	}

	/// Route an inbound swap message from the synchronizer
	pub fn handle_message(&self, sender: &str, message: SwapMessage) {
		match message {
			SwapMessage::Propose {
				session,
				asset,
				quantity,
				price,
				commitment,
				counter_sequence,
				initiator_sequence,
			} => {
				self.handle_proposal(
					sender,
					session,
					asset,
					quantity,
					price,
					commitment,
					counter_sequence,
					initiator_sequence,
				);
			}
			other => {
				let session_id = other.session().to_string();
				match self.sessions.get(&session_id) {
					Some(handle) => {
						if handle.counterparty != sender {
							warn!(
								"Dropping message for session {} from {} (expected {})",
								session_id, sender, handle.counterparty
							);
							return;
						}
						if handle.tx.send(other).is_err() {
							debug!("Session {} already terminal", session_id);
						}
					}
					None => {
						// Late traffic for a finished session is normal
						// under at-least-once delivery
						debug!("No session {} for message from {}", session_id, sender);
					}
				}
			}
		}
	}

	/// Number of sessions currently in flight
	pub fn active_sessions(&self) -> usize {
		self.sessions.len()
	}

	/// Request local cancellation of a session
	///
	/// Closes the session's inbound channel; the session aborts at its
	/// next handshake wait and releases its order. Once a lock has
	/// reached finality this has no effect on the chain side - only
	/// refund-after-timeout or claim remain there.
	pub fn cancel(&self, session_id: &str) -> bool {
		self.sessions.remove(session_id).is_some()
	}

	#[allow(clippy::too_many_arguments)]
	fn handle_proposal(
		&self,
		sender: &str,
		session: String,
		asset: String,
		quantity: u64,
		price: u64,
		commitment: String,
		counter_sequence: u64,
		initiator_sequence: u64,
	) {
		if self.sessions.contains_key(&session) {
			// Replayed proposal; the existing session is handling it
			debug!("Ignoring duplicate proposal for session {}", session);
			return;
		}

		let commitment = match Commitment::from_hex(&commitment) {
			Ok(commitment) => commitment,
			Err(e) => {
				self.reject(sender, &session, &format!("malformed commitment: {}", e));
				return;
			}
		};

		if let Err(reason) = self.check_proposal(&asset, quantity, price, counter_sequence) {
			self.reject(sender, &session, &reason);
			return;
		}

		let own = match self.lock_own_order(counter_sequence) {
			Ok(order) => order,
			Err(_) => {
				self.reject(sender, &session, "order unavailable");
				return;
			}
		};

		info!(
			"Accepting proposal {} from {}: {} x {} @ {}",
			session, sender, quantity, asset, price
		);

		let (tx, rx) = unbounded_channel();
		self.sessions.insert(
			session.clone(),
			SessionHandle {
				counterparty: sender.to_string(),
				tx,
			},
		);

		let responder = Session::new(
			session,
			sender.to_string(),
			own.asset,
			quantity,
			price,
			own.side,
			counter_sequence,
			initiator_sequence,
			self.deps.clone(),
			rx,
		);

		let sessions = self.sessions.clone();
		let outcomes = self.outcome_tx.clone();
		self.runtime.spawn(async move {
			let outcome = responder.run_responder(commitment).await;
			finish(&sessions, &outcomes, outcome);
		});
	}

	/// Validate a proposal against the targeted local order
	///
	/// A published order is the standing acceptance policy: any
	/// proposal consistent with it is taken, anything else rejected.
	fn check_proposal(
		&self,
		asset: &str,
		quantity: u64,
		price: u64,
		counter_sequence: u64,
	) -> Result<(), String> {
		if quantity == 0 {
			return Err("zero quantity".to_string());
		}

		let ledger = self.deps.ledger.lock().expect("ledger mutex poisoned");
		let order = match ledger.get(&self.deps.account, counter_sequence) {
			Some(order) if order.is_open() => order,
			_ => return Err("no such open order".to_string()),
		};

		if order.asset != asset {
			return Err("asset mismatch".to_string());
		}
		if quantity > order.quantity {
			return Err("quantity exceeds order".to_string());
		}
		let price_ok = match order.side {
			// Our sell order: never accept below our limit
			Side::Sell => price >= order.price,
			// Our buy order: never accept above our limit
			Side::Buy => price <= order.price,
		};
		if !price_ok {
			return Err("price outside order limit".to_string());
		}
		Ok(())
	}

	fn lock_own_order(&self, sequence: u64) -> Result<Order, SwapError> {
		let locked = {
			let mut ledger = self.deps.ledger.lock().expect("ledger mutex poisoned");
			ledger.lock(&self.deps.account, sequence)
		}
		.map_err(|_| SwapError::OrderUnavailable {
			account: self.deps.account.clone(),
			sequence,
		})?;

		if let Some(producer) = self.deps.deltas.as_ref()
			&& producer
				.push(LedgerDelta::Locked {
					account: locked.account.clone(),
					asset: locked.asset.clone(),
					sequence: locked.sequence,
				})
				.is_err()
		{
			debug!("Delta subscriber is behind");
		}

		Ok(locked)
	}

	fn reject(&self, sender: &str, session: &str, reason: &str) {
		info!("Rejecting proposal {} from {}: {}", session, sender, reason);
		let payload = PeerMessage::Swap(SwapMessage::Reject {
			session: session.to_string(),
			reason: reason.to_string(),
		})
		.encode();
		if let Err(e) = self
			.deps
			.messenger
			.publish(&direct_room(sender), &payload)
		{
			debug!("Reject undeliverable to {}: {}", sender, e);
		}
	}
}

/// Remove the finished session and report its outcome
fn finish(
	sessions: &DashMap<String, SessionHandle>,
	outcomes: &UnboundedSender<SessionOutcome>,
	outcome: SessionOutcome,
) {
	sessions.remove(outcome.session());

	if let SessionOutcome::Stuck {
		session,
		error,
		lock_id,
	} = &outcome
	{
		// At-risk funds: this must not drown in routine logs
		error!(
			"Session {} is STUCK ({}); lock {:?} may hold funds and needs manual chain intervention",
			session, error, lock_id
		);
	}

	if outcomes.send(outcome).is_err() {
		debug!("Outcome receiver dropped");
	}
}
