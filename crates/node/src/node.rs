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

//! The node facade
//!
//! Wires one peer together: shared ledger, synchronizer thread, swap
//! coordinator, expiry sweeper. The embedder supplies the transport
//! and chain collaborators, feeds transport events into `ingress()`,
//! and reads snapshots/outcomes from here.
//!
//! Must be started from within a tokio runtime (swap sessions and the
//! expiry sweeper are tasks); the synchronizer and the swap router
//! are plain threads, matching their blocking channel loops.

use std::{
	sync::{
		Arc, Mutex,
		atomic::{AtomicU64, Ordering},
	},
	thread,
	time::{Duration, SystemTime},
};

use bazaar_orderbook::{
	DeltaBuffer, DeltaConsumer, DeltaProducer, IngressQueue, IngressSender, Matcher, OrderEvent,
	OrderLedger, OrderPair, OrderbookByAsset, OrderbookForAsset, OrdersOfAccount, RejectReason,
	Synchronizer,
};
use bazaar_sdk::messaging::{Messenger, PublishError};
use bazaar_sdk::types::Side;
use bazaar_sdk::wire::PeerMessage;
use bazaar_swap::{ChainClient, SessionOutcome, SwapCoordinator, SwapError};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info};

use crate::config::NodeConfig;

/// Errors surfaced by the node's own operations
#[derive(Debug, Error)]
pub enum NodeError {
	#[error("ledger rejected the operation: {0}")]
	Ledger(#[from] RejectReason),
	#[error("transport publish failed: {0}")]
	Publish(#[from] PublishError),
}

/// One running trading peer
pub struct Node {
	account: String,
	order_room: String,
	ledger: Arc<Mutex<OrderLedger>>,
	matcher: Matcher,
	coordinator: Arc<SwapCoordinator>,
	messenger: Arc<dyn Messenger>,
	synchronizer: Option<Synchronizer>,
	ingress: IngressSender,
	delta_tx: DeltaProducer,
	deltas: Option<DeltaConsumer>,
	outcomes: Option<UnboundedReceiver<SessionOutcome>>,
	next_sequence: Arc<AtomicU64>,
	relay: Option<tokio::task::JoinHandle<()>>,
	sweeper: Option<tokio::task::JoinHandle<()>>,
}

impl Node {
	/// Start a node with the supplied collaborators
	pub fn start(
		config: NodeConfig,
		messenger: Arc<dyn Messenger>,
		chain: Arc<dyn ChainClient>,
	) -> Self {
		let ledger = Arc::new(Mutex::new(OrderLedger::new()));
		let (delta_tx, delta_rx) = DeltaBuffer::new(config.delta_capacity).split();
		let (ingress_tx, ingress_rx) = IngressQueue::new(config.ingress_capacity).split();

		let (coordinator, mut session_outcomes) = SwapCoordinator::new(
			&config.account,
			config.swap_config(),
			ledger.clone(),
			chain,
			messenger.clone(),
			Some(delta_tx.clone()),
		);
		let coordinator = Arc::new(coordinator);
		let next_sequence = Arc::new(AtomicU64::new(0));

		// Settled orders must leave the other peers' books too: the
		// owner retracts its consumed order on the wire and
		// re-announces any partial remainder under a fresh sequence,
		// so every ledger reconverges through normal reconciliation
		let (outcome_tx, outcomes) = tokio::sync::mpsc::unbounded_channel();
		let relay = {
			let ledger = ledger.clone();
			let messenger = messenger.clone();
			let deltas = delta_tx.clone();
			let next_sequence = next_sequence.clone();
			let account = config.account.clone();
			let room = config.order_room.clone();
			tokio::spawn(async move {
				while let Some(outcome) = session_outcomes.recv().await {
					if let SessionOutcome::Settled { own_sequence, .. } = &outcome {
						Self::relay_settlement(
							&ledger,
							messenger.as_ref(),
							&deltas,
							&next_sequence,
							&account,
							&room,
							*own_sequence,
						);
					}
					if outcome_tx.send(outcome).is_err() {
						debug!("Outcome subscriber dropped");
					}
				}
			})
		};

		let (swap_tx, swap_rx) = crossbeam::channel::unbounded();
		let synchronizer = Synchronizer::start(
			config.sync_config(),
			ledger.clone(),
			ingress_rx,
			delta_tx.clone(),
			Some(swap_tx),
		);

		// Negotiation traffic flows synchronizer -> coordinator; the
		// router dies with the synchronizer's end of the channel
		{
			let router = coordinator.clone();
			thread::Builder::new()
				.name("swap-router".to_string())
				.spawn(move || {
					while let Ok((sender, message)) = swap_rx.recv() {
						router.handle_message(&sender, message);
					}
					debug!("Swap router stopped");
				})
				.expect("Failed to spawn swap router thread");
		}

		let sweeper = (config.order_ttl_secs > 0).then(|| {
			let ledger = ledger.clone();
			let deltas = delta_tx.clone();
			let ttl = config.order_ttl_secs;
			let every = Duration::from_secs(config.expiry_sweep_secs.max(1));
			tokio::spawn(async move {
				let mut tick = tokio::time::interval(every);
				tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
				loop {
					tick.tick().await;
					let cutoff = Self::timestamp().saturating_sub(ttl);
					let expired = {
						let mut guard = ledger.lock().expect("ledger mutex poisoned");
						guard.expire_before(cutoff)
					};
					if !expired.is_empty() {
						info!("Expired {} resting orders", expired.len());
					}
					for delta in expired {
						let _ = deltas.push(delta);
					}
				}
			})
		});

		info!("Node started for account {}", config.account);

		Self {
			account: config.account.clone(),
			order_room: config.order_room.clone(),
			matcher: Matcher::new(ledger.clone()),
			ledger,
			coordinator,
			messenger,
			synchronizer: Some(synchronizer),
			ingress: ingress_tx,
			delta_tx,
			deltas: Some(delta_rx),
			outcomes: Some(outcomes),
			next_sequence,
			relay: Some(relay),
			sweeper,
		}
	}

	/// Reconcile the wire view of a settled local order
	fn relay_settlement(
		ledger: &Arc<Mutex<OrderLedger>>,
		messenger: &dyn Messenger,
		deltas: &DeltaProducer,
		next_sequence: &AtomicU64,
		account: &str,
		room: &str,
		own_sequence: u64,
	) {
		let remainder = {
			let guard = ledger.lock().expect("ledger mutex poisoned");
			guard
				.get(account, own_sequence)
				.filter(|order| order.is_open())
				.cloned()
		};

		// The consumed sequence is dead for everyone
		let retract = PeerMessage::Retract {
			sequence: own_sequence,
		}
		.encode();
		if let Err(e) = messenger.publish(room, &retract) {
			debug!("Could not retract settled order on the wire: {}", e);
		}

		// A partial remainder moves to a fresh sequence so peers (whose
		// watermarks already cover the old one) pick it up again
		if let Some(order) = remainder {
			let fresh = next_sequence.fetch_add(1, Ordering::Relaxed) + 1;
			let applied = {
				let mut guard = ledger.lock().expect("ledger mutex poisoned");
				let retracted = guard.apply(OrderEvent::Retract {
					account: account.to_string(),
					sequence: own_sequence,
				});
				let reopened = guard.apply(OrderEvent::Announce {
					account: account.to_string(),
					asset: order.asset.clone(),
					side: order.side,
					quantity: order.quantity,
					price: order.price,
					sequence: fresh,
					timestamp: Self::timestamp(),
				});
				(retracted, reopened)
			};
			for delta in [applied.0, applied.1].into_iter().flatten() {
				let _ = deltas.push(delta);
			}

			let announce = PeerMessage::Announce {
				asset: order.asset,
				side: order.side,
				quantity: order.quantity,
				price: order.price,
				sequence: fresh,
			}
			.encode();
			if let Err(e) = messenger.publish(room, &announce) {
				debug!("Could not re-announce remainder on the wire: {}", e);
			}
		}
	}

	pub fn account(&self) -> &str {
		&self.account
	}

	/// Sender the transport adapter feeds peer events into
	pub fn ingress(&self) -> IngressSender {
		self.ingress.clone()
	}

	/// Publish a new own order and add it to the local book
	pub fn announce(
		&self,
		asset: &str,
		side: Side,
		quantity: u64,
		price: u64,
	) -> Result<u64, NodeError> {
		let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed) + 1;

		let delta = {
			let mut ledger = self.ledger.lock().expect("ledger mutex poisoned");
			ledger.apply(OrderEvent::Announce {
				account: self.account.clone(),
				asset: asset.to_string(),
				side,
				quantity,
				price,
				sequence,
				timestamp: Self::timestamp(),
			})
		}?;
		let _ = self.delta_tx.push(delta);

		let payload = PeerMessage::Announce {
			asset: asset.to_string(),
			side,
			quantity,
			price,
			sequence,
		}
		.encode();
		self.messenger.publish(&self.order_room, &payload)?;

		Ok(sequence)
	}

	/// Withdraw one of the own orders, locally and on the wire
	pub fn retract(&self, sequence: u64) -> Result<(), NodeError> {
		let delta = {
			let mut ledger = self.ledger.lock().expect("ledger mutex poisoned");
			ledger.apply(OrderEvent::Retract {
				account: self.account.clone(),
				sequence,
			})
		}?;
		let _ = self.delta_tx.push(delta);

		let payload = PeerMessage::Retract { sequence }.encode();
		self.messenger.publish(&self.order_room, &payload)?;

		Ok(())
	}

	/// Snapshot of one asset's book
	pub fn orderbook_for_asset(&self, asset: &str) -> OrderbookForAsset {
		self.ledger
			.lock()
			.expect("ledger mutex poisoned")
			.snapshot_for_asset(asset)
	}

	/// Snapshot of the whole book
	pub fn orderbook_by_asset(&self) -> OrderbookByAsset {
		self.ledger
			.lock()
			.expect("ledger mutex poisoned")
			.snapshot_by_asset()
	}

	/// Snapshot of one account's open orders
	pub fn orders_of_account(&self, account: &str) -> OrdersOfAccount {
		self.ledger
			.lock()
			.expect("ledger mutex poisoned")
			.snapshot_of_account(account)
	}

	/// Compatible pairs for an asset, best first
	pub fn find_candidates(&self, asset: &str) -> Vec<OrderPair> {
		self.matcher.find_candidates(asset).collect()
	}

	/// Start a swap session for a candidate involving one of our
	/// orders
	pub fn propose(&self, pair: &OrderPair) -> Result<String, SwapError> {
		self.coordinator.propose(pair)
	}

	/// Sessions currently in flight
	pub fn active_sessions(&self) -> usize {
		self.coordinator.active_sessions()
	}

	/// Cancel an in-flight session locally (best effort; see
	/// [`SwapCoordinator::cancel`])
	pub fn cancel_session(&self, session_id: &str) -> bool {
		self.coordinator.cancel(session_id)
	}

	/// Malformed payloads dropped by the synchronizer
	pub fn decode_errors(&self) -> u64 {
		self.synchronizer
			.as_ref()
			.map(Synchronizer::decode_errors)
			.unwrap_or(0)
	}

	/// Take the ledger delta feed (once)
	pub fn take_deltas(&mut self) -> Option<DeltaConsumer> {
		self.deltas.take()
	}

	/// Take the session outcome feed (once)
	pub fn take_outcomes(&mut self) -> Option<UnboundedReceiver<SessionOutcome>> {
		self.outcomes.take()
	}

	/// Stop the synchronizer and the sweeper
	///
	/// In-flight swap sessions keep running on the runtime until they
	/// reach a terminal state; aborting them blindly could strand a
	/// live chain lock.
	pub fn shutdown(mut self) {
		info!("Node for {} shutting down", self.account);
		if let Some(synchronizer) = self.synchronizer.take() {
			synchronizer.shutdown();
		}
		if let Some(relay) = self.relay.take() {
			relay.abort();
		}
		if let Some(sweeper) = self.sweeper.take() {
			sweeper.abort();
		}
	}

	fn timestamp() -> u64 {
		SystemTime::now()
			.duration_since(SystemTime::UNIX_EPOCH)
			.map(|d| d.as_secs())
			.unwrap_or(0)
	}
}
