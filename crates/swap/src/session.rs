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

//! One in-flight swap session
//!
//! A session owns exactly one leg of a proposed trade: the local
//! order it reserved in the ledger, the negotiation with the
//! counterparty, and the local chain lock. It runs as a single tokio
//! task; inbound handshake messages arrive on its channel from the
//! coordinator's router.
//!
//! Safety shape of the protocol:
//! - Before any chain lock exists, every failure releases the order
//!   and aborts - nothing was at risk
//! - After the local lock reaches finality, failures fall through to
//!   refund-after-expiry; the hash lock guarantees the funds come
//!   back as long as the secret stays unrevealed
//! - Once both locks are final, the initiator claims first (it holds
//!   the secret); the responder claims with the revealed secret, or
//!   refunds if the initiator never claims
//! - A refund that races a late claim is recovered by reading the
//!   revealed secret and claiming the counter-lock after all
//! - Only when claim AND refund both fail repeatedly does a session
//!   end `Stuck`, which callers must surface: funds may stay
//!   time-locked until an operator intervenes

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bazaar_orderbook::{DeltaProducer, OrderLedger};
use bazaar_sdk::messaging::Messenger;
use bazaar_sdk::secret::{Commitment, Secret};
use bazaar_sdk::types::Side;
use bazaar_sdk::wire::{PeerMessage, SwapMessage, direct_room};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

use crate::chain::{ChainClient, ChainError, LockHandle};
use crate::config::SwapConfig;
use crate::retry::with_backoff;

/// States of the swap handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
	Proposed,
	Negotiating,
	Locking,
	LockedSelf,
	WaitingCounterLock,
	BothLocked,
	Claiming,
	Settled,
	Aborted,
	Refunding,
	Refunded,
	Stuck,
}

/// Protocol-level session failures
///
/// Every variant is confined to its session; none of them can corrupt
/// the ledger or other sessions.
#[derive(Debug, Clone, Error)]
pub enum SwapError {
	#[error("order {account}#{sequence} is not open")]
	OrderUnavailable { account: String, sequence: u64 },
	#[error("neither leg of the pair belongs to this account")]
	NotParticipant,
	#[error("counterparty rejected the proposal: {0}")]
	Rejected(String),
	#[error("counterparty aborted: {0}")]
	PeerAborted(String),
	#[error("accepted terms did not match the proposal")]
	NegotiationMismatch,
	#[error("no response to the proposal before the timeout")]
	ResponseTimeout,
	#[error("counterparty lock not confirmed before the timeout")]
	CounterLockTimeout,
	#[error("counterparty never claimed before lock expiry")]
	ClaimTimeout,
	#[error("session cancelled locally")]
	Cancelled,
	#[error("chain lock failed: {0}")]
	LockFailure(ChainError),
	#[error("chain claim failed: {0}")]
	ClaimFailure(ChainError),
	#[error("chain refund failed: {0}")]
	RefundFailure(ChainError),
	#[error("could not reach counterparty: {0}")]
	PublishFailure(String),
}

/// Terminal report of a session
#[derive(Debug, Clone)]
pub enum SessionOutcome {
	/// Both claims landed; the local order is settled (or its
	/// remainder re-opened)
	Settled {
		session: String,
		counterparty: String,
		asset: String,
		quantity: u64,
		price: u64,
		/// Sequence of the local order this session consumed; the
		/// owner must retract it on the wire (and re-announce any
		/// remainder) so other peers' books converge
		own_sequence: u64,
	},
	/// The session failed before any value was at risk
	Aborted { session: String, error: SwapError },
	/// The local lock was recovered after the counterparty went dark
	Refunded { session: String, error: SwapError },
	/// Claim and refund both kept failing; funds may remain
	/// time-locked and need operator attention
	Stuck {
		session: String,
		error: SwapError,
		lock_id: Option<String>,
	},
}

impl SessionOutcome {
	pub fn session(&self) -> &str {
		match self {
			SessionOutcome::Settled { session, .. } => session,
			SessionOutcome::Aborted { session, .. } => session,
			SessionOutcome::Refunded { session, .. } => session,
			SessionOutcome::Stuck { session, .. } => session,
		}
	}
}

/// Everything a session needs from its environment
pub(crate) struct SessionDeps {
	pub account: String,
	pub config: SwapConfig,
	pub ledger: Arc<Mutex<OrderLedger>>,
	pub chain: Arc<dyn ChainClient>,
	pub messenger: Arc<dyn Messenger>,
	pub deltas: Option<DeltaProducer>,
}

enum Waited {
	Msg(SwapMessage),
	TimedOut,
	Closed,
}

pub(crate) struct Session {
	pub id: String,
	pub counterparty: String,
	pub asset: String,
	pub quantity: u64,
	pub price: u64,
	pub own_side: Side,
	pub own_sequence: u64,
	pub counter_sequence: u64,
	state: SessionState,
	deps: Arc<SessionDeps>,
	rx: UnboundedReceiver<SwapMessage>,
}

impl Session {
	#[allow(clippy::too_many_arguments)]
	pub(crate) fn new(
		id: String,
		counterparty: String,
		asset: String,
		quantity: u64,
		price: u64,
		own_side: Side,
		own_sequence: u64,
		counter_sequence: u64,
		deps: Arc<SessionDeps>,
		rx: UnboundedReceiver<SwapMessage>,
	) -> Self {
		Self {
			id,
			counterparty,
			asset,
			quantity,
			price,
			own_side,
			own_sequence,
			counter_sequence,
			state: SessionState::Proposed,
			deps,
			rx,
		}
	}

	/// Drive the initiating side: propose, lock, claim first
	pub(crate) async fn run_initiator(mut self, secret: Secret) -> SessionOutcome {
		let commitment = secret.commitment();
		info!(
			"Session {}: proposing {} x {} @ {} to {}",
			self.id, self.quantity, self.asset, self.price, self.counterparty
		);

		let propose = SwapMessage::Propose {
			session: self.id.clone(),
			asset: self.asset.clone(),
			quantity: self.quantity,
			price: self.price,
			commitment: commitment.to_hex(),
			counter_sequence: self.counter_sequence,
			initiator_sequence: self.own_sequence,
		};
		if let Err(e) = self.send(propose) {
			return self.abort_quietly(e);
		}
		self.set_state(SessionState::Negotiating);

		match self
			.wait_where(self.deps.config.response_timeout, |m| {
				matches!(m, SwapMessage::Accept { .. } | SwapMessage::Reject { .. })
			})
			.await
		{
			Waited::Msg(SwapMessage::Accept {
				asset,
				quantity,
				price,
				..
			}) => {
				if asset != self.asset || quantity != self.quantity || price != self.price {
					return self.abort_with_notice(SwapError::NegotiationMismatch).await;
				}
			}
			Waited::Msg(SwapMessage::Reject { reason, .. }) => {
				return self.abort_quietly(SwapError::Rejected(reason));
			}
			Waited::Msg(SwapMessage::Abort { reason, .. }) => {
				return self.abort_quietly(SwapError::PeerAborted(reason));
			}
			Waited::Msg(_) => unreachable!("wait_where only yields matching messages"),
			Waited::TimedOut => {
				return self.abort_with_notice(SwapError::ResponseTimeout).await;
			}
			Waited::Closed => return self.abort_quietly(SwapError::Cancelled),
		}

		self.set_state(SessionState::Locking);
		let (lock_asset, lock_amount) = self.own_lock_requirement();
		let chain = self.deps.chain.clone();
		let own_lock = match chain
			.lock(
				&lock_asset,
				lock_amount,
				&commitment,
				self.deps.config.initiator_lock_timeout,
			)
			.await
		{
			Ok(handle) => handle,
			Err(e) => {
				return self.abort_with_notice(SwapError::LockFailure(e)).await;
			}
		};
		if let Err(e) = chain.await_finality(&own_lock.lock_id).await {
			// Finality unknown means the lock may exist; recover it
			// once it expires rather than walking away
			return self.refund_exit(own_lock, None, SwapError::LockFailure(e)).await;
		}
		self.set_state(SessionState::LockedSelf);

		let lock_done = SwapMessage::LockDone {
			session: self.id.clone(),
			lock_id: own_lock.lock_id.clone(),
		};
		if let Err(e) = self.send(lock_done) {
			return self.refund_exit(own_lock, None, e).await;
		}

		self.set_state(SessionState::WaitingCounterLock);
		let counter_lock_id = match self
			.wait_where(self.deps.config.counter_lock_timeout, |m| {
				matches!(m, SwapMessage::LockDone { .. })
			})
			.await
		{
			Waited::Msg(SwapMessage::LockDone { lock_id, .. }) => lock_id,
			Waited::Msg(SwapMessage::Abort { reason, .. }) => {
				return self
					.refund_exit(own_lock, None, SwapError::PeerAborted(reason))
					.await;
			}
			Waited::Msg(_) => unreachable!("wait_where only yields matching messages"),
			Waited::TimedOut => {
				return self
					.refund_exit(own_lock, None, SwapError::CounterLockTimeout)
					.await;
			}
			Waited::Closed => {
				return self.refund_exit(own_lock, None, SwapError::Cancelled).await;
			}
		};
		if let Err(e) = chain.await_finality(&counter_lock_id).await {
			return self
				.refund_exit(own_lock, None, SwapError::LockFailure(e))
				.await;
		}
		self.set_state(SessionState::BothLocked);

		// The initiator claims first: revealing the secret is what
		// lets the responder claim in turn
		self.set_state(SessionState::Claiming);
		let claim = with_backoff(&self.deps.config.retry, "claim", || {
			chain.claim(&counter_lock_id, &secret)
		})
		.await;
		match claim {
			Ok(()) => {
				self.settle_own();
				self.settled()
			}
			Err(e) => {
				// The claim never landed, so nothing was revealed and
				// the local lock is still recoverable
				self.refund_exit(own_lock, Some(counter_lock_id), SwapError::ClaimFailure(e))
					.await
			}
		}
	}

	/// Drive the responding side: accept, lock, claim with the
	/// revealed secret
	///
	/// The coordinator has already validated the proposal against the
	/// local order, parsed the commitment and reserved the order in
	/// the ledger.
	pub(crate) async fn run_responder(mut self, commitment: Commitment) -> SessionOutcome {
		info!(
			"Session {}: accepting {} x {} @ {} from {}",
			self.id, self.quantity, self.asset, self.price, self.counterparty
		);

		self.set_state(SessionState::Negotiating);
		let accept = SwapMessage::Accept {
			session: self.id.clone(),
			asset: self.asset.clone(),
			quantity: self.quantity,
			price: self.price,
		};
		if let Err(e) = self.send(accept) {
			return self.abort_quietly(e);
		}

		self.set_state(SessionState::Locking);
		let (lock_asset, lock_amount) = self.own_lock_requirement();
		let chain = self.deps.chain.clone();
		let own_lock = match chain
			.lock(
				&lock_asset,
				lock_amount,
				&commitment,
				self.deps.config.responder_lock_timeout,
			)
			.await
		{
			Ok(handle) => handle,
			Err(e) => {
				return self.abort_with_notice(SwapError::LockFailure(e)).await;
			}
		};
		if let Err(e) = chain.await_finality(&own_lock.lock_id).await {
			return self
				.refund_exit(own_lock, None, SwapError::LockFailure(e))
				.await;
		}
		self.set_state(SessionState::LockedSelf);

		let lock_done = SwapMessage::LockDone {
			session: self.id.clone(),
			lock_id: own_lock.lock_id.clone(),
		};
		if let Err(e) = self.send(lock_done) {
			return self.refund_exit(own_lock, None, e).await;
		}

		self.set_state(SessionState::WaitingCounterLock);
		let counter_lock_id = match self
			.wait_where(self.deps.config.counter_lock_timeout, |m| {
				matches!(m, SwapMessage::LockDone { .. })
			})
			.await
		{
			Waited::Msg(SwapMessage::LockDone { lock_id, .. }) => lock_id,
			Waited::Msg(SwapMessage::Abort { reason, .. }) => {
				return self
					.refund_exit(own_lock, None, SwapError::PeerAborted(reason))
					.await;
			}
			Waited::Msg(_) => unreachable!("wait_where only yields matching messages"),
			Waited::TimedOut => {
				return self
					.refund_exit(own_lock, None, SwapError::CounterLockTimeout)
					.await;
			}
			Waited::Closed => {
				return self.refund_exit(own_lock, None, SwapError::Cancelled).await;
			}
		};
		if let Err(e) = chain.await_finality(&counter_lock_id).await {
			return self
				.refund_exit(own_lock, None, SwapError::LockFailure(e))
				.await;
		}
		self.set_state(SessionState::BothLocked);

		// Wait for the initiator's claim to reveal the secret; past
		// our own lock's expiry we refund instead
		let deadline = tokio::time::Instant::from_std(own_lock.expires_at);
		loop {
			match chain.revealed_secret(&own_lock.lock_id).await {
				Ok(Some(secret)) => {
					self.set_state(SessionState::Claiming);
					let claim = with_backoff(&self.deps.config.retry, "claim", || {
						chain.claim(&counter_lock_id, &secret)
					})
					.await;
					return match claim {
						Ok(()) => {
							self.settle_own();
							self.settled()
						}
						// Our lock is already claimed but we could not
						// take the counter-value: at-risk funds
						Err(e) => self.stuck(SwapError::ClaimFailure(e), Some(counter_lock_id)),
					};
				}
				Ok(None) => {}
				Err(e) if e.is_transient() => {
					debug!("Session {}: secret poll failed transiently: {}", self.id, e);
				}
				Err(e) => {
					return self
						.refund_exit(own_lock, Some(counter_lock_id), SwapError::ClaimFailure(e))
						.await;
				}
			}

			if tokio::time::Instant::now() >= deadline {
				return self
					.refund_exit(own_lock, Some(counter_lock_id), SwapError::ClaimTimeout)
					.await;
			}
			tokio::time::sleep(self.deps.config.secret_poll_interval).await;
		}
	}

	/// Recover the local lock after a failure past lock finality
	///
	/// Waits out the lock's expiry, then refunds with backoff. If the
	/// refund loses a race against a late claim by the counterparty,
	/// the revealed secret completes our own claim instead.
	async fn refund_exit(
		mut self,
		own_lock: LockHandle,
		counter_lock_id: Option<String>,
		error: SwapError,
	) -> SessionOutcome {
		self.set_state(SessionState::Refunding);
		warn!(
			"Session {}: refunding local lock {} after: {}",
			self.id, own_lock.lock_id, error
		);

		tokio::time::sleep_until(tokio::time::Instant::from_std(own_lock.expires_at)).await;

		let chain = self.deps.chain.clone();
		let refund = with_backoff(&self.deps.config.retry, "refund", || {
			chain.refund(&own_lock.lock_id)
		})
		.await;
		match refund {
			Ok(()) | Err(ChainError::AlreadyRefunded) => {
				self.release_own();
				self.set_state(SessionState::Refunded);
				SessionOutcome::Refunded {
					session: self.id,
					error,
				}
			}
			Err(ChainError::AlreadyClaimed) => {
				// The counterparty claimed at the last moment; its
				// secret is public now, so take the counter-value
				let Some(counter) = counter_lock_id else {
					return self.stuck(
						SwapError::RefundFailure(ChainError::AlreadyClaimed),
						Some(own_lock.lock_id),
					);
				};
				match chain.revealed_secret(&own_lock.lock_id).await {
					Ok(Some(secret)) => {
						self.set_state(SessionState::Claiming);
						let claim = with_backoff(&self.deps.config.retry, "late claim", || {
							chain.claim(&counter, &secret)
						})
						.await;
						match claim {
							Ok(()) => {
								self.settle_own();
								self.settled()
							}
							Err(e) => self.stuck(SwapError::ClaimFailure(e), Some(counter)),
						}
					}
					_ => self.stuck(
						SwapError::RefundFailure(ChainError::AlreadyClaimed),
						Some(own_lock.lock_id),
					),
				}
			}
			Err(e) => self.stuck(SwapError::RefundFailure(e), Some(own_lock.lock_id)),
		}
	}

	/// Abort before anything was at risk, telling the counterparty
	async fn abort_with_notice(mut self, error: SwapError) -> SessionOutcome {
		let abort = SwapMessage::Abort {
			session: self.id.clone(),
			reason: error.to_string(),
		};
		if let Err(e) = self.send(abort) {
			debug!("Session {}: abort notice undeliverable: {}", self.id, e);
		}
		self.set_state(SessionState::Aborted);
		self.release_own();
		SessionOutcome::Aborted {
			session: self.id,
			error,
		}
	}

	/// Abort without a notice (the peer is gone or already told us)
	fn abort_quietly(mut self, error: SwapError) -> SessionOutcome {
		self.set_state(SessionState::Aborted);
		self.release_own();
		SessionOutcome::Aborted {
			session: self.id,
			error,
		}
	}

	fn settled(mut self) -> SessionOutcome {
		self.set_state(SessionState::Settled);
		info!(
			"Session {}: settled {} x {} @ {} with {}",
			self.id, self.quantity, self.asset, self.price, self.counterparty
		);
		SessionOutcome::Settled {
			session: self.id,
			counterparty: self.counterparty,
			asset: self.asset,
			quantity: self.quantity,
			price: self.price,
			own_sequence: self.own_sequence,
		}
	}

	fn stuck(mut self, error: SwapError, lock_id: Option<String>) -> SessionOutcome {
		self.set_state(SessionState::Stuck);
		SessionOutcome::Stuck {
			session: self.id,
			error,
			lock_id,
		}
	}

	/// What this side must put on the chain: the seller locks the
	/// traded asset, the buyer locks the settlement total
	fn own_lock_requirement(&self) -> (String, u64) {
		match self.own_side {
			Side::Sell => (self.asset.clone(), self.quantity),
			Side::Buy => (
				self.deps.config.settlement_asset.clone(),
				self.quantity * self.price,
			),
		}
	}

	fn send(&self, message: SwapMessage) -> Result<(), SwapError> {
		let payload = PeerMessage::Swap(message).encode();
		self.deps
			.messenger
			.publish(&direct_room(&self.counterparty), &payload)
			.map_err(|e| SwapError::PublishFailure(e.to_string()))
	}

	/// Wait for a relevant message; `Abort` is always relevant
	async fn wait_where<F>(&mut self, limit: Duration, relevant: F) -> Waited
	where
		F: Fn(&SwapMessage) -> bool,
	{
		let deadline = tokio::time::Instant::now() + limit;
		loop {
			match tokio::time::timeout_at(deadline, self.rx.recv()).await {
				Err(_) => return Waited::TimedOut,
				Ok(None) => return Waited::Closed,
				Ok(Some(msg))
					if relevant(&msg) || matches!(msg, SwapMessage::Abort { .. }) =>
				{
					return Waited::Msg(msg);
				}
				Ok(Some(msg)) => {
					// At-least-once delivery replays earlier phases
					debug!(
						"Session {}: ignoring out-of-phase message {:?}",
						self.id,
						msg.session()
					);
				}
			}
		}
	}

	fn release_own(&self) {
		let delta = {
			let mut ledger = self.deps.ledger.lock().expect("ledger mutex poisoned");
			ledger.release(&self.deps.account, self.own_sequence)
		};
		if let (Some(delta), Some(producer)) = (delta, self.deps.deltas.as_ref())
			&& producer.push(delta).is_err()
		{
			debug!("Session {}: delta subscriber is behind", self.id);
		}
	}

	fn settle_own(&self) {
		let result = {
			let mut ledger = self.deps.ledger.lock().expect("ledger mutex poisoned");
			ledger.settle(&self.deps.account, self.own_sequence, self.quantity)
		};
		match result {
			Ok(delta) => {
				if let Some(producer) = self.deps.deltas.as_ref()
					&& producer.push(delta).is_err()
				{
					debug!("Session {}: delta subscriber is behind", self.id);
				}
			}
			Err(e) => warn!(
				"Session {}: could not settle own order in ledger: {}",
				self.id, e
			),
		}
	}

	fn set_state(&mut self, state: SessionState) {
		debug!("Session {}: {:?} -> {:?}", self.id, self.state, state);
		self.state = state;
	}
}
