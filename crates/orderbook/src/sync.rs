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

//! Order book synchronizer
//!
//! Consumes the per-room-ordered (not globally ordered) stream of peer
//! events, decodes announce/retract traffic and reconciles it into the
//! order ledger. Runs on a dedicated thread so reconciliation has a
//! single owner; everything it learns is published to subscribers as
//! ledger deltas.
//!
//! Fault model:
//! - Malformed payloads are dropped, counted and logged; never fatal
//! - Stale/duplicate announcements and unknown retractions are benign
//!   no-ops (the ledger's watermarks absorb at-least-once delivery)
//! - A peer leaving the order room has all of its open orders evicted;
//!   no further liveness signal is possible for it
//! - Swap negotiation messages are not interpreted here; they are
//!   forwarded to the coordinator's sink

use std::{
	sync::{
		Arc, Mutex,
		atomic::{AtomicBool, AtomicU64, Ordering},
	},
	thread::{self, JoinHandle},
	time::{Duration, SystemTime},
};

use bazaar_sdk::wire::{PeerEvent, PeerMessage, SwapMessage};
use crossbeam::channel::Sender;
use tracing::{debug, info, warn};

use crate::{
	events::{DeltaBufferError, DeltaProducer},
	ledger::OrderLedger,
	queue::{IngressError, IngressReceiver},
	types::{OrderEvent, RejectReason},
};

/// How long the loop waits for an event before re-checking shutdown
const IDLE_POLL: Duration = Duration::from_millis(50);

/// Destination for decoded swap negotiation messages
pub type SwapSink = Sender<(String, SwapMessage)>;

/// Synchronizer configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
	/// Room carrying announce/retract traffic; departures from this
	/// room trigger eviction
	pub order_room: String,
}

impl Default for SyncConfig {
	fn default() -> Self {
		Self {
			order_room: "orders".to_string(),
		}
	}
}

/// Handle to the synchronizer thread
pub struct Synchronizer {
	thread_handle: Option<JoinHandle<()>>,
	shutdown: Arc<AtomicBool>,
	decode_errors: Arc<AtomicU64>,
}

impl Synchronizer {
	/// Start the synchronizer thread
	pub fn start(
		config: SyncConfig,
		ledger: Arc<Mutex<OrderLedger>>,
		receiver: IngressReceiver,
		deltas: DeltaProducer,
		swap_sink: Option<SwapSink>,
	) -> Self {
		let shutdown = Arc::new(AtomicBool::new(false));
		let shutdown_clone = shutdown.clone();
		let decode_errors = Arc::new(AtomicU64::new(0));
		let decode_errors_clone = decode_errors.clone();

		let thread_handle = thread::Builder::new()
			.name("book-sync".to_string())
			.spawn(move || {
				info!("Synchronizer started for room: {}", config.order_room);
				Self::run_loop(
					&config,
					&ledger,
					&receiver,
					&deltas,
					swap_sink.as_ref(),
					&shutdown_clone,
					&decode_errors_clone,
				);
				info!("Synchronizer stopped");
			})
			.expect("Failed to spawn synchronizer thread");

		Self {
			thread_handle: Some(thread_handle),
			shutdown,
			decode_errors,
		}
	}

	/// Number of malformed payloads dropped so far
	pub fn decode_errors(&self) -> u64 {
		self.decode_errors.load(Ordering::Relaxed)
	}

	fn run_loop(
		config: &SyncConfig,
		ledger: &Arc<Mutex<OrderLedger>>,
		receiver: &IngressReceiver,
		deltas: &DeltaProducer,
		swap_sink: Option<&SwapSink>,
		shutdown: &Arc<AtomicBool>,
		decode_errors: &Arc<AtomicU64>,
	) {
		loop {
			if shutdown.load(Ordering::Relaxed) {
				break;
			}

			let event = match receiver.recv_timeout(IDLE_POLL) {
				Ok(event) => event,
				Err(IngressError::TimedOut) => continue,
				Err(_) => {
					debug!("Ingress queue disconnected");
					break;
				}
			};

			Self::handle_event(config, ledger, deltas, swap_sink, decode_errors, event);
		}
	}

	fn handle_event(
		config: &SyncConfig,
		ledger: &Arc<Mutex<OrderLedger>>,
		deltas: &DeltaProducer,
		swap_sink: Option<&SwapSink>,
		decode_errors: &Arc<AtomicU64>,
		event: PeerEvent,
	) {
		match event {
			PeerEvent::Message {
				room,
				sender,
				payload,
			} => {
				let message = match PeerMessage::decode(&payload) {
					Ok(message) => message,
					Err(e) => {
						decode_errors.fetch_add(1, Ordering::Relaxed);
						warn!("Dropping malformed message from {} in {}: {}", sender, room, e);
						return;
					}
				};
				Self::handle_message(ledger, deltas, swap_sink, decode_errors, sender, message);
			}
			PeerEvent::Joined { room, account } => {
				debug!("Peer {} joined {}", account, room);
			}
			PeerEvent::Left { room, account } => {
				if room != config.order_room {
					return;
				}
				let evicted = {
					let mut guard = ledger.lock().expect("ledger mutex poisoned");
					guard.evict_account(&account)
				};
				if !evicted.is_empty() {
					info!("Evicted {} stale orders of departed peer {}", evicted.len(), account);
				}
				for delta in evicted {
					Self::publish_delta(deltas, delta);
				}
			}
		}
	}

	fn handle_message(
		ledger: &Arc<Mutex<OrderLedger>>,
		deltas: &DeltaProducer,
		swap_sink: Option<&SwapSink>,
		decode_errors: &Arc<AtomicU64>,
		sender: String,
		message: PeerMessage,
	) {
		let event = match message {
			PeerMessage::Announce {
				asset,
				side,
				quantity,
				price,
				sequence,
			} => {
				// Structurally valid JSON can still be a nonsense order
				if quantity == 0 || price == 0 || asset.is_empty() {
					decode_errors.fetch_add(1, Ordering::Relaxed);
					warn!("Dropping degenerate announce from {}", sender);
					return;
				}
				OrderEvent::Announce {
					account: sender,
					asset,
					side,
					quantity,
					price,
					sequence,
					timestamp: Self::timestamp(),
				}
			}
			PeerMessage::Retract { sequence } => OrderEvent::Retract {
				account: sender,
				sequence,
			},
			PeerMessage::Swap(swap) => {
				match swap_sink {
					Some(sink) => {
						if sink.send((sender, swap)).is_err() {
							warn!("Swap sink closed; dropping negotiation message");
						}
					}
					None => debug!("No swap sink configured; ignoring message from {}", sender),
				}
				return;
			}
		};

		let result = {
			let mut guard = ledger.lock().expect("ledger mutex poisoned");
			guard.apply(event)
		};

		match result {
			Ok(delta) => Self::publish_delta(deltas, delta),
			Err(RejectReason::StaleSequence) => {
				debug!("Ignoring stale announcement");
			}
			Err(RejectReason::NoSuchOrder) => {
				// Retract-before-announce, or a retraction raced an
				// eviction; either way there is nothing to do
				debug!("Ignoring retraction with no matching open order");
			}
			Err(reason) => {
				debug!("Ledger rejected event: {}", reason);
			}
		}
	}

	fn publish_delta(deltas: &DeltaProducer, delta: crate::types::LedgerDelta) {
		match deltas.push(delta) {
			Ok(()) => {}
			Err(DeltaBufferError::Full) => {
				warn!("Delta buffer full; subscriber is behind, dropping delta");
			}
			Err(DeltaBufferError::Empty) | Err(DeltaBufferError::Disconnected) => {}
		}
	}

	fn timestamp() -> u64 {
		SystemTime::now()
			.duration_since(SystemTime::UNIX_EPOCH)
			.map(|d| d.as_secs())
			.unwrap_or(0)
	}

	/// Stop the thread and wait for it to exit
	pub fn shutdown(mut self) {
		self.shutdown.store(true, Ordering::Relaxed);
		if let Some(handle) = self.thread_handle.take()
			&& handle.join().is_err()
		{
			warn!("Synchronizer thread panicked");
		}
	}
}

impl Drop for Synchronizer {
	fn drop(&mut self) {
		self.shutdown.store(true, Ordering::Relaxed);
		if let Some(handle) = self.thread_handle.take() {
			let _ = handle.join();
		}
	}
}
