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

use std::time::Duration;

use bazaar_sdk::wire::PeerEvent;
use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};

/// Ingress queue between the messaging transport and the synchronizer
///
/// The transport adapter (possibly multi-threaded) pushes peer events
/// in; the single synchronizer thread drains them. Bounded capacity
/// gives backpressure: when the queue is full the transport should
/// drop the event and rely on the peer's next refresh, since the
/// ledger's watermark reconciliation makes redelivery harmless.
pub struct IngressQueue {
	sender: Sender<PeerEvent>,
	receiver: Receiver<PeerEvent>,
}

impl IngressQueue {
	pub fn new(capacity: usize) -> Self {
		let (sender, receiver) = bounded(capacity);
		Self { sender, receiver }
	}

	/// Split into the transport-facing sender and the synchronizer's
	/// receiver
	///
	/// The sender can be cloned freely; the receiver must stay with
	/// the one synchronizer thread.
	pub fn split(self) -> (IngressSender, IngressReceiver) {
		(
			IngressSender {
				sender: self.sender,
			},
			IngressReceiver {
				receiver: self.receiver,
			},
		)
	}
}

/// Transport-facing end of the ingress queue
#[derive(Clone)]
pub struct IngressSender {
	sender: Sender<PeerEvent>,
}

impl IngressSender {
	/// Enqueue a peer event (non-blocking)
	pub fn push(&self, event: PeerEvent) -> Result<(), IngressError> {
		self.sender.try_send(event).map_err(|e| match e {
			TrySendError::Full(_) => IngressError::Full,
			TrySendError::Disconnected(_) => IngressError::Disconnected,
		})
	}

	pub fn is_full(&self) -> bool {
		self.sender.is_full()
	}
}

/// Synchronizer-facing end of the ingress queue
pub struct IngressReceiver {
	receiver: Receiver<PeerEvent>,
}

impl IngressReceiver {
	/// Wait up to `timeout` for the next event
	///
	/// The timeout lets the synchronizer loop interleave shutdown
	/// checks without spinning.
	pub fn recv_timeout(&self, timeout: Duration) -> Result<PeerEvent, IngressError> {
		self.receiver.recv_timeout(timeout).map_err(|e| match e {
			RecvTimeoutError::Timeout => IngressError::TimedOut,
			RecvTimeoutError::Disconnected => IngressError::Disconnected,
		})
	}

	pub fn len(&self) -> usize {
		self.receiver.len()
	}

	pub fn is_empty(&self) -> bool {
		self.receiver.is_empty()
	}
}

/// Errors on the ingress queue
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum IngressError {
	#[error("ingress queue is full")]
	Full,
	#[error("ingress queue timed out")]
	TimedOut,
	#[error("ingress queue disconnected")]
	Disconnected,
}
