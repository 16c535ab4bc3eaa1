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

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError, bounded};

use crate::types::LedgerDelta;

/// Buffer carrying ledger deltas to snapshot subscribers
///
/// The synchronizer and the swap coordinator both produce into it (the
/// producer is clonable); one subscriber drains it. Deltas are an
/// advisory change feed: snapshots stay authoritative, so a full
/// buffer drops the delta rather than stalling reconciliation.
pub struct DeltaBuffer {
	sender: Sender<LedgerDelta>,
	receiver: Receiver<LedgerDelta>,
}

impl DeltaBuffer {
	pub fn new(capacity: usize) -> Self {
		let (sender, receiver) = bounded(capacity);
		Self { sender, receiver }
	}

	pub fn split(self) -> (DeltaProducer, DeltaConsumer) {
		(
			DeltaProducer {
				sender: self.sender,
			},
			DeltaConsumer {
				receiver: self.receiver,
			},
		)
	}
}

/// Producer end of the delta buffer
#[derive(Clone)]
pub struct DeltaProducer {
	sender: Sender<LedgerDelta>,
}

impl DeltaProducer {
	/// Push a delta (non-blocking)
	///
	/// `Full` means the subscriber is behind; callers log and move on.
	pub fn push(&self, delta: LedgerDelta) -> Result<(), DeltaBufferError> {
		self.sender.try_send(delta).map_err(|e| match e {
			TrySendError::Full(_) => DeltaBufferError::Full,
			TrySendError::Disconnected(_) => DeltaBufferError::Disconnected,
		})
	}
}

/// Consumer end of the delta buffer
pub struct DeltaConsumer {
	receiver: Receiver<LedgerDelta>,
}

impl DeltaConsumer {
	pub fn try_recv(&self) -> Result<LedgerDelta, DeltaBufferError> {
		self.receiver.try_recv().map_err(|e| match e {
			TryRecvError::Empty => DeltaBufferError::Empty,
			TryRecvError::Disconnected => DeltaBufferError::Disconnected,
		})
	}

	pub fn recv_timeout(&self, timeout: Duration) -> Result<LedgerDelta, DeltaBufferError> {
		self.receiver.recv_timeout(timeout).map_err(|e| match e {
			RecvTimeoutError::Timeout => DeltaBufferError::Empty,
			RecvTimeoutError::Disconnected => DeltaBufferError::Disconnected,
		})
	}

	/// Drain everything currently buffered
	pub fn drain(&self) -> Vec<LedgerDelta> {
		let mut deltas = Vec::new();
		while let Ok(delta) = self.try_recv() {
			deltas.push(delta);
		}
		deltas
	}
}

/// Errors on the delta buffer
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum DeltaBufferError {
	#[error("delta buffer is full")]
	Full,
	#[error("delta buffer is empty")]
	Empty,
	#[error("delta buffer disconnected")]
	Disconnected,
}
