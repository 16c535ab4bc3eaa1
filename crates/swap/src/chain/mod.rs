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

//! Chain collaborator interface
//!
//! The swap protocol needs four primitives from the underlying ledger:
//! lock funds under a commitment with an expiry, claim a lock by
//! revealing the matching secret, refund an expired unclaimed lock,
//! and observe the secret a counterpart revealed by claiming. Anything
//! that provides those - an HTLC contract, a game-chain move, a
//! payment channel - can settle bazaar trades; the coordinator never
//! sees the concrete scheme.

mod memory;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use bazaar_sdk::secret::{Commitment, Secret};
use thiserror::Error;

pub use memory::MemoryChain;

/// Errors from the chain collaborator
///
/// Only `Unavailable` is transient; everything else reflects a final
/// decision of the chain.
#[derive(Debug, Clone, Error)]
pub enum ChainError {
	#[error("insufficient funds for lock")]
	InsufficientFunds,
	#[error("chain rejected the operation: {0}")]
	Rejected(String),
	#[error("lock has expired")]
	Expired,
	#[error("lock has not expired yet")]
	NotExpired,
	#[error("lock was already claimed")]
	AlreadyClaimed,
	#[error("lock was already refunded")]
	AlreadyRefunded,
	#[error("no such lock: {0}")]
	NoSuchLock(String),
	#[error("secret does not open the commitment")]
	BadSecret,
	#[error("chain unavailable: {0}")]
	Unavailable(String),
}

impl ChainError {
	/// Whether retrying the same call can succeed
	pub fn is_transient(&self) -> bool {
		matches!(self, ChainError::Unavailable(_))
	}
}

/// A lock this peer created on the chain
#[derive(Debug, Clone)]
pub struct LockHandle {
	/// Chain-wide lock identifier; shared with the counterparty so it
	/// can verify and claim
	pub lock_id: String,
	pub asset: String,
	pub amount: u64,
	/// When the lock becomes refundable
	pub expires_at: Instant,
}

/// Atomic-swap primitives of the external ledger
///
/// All calls may take arbitrarily long pending chain finality; callers
/// own the timeouts. Implementations must guarantee that `claim`
/// verifies the secret against the lock's commitment and that a
/// claimed lock exposes that secret through `revealed_secret`.
#[async_trait]
pub trait ChainClient: Send + Sync {
	/// Reserve `amount` of `asset` under a commitment, refundable
	/// after `timeout`
	async fn lock(
		&self,
		asset: &str,
		amount: u64,
		commitment: &Commitment,
		timeout: Duration,
	) -> Result<LockHandle, ChainError>;

	/// Wait until a lock (own or counterparty's) reaches finality
	async fn await_finality(&self, lock_id: &str) -> Result<(), ChainError>;

	/// Claim a lock by revealing the secret behind its commitment
	async fn claim(&self, lock_id: &str, secret: &Secret) -> Result<(), ChainError>;

	/// Recover an expired, unclaimed lock
	async fn refund(&self, lock_id: &str) -> Result<(), ChainError>;

	/// The secret a counterpart revealed by claiming this lock, if any
	async fn revealed_secret(&self, lock_id: &str) -> Result<Option<Secret>, ChainError>;
}
