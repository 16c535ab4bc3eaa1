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

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bazaar_sdk::secret::{Commitment, Secret};
use dashmap::DashMap;

use super::{ChainClient, ChainError, LockHandle};

/// In-memory chain for tests
///
/// One instance models the shared chain: both counterparties of a
/// scenario hold the same `Arc<MemoryChain>`, so a claim by one side
/// is visible to the other. Locks reach finality instantly; expiry is
/// wall-clock based on the timeout passed to `lock`.
///
/// Failure injection:
/// - `set_fail_locks` makes every `lock` call fail with
///   `InsufficientFunds`
/// - `inject_claim_failures` / `inject_refund_failures` make the next
///   N calls fail with the transient `Unavailable`, which exercises
///   the coordinator's backoff and stuck-session paths
#[derive(Default)]
pub struct MemoryChain {
	locks: DashMap<String, LockEntry>,
	next_id: AtomicU32,
	fail_locks: AtomicBool,
	claim_failures: AtomicU32,
	refund_failures: AtomicU32,
}

struct LockEntry {
	commitment: Commitment,
	expires_at: Instant,
	state: LockState,
}

enum LockState {
	Locked,
	Claimed(Secret),
	Refunded,
}

impl MemoryChain {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn set_fail_locks(&self, fail: bool) {
		self.fail_locks.store(fail, Ordering::Relaxed);
	}

	pub fn inject_claim_failures(&self, count: u32) {
		self.claim_failures.store(count, Ordering::Relaxed);
	}

	pub fn inject_refund_failures(&self, count: u32) {
		self.refund_failures.store(count, Ordering::Relaxed);
	}

	/// Whether a lock ended up claimed
	pub fn is_claimed(&self, lock_id: &str) -> bool {
		self.locks
			.get(lock_id)
			.map(|e| matches!(e.state, LockState::Claimed(_)))
			.unwrap_or(false)
	}

	/// Whether a lock ended up refunded
	pub fn is_refunded(&self, lock_id: &str) -> bool {
		self.locks
			.get(lock_id)
			.map(|e| matches!(e.state, LockState::Refunded))
			.unwrap_or(false)
	}

	pub fn lock_count(&self) -> usize {
		self.locks.len()
	}

	fn take_injected(counter: &AtomicU32) -> bool {
		counter
			.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
			.is_ok()
	}
}

#[async_trait]
impl ChainClient for MemoryChain {
	async fn lock(
		&self,
		asset: &str,
		amount: u64,
		commitment: &Commitment,
		timeout: Duration,
	) -> Result<LockHandle, ChainError> {
		if self.fail_locks.load(Ordering::Relaxed) {
			return Err(ChainError::InsufficientFunds);
		}

		let lock_id = format!("lock-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
		let expires_at = Instant::now() + timeout;
		self.locks.insert(
			lock_id.clone(),
			LockEntry {
				commitment: commitment.clone(),
				expires_at,
				state: LockState::Locked,
			},
		);

		Ok(LockHandle {
			lock_id,
			asset: asset.to_string(),
			amount,
			expires_at,
		})
	}

	async fn await_finality(&self, lock_id: &str) -> Result<(), ChainError> {
		// Instant finality
		if self.locks.contains_key(lock_id) {
			Ok(())
		} else {
			Err(ChainError::NoSuchLock(lock_id.to_string()))
		}
	}

	async fn claim(&self, lock_id: &str, secret: &Secret) -> Result<(), ChainError> {
		if Self::take_injected(&self.claim_failures) {
			return Err(ChainError::Unavailable("injected claim failure".to_string()));
		}

		let mut entry = self
			.locks
			.get_mut(lock_id)
			.ok_or_else(|| ChainError::NoSuchLock(lock_id.to_string()))?;
		match entry.state {
			LockState::Claimed(_) => return Err(ChainError::AlreadyClaimed),
			LockState::Refunded => return Err(ChainError::AlreadyRefunded),
			LockState::Locked => {}
		}
		if Instant::now() >= entry.expires_at {
			return Err(ChainError::Expired);
		}
		if !entry.commitment.matches(secret) {
			return Err(ChainError::BadSecret);
		}

		entry.state = LockState::Claimed(secret.clone());
		Ok(())
	}

	async fn refund(&self, lock_id: &str) -> Result<(), ChainError> {
		if Self::take_injected(&self.refund_failures) {
			return Err(ChainError::Unavailable(
				"injected refund failure".to_string(),
			));
		}

		let mut entry = self
			.locks
			.get_mut(lock_id)
			.ok_or_else(|| ChainError::NoSuchLock(lock_id.to_string()))?;
		match entry.state {
			LockState::Claimed(_) => return Err(ChainError::AlreadyClaimed),
			LockState::Refunded => return Err(ChainError::AlreadyRefunded),
			LockState::Locked => {}
		}
		if Instant::now() < entry.expires_at {
			return Err(ChainError::NotExpired);
		}

		entry.state = LockState::Refunded;
		Ok(())
	}

	async fn revealed_secret(&self, lock_id: &str) -> Result<Option<Secret>, ChainError> {
		let entry = self
			.locks
			.get(lock_id)
			.ok_or_else(|| ChainError::NoSuchLock(lock_id.to_string()))?;
		match &entry.state {
			LockState::Claimed(secret) => Ok(Some(secret.clone())),
			_ => Ok(None),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const FAR: Duration = Duration::from_secs(60);

	#[tokio::test]
	async fn test_lock_claim_reveals_secret() {
		let chain = MemoryChain::new();
		let secret = Secret::generate();

		let handle = chain
			.lock("wood", 10, &secret.commitment(), FAR)
			.await
			.unwrap();
		chain.await_finality(&handle.lock_id).await.unwrap();

		assert!(chain
			.revealed_secret(&handle.lock_id)
			.await
			.unwrap()
			.is_none());

		chain.claim(&handle.lock_id, &secret).await.unwrap();

		let revealed = chain.revealed_secret(&handle.lock_id).await.unwrap();
		assert_eq!(revealed, Some(secret));
		assert!(chain.is_claimed(&handle.lock_id));
	}

	#[tokio::test]
	async fn test_claim_with_wrong_secret_fails() {
		let chain = MemoryChain::new();
		let secret = Secret::generate();

		let handle = chain
			.lock("wood", 10, &secret.commitment(), FAR)
			.await
			.unwrap();

		let wrong = Secret::generate();
		assert!(matches!(
			chain.claim(&handle.lock_id, &wrong).await,
			Err(ChainError::BadSecret)
		));
	}

	#[tokio::test]
	async fn test_refund_gated_on_expiry() {
		let chain = MemoryChain::new();
		let secret = Secret::generate();

		let handle = chain
			.lock("wood", 10, &secret.commitment(), Duration::from_millis(30))
			.await
			.unwrap();

		assert!(matches!(
			chain.refund(&handle.lock_id).await,
			Err(ChainError::NotExpired)
		));

		tokio::time::sleep(Duration::from_millis(50)).await;

		chain.refund(&handle.lock_id).await.unwrap();
		assert!(chain.is_refunded(&handle.lock_id));
		// The expired lock can no longer be claimed
		assert!(matches!(
			chain.claim(&handle.lock_id, &secret).await,
			Err(ChainError::AlreadyRefunded)
		));
	}

	#[tokio::test]
	async fn test_claim_after_expiry_fails() {
		let chain = MemoryChain::new();
		let secret = Secret::generate();

		let handle = chain
			.lock("wood", 10, &secret.commitment(), Duration::from_millis(20))
			.await
			.unwrap();
		tokio::time::sleep(Duration::from_millis(40)).await;

		assert!(matches!(
			chain.claim(&handle.lock_id, &secret).await,
			Err(ChainError::Expired)
		));
	}

	#[tokio::test]
	async fn test_refund_after_claim_reports_claimed() {
		let chain = MemoryChain::new();
		let secret = Secret::generate();

		let handle = chain
			.lock("wood", 10, &secret.commitment(), Duration::from_millis(30))
			.await
			.unwrap();
		chain.claim(&handle.lock_id, &secret).await.unwrap();
		tokio::time::sleep(Duration::from_millis(50)).await;

		assert!(matches!(
			chain.refund(&handle.lock_id).await,
			Err(ChainError::AlreadyClaimed)
		));
	}

	#[tokio::test]
	async fn test_injected_failures_are_transient() {
		let chain = MemoryChain::new();
		let secret = Secret::generate();
		let handle = chain
			.lock("wood", 10, &secret.commitment(), FAR)
			.await
			.unwrap();

		chain.inject_claim_failures(1);
		let first = chain.claim(&handle.lock_id, &secret).await;
		assert!(matches!(first, Err(ChainError::Unavailable(_))));
		assert!(first.unwrap_err().is_transient());

		chain.claim(&handle.lock_id, &secret).await.unwrap();
	}

	#[tokio::test]
	async fn test_failed_lock_injection() {
		let chain = MemoryChain::new();
		chain.set_fail_locks(true);

		let result = chain
			.lock("wood", 10, &Secret::generate().commitment(), FAR)
			.await;
		assert!(matches!(result, Err(ChainError::InsufficientFunds)));
	}
}
