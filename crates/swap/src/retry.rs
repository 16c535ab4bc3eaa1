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

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::chain::ChainError;

/// Bounded exponential backoff for chain operations
#[derive(Debug, Clone)]
pub struct RetryPolicy {
	pub max_attempts: u32,
	pub initial_backoff: Duration,
	pub max_backoff: Duration,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_attempts: 5,
			initial_backoff: Duration::from_millis(200),
			max_backoff: Duration::from_secs(5),
		}
	}
}

/// Run a chain operation, retrying transient faults with backoff
///
/// Non-transient errors return immediately: a `BadSecret` or
/// `AlreadyClaimed` will not get better by waiting. Exhausting the
/// attempts returns the last transient error to the caller, which
/// decides whether that leaves funds at risk.
pub async fn with_backoff<T, F, Fut>(
	policy: &RetryPolicy,
	what: &str,
	mut op: F,
) -> Result<T, ChainError>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = Result<T, ChainError>>,
{
	let mut backoff = policy.initial_backoff;
	let mut attempt = 1;

	loop {
		match op().await {
			Ok(value) => return Ok(value),
			Err(e) if e.is_transient() && attempt < policy.max_attempts => {
				warn!(
					"{} failed (attempt {}/{}), retrying in {:?}: {}",
					what, attempt, policy.max_attempts, backoff, e
				);
				tokio::time::sleep(backoff).await;
				backoff = (backoff * 2).min(policy.max_backoff);
				attempt += 1;
			}
			Err(e) => return Err(e),
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicU32, Ordering};

	use super::*;

	fn quick() -> RetryPolicy {
		RetryPolicy {
			max_attempts: 3,
			initial_backoff: Duration::from_millis(1),
			max_backoff: Duration::from_millis(4),
		}
	}

	#[tokio::test]
	async fn test_succeeds_after_transient_failures() {
		let calls = AtomicU32::new(0);

		let result = with_backoff(&quick(), "op", || {
			let n = calls.fetch_add(1, Ordering::Relaxed);
			async move {
				if n < 2 {
					Err(ChainError::Unavailable("flaky".to_string()))
				} else {
					Ok(42u32)
				}
			}
		})
		.await;

		assert_eq!(result.unwrap(), 42);
		assert_eq!(calls.load(Ordering::Relaxed), 3);
	}

	#[tokio::test]
	async fn test_gives_up_after_max_attempts() {
		let calls = AtomicU32::new(0);

		let result: Result<(), ChainError> = with_backoff(&quick(), "op", || {
			calls.fetch_add(1, Ordering::Relaxed);
			async { Err(ChainError::Unavailable("down".to_string())) }
		})
		.await;

		assert!(matches!(result, Err(ChainError::Unavailable(_))));
		assert_eq!(calls.load(Ordering::Relaxed), 3);
	}

	#[tokio::test]
	async fn test_permanent_errors_fail_fast() {
		let calls = AtomicU32::new(0);

		let result: Result<(), ChainError> = with_backoff(&quick(), "op", || {
			calls.fetch_add(1, Ordering::Relaxed);
			async { Err(ChainError::BadSecret) }
		})
		.await;

		assert!(matches!(result, Err(ChainError::BadSecret)));
		assert_eq!(calls.load(Ordering::Relaxed), 1);
	}
}
