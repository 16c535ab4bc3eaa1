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

use crate::retry::RetryPolicy;

/// Swap coordinator configuration
///
/// The initiator's chain lock must outlive the responder's: the
/// initiator claims the responder's lock first (revealing the secret),
/// and the responder then needs the remaining lifetime of the
/// initiator's lock to complete its own claim.
#[derive(Debug, Clone)]
pub struct SwapConfig {
	/// Asset the buy side pays with (quantity x price units)
	pub settlement_asset: String,
	/// How long to wait for Accept/Reject after a proposal
	pub response_timeout: Duration,
	/// How long to wait for the counterparty's lock confirmation
	pub counter_lock_timeout: Duration,
	/// Lifetime of the initiator's own chain lock
	pub initiator_lock_timeout: Duration,
	/// Lifetime of the responder's own chain lock
	pub responder_lock_timeout: Duration,
	/// Poll interval while waiting for the revealed secret
	pub secret_poll_interval: Duration,
	/// Backoff policy for transient claim/refund faults
	pub retry: RetryPolicy,
}

impl Default for SwapConfig {
	fn default() -> Self {
		Self {
			settlement_asset: "gold".to_string(),
			response_timeout: Duration::from_secs(30),
			counter_lock_timeout: Duration::from_secs(120),
			initiator_lock_timeout: Duration::from_secs(1200),
			responder_lock_timeout: Duration::from_secs(600),
			secret_poll_interval: Duration::from_millis(500),
			retry: RetryPolicy::default(),
		}
	}
}
