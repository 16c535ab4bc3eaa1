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

use bazaar_orderbook::SyncConfig;
use bazaar_swap::{RetryPolicy, SwapConfig};
use serde::{Deserialize, Serialize};

/// Node configuration
///
/// All fields have working defaults; partial overrides come from a
/// config file or `BAZAAR_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
	/// Trading identity of this peer
	pub account: String,
	/// Shared room carrying announce/retract traffic
	pub order_room: String,
	/// Asset the buy side of every trade pays with
	pub settlement_asset: String,
	/// Capacity of the transport-event ingress queue
	pub ingress_capacity: usize,
	/// Capacity of the delta feed to subscribers
	pub delta_capacity: usize,
	/// Seconds an open order may rest before expiring; 0 disables
	/// expiry
	pub order_ttl_secs: u64,
	/// Interval of the expiry sweep
	pub expiry_sweep_secs: u64,
	pub response_timeout_ms: u64,
	pub counter_lock_timeout_ms: u64,
	pub initiator_lock_timeout_ms: u64,
	pub responder_lock_timeout_ms: u64,
	pub secret_poll_interval_ms: u64,
	pub retry_max_attempts: u32,
	pub retry_initial_backoff_ms: u64,
	pub retry_max_backoff_ms: u64,
}

impl Default for NodeConfig {
	fn default() -> Self {
		Self {
			account: "trader".to_string(),
			order_room: "orders".to_string(),
			settlement_asset: "gold".to_string(),
			ingress_capacity: 1024,
			delta_capacity: 1024,
			order_ttl_secs: 3600,
			expiry_sweep_secs: 60,
			response_timeout_ms: 30_000,
			counter_lock_timeout_ms: 120_000,
			initiator_lock_timeout_ms: 1_200_000,
			responder_lock_timeout_ms: 600_000,
			secret_poll_interval_ms: 500,
			retry_max_attempts: 5,
			retry_initial_backoff_ms: 200,
			retry_max_backoff_ms: 5_000,
		}
	}
}

impl NodeConfig {
	/// Load configuration from environment variables
	pub fn from_env() -> Result<Self, config::ConfigError> {
		let cfg = config::Config::builder()
			.add_source(config::Environment::with_prefix("BAZAAR"))
			.build()?;

		cfg.try_deserialize()
	}

	/// Load configuration from file, with environment overrides
	pub fn from_file(path: &str) -> Result<Self, config::ConfigError> {
		let cfg = config::Config::builder()
			.add_source(config::File::with_name(path))
			.add_source(config::Environment::with_prefix("BAZAAR"))
			.build()?;

		cfg.try_deserialize()
	}

	pub fn sync_config(&self) -> SyncConfig {
		SyncConfig {
			order_room: self.order_room.clone(),
		}
	}

	pub fn swap_config(&self) -> SwapConfig {
		SwapConfig {
			settlement_asset: self.settlement_asset.clone(),
			response_timeout: Duration::from_millis(self.response_timeout_ms),
			counter_lock_timeout: Duration::from_millis(self.counter_lock_timeout_ms),
			initiator_lock_timeout: Duration::from_millis(self.initiator_lock_timeout_ms),
			responder_lock_timeout: Duration::from_millis(self.responder_lock_timeout_ms),
			secret_poll_interval: Duration::from_millis(self.secret_poll_interval_ms),
			retry: RetryPolicy {
				max_attempts: self.retry_max_attempts,
				initial_backoff: Duration::from_millis(self.retry_initial_backoff_ms),
				max_backoff: Duration::from_millis(self.retry_max_backoff_ms),
			},
		}
	}
}
