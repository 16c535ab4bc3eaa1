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

//! Bazaar swap coordinator
//!
//! Drives the two-party atomic-swap handshake for one proposed trade:
//! negotiation over direct messaging, hash-locked chain locks on both
//! sides, claim/refund resolution. The protocol guarantees that a trade
//! either completes fully on the chain for both sides or leaves both
//! sides unaffected - a counterparty that disappears can cost time,
//! never funds.
//!
//! Architecture:
//! - One tokio task per in-flight session; inbound messages are routed
//!   by session id
//! - The order ledger's lock acquisition is the only thing that can
//!   reserve an order, so concurrent proposals on the same order
//!   resolve to one winner
//! - The chain is abstracted behind [`chain::ChainClient`]; the
//!   coordinator never sees a concrete cryptographic scheme
//! - Claim/refund faults are retried with backoff; a session that still
//!   cannot resolve is surfaced as `Stuck` because its funds may remain
//!   time-locked

pub mod chain;
pub mod config;
pub mod coordinator;
pub mod retry;
pub mod session;

pub use chain::{ChainClient, ChainError, LockHandle, MemoryChain};
pub use config::SwapConfig;
pub use coordinator::SwapCoordinator;
pub use retry::RetryPolicy;
pub use session::{SessionOutcome, SessionState, SwapError};
