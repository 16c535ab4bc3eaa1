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

//! Bazaar order book
//!
//! This crate maintains the local view of the decentralized order book:
//! an in-memory ledger of every peer's open orders, a synchronizer that
//! reconciles the ledger from the unordered stream of peer
//! announcements, and an advisory matcher that scans for compatible
//! order pairs.
//!
//! Architecture:
//! - Single mutable ledger behind one mutex; every change goes through
//!   `apply` or the lock/settle transitions
//! - Dedicated synchronizer thread draining a bounded ingress queue
//! - Per-account sequence watermarks make replayed announcements
//!   idempotent regardless of cross-account interleaving
//! - Matching is advisory; the ledger lock acquisition is the single
//!   point that reserves an order for a swap session

pub mod book;
pub mod events;
pub mod ledger;
pub mod matcher;
pub mod queue;
pub mod sync;
pub mod types;

pub use book::{AccountOrders, OrderbookByAsset, OrderbookForAsset, OrdersOfAccount};
pub use events::{DeltaBuffer, DeltaBufferError, DeltaConsumer, DeltaProducer};
pub use ledger::OrderLedger;
pub use matcher::{Matcher, OrderPair};
pub use queue::{IngressError, IngressQueue, IngressReceiver, IngressSender};
pub use sync::{SwapSink, SyncConfig, Synchronizer};
pub use types::{LedgerDelta, OrderEvent, RejectReason};
