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

//! Bazaar node
//!
//! The composition root of one trading peer: wires the order ledger,
//! the synchronizer, the matcher and the swap coordinator together
//! behind a single handle. Embedders supply the two collaborators -
//! a messaging transport and a chain client - and feed inbound
//! transport events into the node's ingress queue.
//!
//! The node owns no network stack and no binary; it is a library
//! facade the way a daemon would embed it.

pub mod config;
pub mod logging;
pub mod node;

pub use config::NodeConfig;
pub use logging::init_logging;
pub use node::{Node, NodeError};
