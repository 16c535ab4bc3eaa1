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

//! Bazaar SDK - shared types for the peer-to-peer trading layer
//!
//! This crate holds everything that is common to the order book and the
//! swap protocol: the order model, the peer wire protocol, the messaging
//! collaborator interface (with an in-memory transport for tests), and
//! the secret/commitment primitives used by the hash-locked swap.
//!
//! The SDK is designed to be lightweight and embeddable:
//! - No background threads
//! - No runtime initialization
//! - No environment or configuration loading

pub mod messaging;
pub mod secret;
pub mod types;
pub mod wire;

pub use messaging::{MemoryPeer, MemoryTransport, Messenger, PublishError};
pub use secret::{Commitment, Secret};
pub use types::*;
pub use wire::{DecodeError, PeerEvent, PeerMessage, SwapMessage, direct_room};
