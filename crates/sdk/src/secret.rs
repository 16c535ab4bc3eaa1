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

//! Hash-lock primitives for the atomic swap
//!
//! The initiator of a swap generates a [`Secret`] and publishes only its
//! SHA-256 [`Commitment`]. Both chain locks are created under the same
//! commitment; claiming either lock reveals the secret and thereby
//! enables the counter-claim. The concrete on-chain scheme is chain
//! dependent and lives behind the chain collaborator interface; these
//! types only fix the commitment function and wire encoding.

use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Byte length of secrets and commitments
pub const SECRET_LEN: usize = 32;

/// Invalid hex form of a secret or commitment
#[derive(Debug, Error)]
#[error("invalid hex encoding: {0}")]
pub struct ParseHexError(String);

/// The preimage revealed when a lock is claimed
#[derive(Clone, PartialEq, Eq)]
pub struct Secret([u8; SECRET_LEN]);

impl Secret {
	/// Generate a fresh random secret
	pub fn generate() -> Self {
		let mut bytes = [0u8; SECRET_LEN];
		rand::thread_rng().fill_bytes(&mut bytes);
		Self(bytes)
	}

	/// The commitment this secret opens
	pub fn commitment(&self) -> Commitment {
		let digest = Sha256::digest(self.0);
		let mut bytes = [0u8; SECRET_LEN];
		bytes.copy_from_slice(&digest);
		Commitment(bytes)
	}

	/// Hex form for the wire
	pub fn to_hex(&self) -> String {
		hex::encode(self.0)
	}

	/// Parse the hex wire form
	pub fn from_hex(s: &str) -> Result<Self, ParseHexError> {
		let bytes: [u8; SECRET_LEN] = hex::decode(s)
			.map_err(|e| ParseHexError(e.to_string()))?
			.try_into()
			.map_err(|_| ParseHexError(format!("expected {} bytes", SECRET_LEN)))?;
		Ok(Self(bytes))
	}
}

// The preimage must not leak into logs
impl std::fmt::Debug for Secret {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "Secret(..)")
	}
}

/// SHA-256 hash-lock commitment
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Commitment([u8; SECRET_LEN]);

impl Commitment {
	/// Check whether a revealed secret opens this commitment
	pub fn matches(&self, secret: &Secret) -> bool {
		secret.commitment() == *self
	}

	/// Hex form for the wire
	pub fn to_hex(&self) -> String {
		hex::encode(self.0)
	}

	/// Parse the hex wire form
	pub fn from_hex(s: &str) -> Result<Self, ParseHexError> {
		let bytes: [u8; SECRET_LEN] = hex::decode(s)
			.map_err(|e| ParseHexError(e.to_string()))?
			.try_into()
			.map_err(|_| ParseHexError(format!("expected {} bytes", SECRET_LEN)))?;
		Ok(Self(bytes))
	}
}
