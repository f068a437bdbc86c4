//! Core protocol types shared across the secure-messaging substate.
//!
//! Mirrors the teacher's `protocol` module: identifier newtypes and the
//! tagged wire-message enums live here, with sub-areas (constants, chat
//! messages) broken into their own files the way `bitcraps::protocol` splits
//! `constants`, `p2p_messages`, `craps`, etc.

pub mod constants;
pub mod messages;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Stable peer identifier: SHA-256 of the Ed25519 verifying key (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(pub [u8; 32]);

impl PeerId {
    pub fn from_signing_public_key(public_key: &[u8; 32]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"kiyeovo-peer-id");
        hasher.update(public_key);
        let digest: [u8; 32] = hasher.finalize().into();
        PeerId(digest)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hex-encoded form, used as a map key and in log lines.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Generic 256-bit hash, used for DHT keys and content hashes.
pub type Hash256 = [u8; 32];

pub fn sha256(data: &[u8]) -> Hash256 {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Validate a username per spec.md §3: 3-32 chars, `[A-Za-z0-9_]`.
pub fn is_valid_username(username: &str) -> bool {
    let len = username.len();
    (3..=32).contains(&len)
        && username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Milliseconds since the Unix epoch, used throughout signed payloads.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_validation() {
        assert!(is_valid_username("alice"));
        assert!(is_valid_username("alice_99"));
        assert!(!is_valid_username("al")); // too short
        assert!(!is_valid_username(&"a".repeat(33))); // too long
        assert!(!is_valid_username("alice-bob")); // disallowed char
    }

    #[test]
    fn peer_id_is_deterministic() {
        let key = [7u8; 32];
        assert_eq!(
            PeerId::from_signing_public_key(&key),
            PeerId::from_signing_public_key(&key)
        );
    }
}
