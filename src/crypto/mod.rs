//! Cryptographic primitives: identity keys, AEAD, KDF, sealed-box encryption.
//!
//! Layout mirrors the teacher's `crypto` module split (`keys`, `encryption`,
//! ...), re-targeted from the teacher's gaming-commitment crypto to the
//! spec's identity/session/offline-bucket crypto.

pub mod aead;
pub mod encoding;
pub mod kdf;
pub mod keys;
pub mod sealed;

pub use keys::{Identity, SigningKeyPair, X25519KeyPair};
