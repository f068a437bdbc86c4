//! Identity keypairs: long-term Ed25519 signing key and X25519 offline key.
//!
//! Grounded on the teacher's `crypto::keys::{SigningKeyPair, NoiseKeyPair,
//! BitchatIdentity}` triad. The teacher fakes X25519 by hashing the private
//! scalar; here we use `x25519-dalek` for a real Diffie-Hellman keypair,
//! since the spec's key exchange depends on actual ECDH.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use x25519_dalek::{PublicKey as XPublicKey, StaticSecret as XStaticSecret};
use zeroize::Zeroizing;

use crate::error::{Error, Result};
use crate::protocol::PeerId;

/// Ed25519 long-term signing keypair.
#[derive(Clone)]
pub struct SigningKeyPair {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl SigningKeyPair {
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
        }
    }

    pub fn from_bytes(secret: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(secret);
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
        }
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.verifying_key
    }

    pub fn public_bytes(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }
}

/// Verify a signature against a raw 32-byte Ed25519 public key.
pub fn verify(public_key: &[u8; 32], message: &[u8], signature: &[u8; 64]) -> Result<()> {
    let verifying_key = VerifyingKey::from_bytes(public_key)
        .map_err(|e| Error::InvalidSignature(e.to_string()))?;
    let sig = Signature::from_bytes(signature);
    verifying_key
        .verify(message, &sig)
        .map_err(|e| Error::InvalidSignature(e.to_string()))
}

/// X25519 keypair, used both for the long-lived offline-encryption key and
/// for per-exchange ephemeral keys.
pub struct X25519KeyPair {
    secret: XStaticSecret,
    public: XPublicKey,
}

impl Clone for X25519KeyPair {
    fn clone(&self) -> Self {
        Self {
            secret: XStaticSecret::from(self.secret.to_bytes()),
            public: self.public,
        }
    }
}

impl X25519KeyPair {
    pub fn generate() -> Self {
        let mut bytes = Zeroizing::new([0u8; 32]);
        OsRng.fill_bytes(bytes.as_mut());
        let secret = XStaticSecret::from(*bytes);
        let public = XPublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn from_bytes(secret: [u8; 32]) -> Self {
        let secret = XStaticSecret::from(secret);
        let public = XPublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public_bytes(&self) -> [u8; 32] {
        self.public.to_bytes()
    }

    /// Diffie-Hellman against a remote public key.
    pub fn diffie_hellman(&self, remote_public: &[u8; 32]) -> [u8; 32] {
        let remote = XPublicKey::from(*remote_public);
        self.secret.diffie_hellman(&remote).to_bytes()
    }
}

/// Process-lifetime identity: one signing keypair, one offline-encryption
/// keypair (spec.md §3 "Identity").
#[derive(Clone)]
pub struct Identity {
    pub signing: SigningKeyPair,
    pub offline: X25519KeyPair,
}

impl Identity {
    pub fn generate() -> Self {
        Self {
            signing: SigningKeyPair::generate(),
            offline: X25519KeyPair::generate(),
        }
    }

    pub fn peer_id(&self) -> PeerId {
        PeerId::from_signing_public_key(&self.signing.public_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_roundtrip() {
        let identity = Identity::generate();
        let msg = b"hello";
        let sig = identity.signing.sign(msg);
        verify(&identity.signing.public_bytes(), msg, &sig.to_bytes()).unwrap();
    }

    #[test]
    fn dh_is_symmetric() {
        let a = X25519KeyPair::generate();
        let b = X25519KeyPair::generate();
        assert_eq!(
            a.diffie_hellman(&b.public_bytes()),
            b.diffie_hellman(&a.public_bytes())
        );
    }
}
