//! Sealed-box encryption under a recipient's long-term X25519 public key
//! (spec.md §4.5: `encrypted_sender_info`, `content` in an `OfflineMessage`).
//!
//! There is no interactive session to derive from here — the sender may not
//! even share a live connection with the recipient — so each message picks a
//! fresh ephemeral X25519 keypair, derives a one-shot key via ECDH + HKDF,
//! and prepends its ephemeral public key to the ciphertext so the recipient
//! can reverse the derivation with only their long-term secret key. Same
//! shape as libsodium's `crypto_box_seal`, built from the primitives already
//! in this crate (`crypto::keys`, `crypto::aead`) rather than a new
//! dependency.

use crate::crypto::aead;
use crate::crypto::keys::X25519KeyPair;
use crate::error::{Error, Result};

const SEALED_BOX_INFO: &[u8] = b"kiyeovo-sealed-box";

fn derive_key(shared_secret: &[u8; 32], ephemeral_pub: &[u8; 32], recipient_pub: &[u8; 32]) -> [u8; 32] {
    use hkdf::Hkdf;
    use sha2::Sha256;

    let mut salt = Vec::with_capacity(64);
    salt.extend_from_slice(ephemeral_pub);
    salt.extend_from_slice(recipient_pub);

    let hk = Hkdf::<Sha256>::new(Some(&salt), shared_secret);
    let mut out = [0u8; 32];
    hk.expand(SEALED_BOX_INFO, &mut out)
        .expect("32-byte output is within RFC 5869 bounds");
    out
}

/// Seal `plaintext` so only the holder of `recipient_public` can open it.
/// Output layout: `ephemeral_public (32) || nonce (24) || ciphertext`.
pub fn seal(recipient_public: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>> {
    let ephemeral = X25519KeyPair::generate();
    let shared = ephemeral.diffie_hellman(recipient_public);
    let key = derive_key(&shared, &ephemeral.public_bytes(), recipient_public);
    let (nonce, ciphertext) = aead::encrypt(&key, plaintext)?;

    let mut out = Vec::with_capacity(32 + aead::NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&ephemeral.public_bytes());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Open a sealed box using the recipient's long-term X25519 secret key.
pub fn unseal(recipient_keypair: &X25519KeyPair, sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < 32 + aead::NONCE_LEN {
        return Err(Error::Crypto("sealed box too short".into()));
    }
    let mut ephemeral_pub = [0u8; 32];
    ephemeral_pub.copy_from_slice(&sealed[..32]);
    let mut nonce = [0u8; aead::NONCE_LEN];
    nonce.copy_from_slice(&sealed[32..32 + aead::NONCE_LEN]);
    let ciphertext = &sealed[32 + aead::NONCE_LEN..];

    let shared = recipient_keypair.diffie_hellman(&ephemeral_pub);
    let key = derive_key(&shared, &ephemeral_pub, &recipient_keypair.public_bytes());
    aead::decrypt(&key, &nonce, ciphertext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_unseal_roundtrip() {
        let recipient = X25519KeyPair::generate();
        let plaintext = b"offline message payload";
        let sealed = seal(&recipient.public_bytes(), plaintext).unwrap();
        let opened = unseal(&recipient, &sealed).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn wrong_recipient_cannot_open() {
        let recipient = X25519KeyPair::generate();
        let attacker = X25519KeyPair::generate();
        let sealed = seal(&recipient.public_bytes(), b"secret").unwrap();
        assert!(unseal(&attacker, &sealed).is_err());
    }
}
