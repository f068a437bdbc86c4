//! XChaCha20-Poly1305 AEAD helpers (spec.md §4.3).
//!
//! Grounded on the teacher's `crypto::encryption::Encryption` (ChaCha20Poly1305
//! with a random 12-byte nonce prepended to the ciphertext); generalized to
//! XChaCha20Poly1305's 24-byte nonce, which the spec requires for session
//! messages and file chunks alike.

use chacha20poly1305::aead::{Aead, KeyInit, OsRng};
use chacha20poly1305::{AeadCore, XChaCha20Poly1305, XNonce};

use crate::error::{Error, Result};

pub const NONCE_LEN: usize = 24;

/// Encrypt `plaintext` under `key`, returning a fresh random nonce and the
/// ciphertext (tag included, per the `chacha20poly1305` crate's convention).
pub fn encrypt(key: &[u8; 32], plaintext: &[u8]) -> Result<([u8; NONCE_LEN], Vec<u8>)> {
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| Error::Crypto("AEAD encryption failed".into()))?;
    let mut nonce_bytes = [0u8; NONCE_LEN];
    nonce_bytes.copy_from_slice(nonce.as_slice());
    Ok((nonce_bytes, ciphertext))
}

/// Decrypt `ciphertext` under `key` and `nonce`.
pub fn decrypt(key: &[u8; 32], nonce: &[u8; NONCE_LEN], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce = XNonce::from_slice(nonce);
    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| Error::Crypto("AEAD decryption failed".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let key = [3u8; 32];
        let plaintext = b"hello, kiyeovo";
        let (nonce, ciphertext) = encrypt(&key, plaintext).unwrap();
        let decrypted = decrypt(&key, &nonce, &ciphertext).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let key = [3u8; 32];
        let (nonce, mut ciphertext) = encrypt(&key, b"hello").unwrap();
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0xFF;
        assert!(decrypt(&key, &nonce, &ciphertext).is_err());
    }

    #[test]
    fn wrong_key_fails() {
        let key = [3u8; 32];
        let (nonce, ciphertext) = encrypt(&key, b"hello").unwrap();
        assert!(decrypt(&[9u8; 32], &nonce, &ciphertext).is_err());
    }
}
