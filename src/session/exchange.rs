//! Key-exchange message construction and verification (spec.md §4.2, §4.3).

use crate::crypto::keys::{verify, Identity};
use crate::crypto::{kdf, keys::X25519KeyPair};
use crate::error::{Error, Result};
use crate::protocol::constants::MAX_KEY_EXCHANGE_AGE;
use crate::protocol::messages::{KeyExchangeContent, KeyExchangeMessage};
use crate::protocol::now_millis;

use super::state::SessionKeys;

/// Build and sign a `key_exchange` control message (spec.md §4.2).
pub fn build_message(
    identity: &Identity,
    content: KeyExchangeContent,
    ephemeral_public_key: [u8; 32],
    username: &str,
    reason: Option<String>,
) -> KeyExchangeMessage {
    let mut msg = KeyExchangeMessage {
        content,
        ephemeral_public_key,
        sender_username: username.to_string(),
        timestamp: now_millis(),
        signature: [0u8; 64],
        reason,
    };
    let bytes = msg.signing_bytes();
    msg.signature = identity.signing.sign(&bytes).to_bytes();
    msg
}

/// Verify freshness and signature of an inbound key-exchange message
/// (spec.md §4.2: "rejects stale timestamps", "rejects bad signatures").
pub fn verify_message(msg: &KeyExchangeMessage, sender_signing_key: &[u8; 32]) -> Result<()> {
    let age = now_millis().saturating_sub(msg.timestamp);
    if age > MAX_KEY_EXCHANGE_AGE.as_millis() as u64 {
        return Err(Error::Protocol("key exchange message is stale".into()));
    }
    verify(sender_signing_key, &msg.signing_bytes(), &msg.signature)
}

/// Derive directional session keys from our ephemeral secret, our ephemeral
/// public key, the peer's ephemeral public key, and our literal role in the
/// handshake (spec.md §4.2 "Role mapping": "initiator uses (sending=k1,
/// receiving=k2); responder uses (sending=k2, receiving=k1)". The salt
/// `kdf::derive_session_keys` folds in is already sorted independent of
/// argument order, so `k1`/`k2` come out identical on both sides; only the
/// role decides which one each side sends with.
pub fn derive_session_keys(
    our_ephemeral: &X25519KeyPair,
    our_ephemeral_public: &[u8; 32],
    peer_ephemeral_public: &[u8; 32],
    is_initiator: bool,
) -> SessionKeys {
    let shared_secret = our_ephemeral.diffie_hellman(peer_ephemeral_public);
    let (k1, k2) = kdf::derive_session_keys(&shared_secret, our_ephemeral_public, peer_ephemeral_public);
    if is_initiator {
        SessionKeys {
            sending_key: k1,
            receiving_key: k2,
        }
    } else {
        SessionKeys {
            sending_key: k2,
            receiving_key: k1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_sides_derive_complementary_keys() {
        let alice_ephemeral = X25519KeyPair::generate();
        let bob_ephemeral = X25519KeyPair::generate();
        let alice_pub = alice_ephemeral.public_bytes();
        let bob_pub = bob_ephemeral.public_bytes();

        let alice_keys = derive_session_keys(&alice_ephemeral, &alice_pub, &bob_pub, true);
        let bob_keys = derive_session_keys(&bob_ephemeral, &bob_pub, &alice_pub, false);

        assert_eq!(alice_keys.sending_key, bob_keys.receiving_key);
        assert_eq!(alice_keys.receiving_key, bob_keys.sending_key);
    }

    #[test]
    fn build_message_verifies_with_correct_key() {
        let identity = Identity::generate();
        let msg = build_message(
            &identity,
            KeyExchangeContent::KeyExchangeInit,
            [7u8; 32],
            "alice",
            None,
        );
        verify_message(&msg, &identity.signing.public_bytes()).unwrap();
    }

    #[test]
    fn stale_message_is_rejected() {
        let identity = Identity::generate();
        let mut msg = build_message(
            &identity,
            KeyExchangeContent::KeyExchangeInit,
            [7u8; 32],
            "alice",
            None,
        );
        msg.timestamp = 0;
        let bytes = msg.signing_bytes();
        msg.signature = identity.signing.sign(&bytes).to_bytes();
        assert!(verify_message(&msg, &identity.signing.public_bytes()).is_err());
    }
}
