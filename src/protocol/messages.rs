//! Wire messages for the chat protocol (spec.md §4.2, §4.3, §6).
//!
//! Tagged sums decoded by `serde`, handled by pattern match — the teacher's
//! "dynamic dispatch → tagged variants" idiom from `protocol::p2p_messages`
//! (`ConsensusPayload`), re-targeted to this crate's two message families.

use serde::{Deserialize, Serialize};

use crate::crypto::encoding;

/// One framed message on the `/kiyeovo/1.0.0/chat` stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChatMessage {
    #[serde(rename = "key_exchange")]
    KeyExchange(KeyExchangeMessage),
    #[serde(rename = "encrypted")]
    Encrypted(EncryptedMessage),
}

/// The `content` discriminant inside a `key_exchange` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyExchangeContent {
    KeyExchangeInit,
    KeyExchangeResponse,
    KeyExchangeRejected,
    KeyRotation,
    KeyRotationResponse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyExchangeMessage {
    pub content: KeyExchangeContent,
    #[serde(with = "encoding::array32")]
    pub ephemeral_public_key: [u8; 32],
    pub sender_username: String,
    pub timestamp: u64,
    #[serde(with = "encoding::array64")]
    pub signature: [u8; 64],
    /// Present only on `key_exchange_rejected` (and optionally on a
    /// `file_offer_response`-style decline path the sender wants to explain).
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reason: Option<String>,
}

impl KeyExchangeMessage {
    /// Bytes signed by the sender: every field except `signature`, in
    /// declaration order (spec.md §4.2 "canonical serialization").
    pub fn signing_bytes(&self) -> Vec<u8> {
        #[derive(Serialize)]
        struct Signed<'a> {
            content: KeyExchangeContent,
            #[serde(with = "encoding::array32")]
            ephemeral_public_key: [u8; 32],
            sender_username: &'a str,
            timestamp: u64,
            reason: &'a Option<String>,
        }
        serde_json::to_vec(&Signed {
            content: self.content,
            ephemeral_public_key: self.ephemeral_public_key,
            sender_username: &self.sender_username,
            timestamp: self.timestamp,
            reason: &self.reason,
        })
        .expect("serializing a plain struct to JSON cannot fail")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedMessage {
    #[serde(with = "encoding::bytes")]
    pub content: Vec<u8>,
    #[serde(with = "encoding::array24")]
    pub nonce: [u8; 24],
    pub sender_username: String,
    pub timestamp: u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[serde(with = "encoding::opt_array64")]
    pub signature: Option<[u8; 64]>,
    /// Advances the sender's `offline_last_ack_sent` for the recipient
    /// (spec.md §4.4 receive path).
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub offline_ack_timestamp: Option<u64>,
}
