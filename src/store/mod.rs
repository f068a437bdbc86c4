//! Persisted application state (spec.md §3 "Chat", §6) behind small trait
//! seams, mirroring the teacher's `database::repository` split between a
//! storage-agnostic trait and a concrete backend. The out-of-scope SQLite
//! backend is replaced here with an in-memory implementation; swapping in a
//! real backend later only means adding a new impl of these traits.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::protocol::PeerId;

/// Lifecycle of a chat with a peer (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatStatus {
    /// Key exchange initiated, awaiting the peer's response.
    Pending,
    /// Session established, directional AEAD keys in place.
    Established,
    /// The peer rejected the exchange, or we rejected theirs.
    Rejected,
}

/// A conversation with one peer: identity binding plus session bookkeeping
/// that outlives any single `Session` (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub peer: PeerId,
    pub peer_username: String,
    pub status: ChatStatus,
    /// Cached Ed25519 verifying key of the peer, bound at key-exchange time.
    pub peer_signing_key: [u8; 32],
    /// Cached X25519 offline (sealed-box) public key of the peer.
    pub peer_offline_key: [u8; 32],
    pub created_at: u64,
    pub updated_at: u64,
    /// Count of messages exchanged since the last key rotation (spec.md §4.3).
    pub messages_since_rotation: u64,
    pub last_rotation_at: u64,
}

impl Chat {
    pub fn new(
        peer: PeerId,
        peer_username: String,
        peer_signing_key: [u8; 32],
        peer_offline_key: [u8; 32],
        now: u64,
    ) -> Self {
        Self {
            peer,
            peer_username,
            status: ChatStatus::Pending,
            peer_signing_key,
            peer_offline_key,
            created_at: now,
            updated_at: now,
            messages_since_rotation: 0,
            last_rotation_at: now,
        }
    }
}

/// A single stored message (spec.md §3), kept for history/offline-ack
/// bookkeeping. Content is stored as already-decrypted plaintext: encryption
/// at rest is outside this crate's scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: uuid::Uuid,
    pub peer: PeerId,
    pub outgoing: bool,
    pub content: String,
    pub timestamp: u64,
    pub delivered_offline: bool,
}

/// Chat metadata repository (spec.md §3, §6).
pub trait ChatStore: Send + Sync {
    fn upsert(&self, chat: Chat) -> Result<()>;
    fn get(&self, peer: &PeerId) -> Result<Option<Chat>>;
    fn all(&self) -> Result<Vec<Chat>>;
    fn remove(&self, peer: &PeerId) -> Result<()>;
}

/// Message history repository (spec.md §3, §6).
pub trait MessageStore: Send + Sync {
    fn append(&self, message: StoredMessage) -> Result<()>;
    fn history(&self, peer: &PeerId) -> Result<Vec<StoredMessage>>;
}

/// In-memory `ChatStore`, the default backend for this crate (spec.md §1:
/// SQLite persistence is out of scope).
#[derive(Default)]
pub struct InMemoryChatStore {
    chats: RwLock<HashMap<PeerId, Chat>>,
}

impl ChatStore for InMemoryChatStore {
    fn upsert(&self, chat: Chat) -> Result<()> {
        self.chats.write().unwrap().insert(chat.peer, chat);
        Ok(())
    }

    fn get(&self, peer: &PeerId) -> Result<Option<Chat>> {
        Ok(self.chats.read().unwrap().get(peer).cloned())
    }

    fn all(&self) -> Result<Vec<Chat>> {
        Ok(self.chats.read().unwrap().values().cloned().collect())
    }

    fn remove(&self, peer: &PeerId) -> Result<()> {
        self.chats.write().unwrap().remove(peer);
        Ok(())
    }
}

/// In-memory `MessageStore`, the default backend for this crate.
#[derive(Default)]
pub struct InMemoryMessageStore {
    messages: RwLock<HashMap<PeerId, Vec<StoredMessage>>>,
}

impl MessageStore for InMemoryMessageStore {
    fn append(&self, message: StoredMessage) -> Result<()> {
        self.messages
            .write()
            .unwrap()
            .entry(message.peer)
            .or_default()
            .push(message);
        Ok(())
    }

    fn history(&self, peer: &PeerId) -> Result<Vec<StoredMessage>> {
        Ok(self
            .messages
            .read()
            .unwrap()
            .get(peer)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(byte: u8) -> PeerId {
        PeerId([byte; 32])
    }

    #[test]
    fn chat_store_roundtrips() {
        let store = InMemoryChatStore::default();
        let chat = Chat::new(peer(1), "alice".into(), [0u8; 32], [0u8; 32], 1000);
        store.upsert(chat.clone()).unwrap();
        let fetched = store.get(&peer(1)).unwrap().unwrap();
        assert_eq!(fetched.peer_username, "alice");
        assert_eq!(store.all().unwrap().len(), 1);
        store.remove(&peer(1)).unwrap();
        assert!(store.get(&peer(1)).unwrap().is_none());
    }

    #[test]
    fn message_store_appends_per_peer() {
        let store = InMemoryMessageStore::default();
        store
            .append(StoredMessage {
                id: uuid::Uuid::from_bytes([1; 16]),
                peer: peer(2),
                outgoing: true,
                content: "hi".into(),
                timestamp: 1,
                delivered_offline: false,
            })
            .unwrap();
        assert_eq!(store.history(&peer(2)).unwrap().len(), 1);
        assert!(store.history(&peer(3)).unwrap().is_empty());
    }
}
