//! Offline-message bucket protocol (spec.md §4.5): each direct chat has a
//! shared `offline_bucket_secret`; every peer owns one write-bucket inside
//! that namespace, keyed by their own signing public key, so the two sides
//! never collide.
//!
//! Grounded on the teacher's `mesh::message_queue::MessageQueue` (a
//! capacity-capped queue that rejects enqueues once full), re-targeted from
//! an in-memory relay queue to this crate's per-writer write cache backing a
//! DHT-hosted, signed-and-versioned bucket record.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::Clock;
use crate::crypto::encoding;
use crate::crypto::keys::{verify, Identity, X25519KeyPair};
use crate::crypto::sealed;
use crate::dht::{DhtEvent, DhtHandle};
use crate::error::{Error, Result};
use crate::protocol::constants::{OFFLINE_CHECK_CACHE_TTL, OFFLINE_MESSAGE_LIMIT, OFFLINE_MESSAGE_TTL};
use crate::protocol::{sha256, Hash256, PeerId};

const NAMESPACE: &str = "offline";

/// Info about the sender, sealed alongside the message content (spec.md
/// §4.5) so a recipient who has not yet exchanged a session key can still
/// identify who left the message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SenderInfo {
    pub peer_id: PeerId,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub offline_ack_timestamp: Option<u64>,
}

/// Whether a deposited message's `content` is sealed-box ciphertext or
/// carried verbatim (spec.md §4.5: `message_type ∈ {encrypted, plain}`).
/// Every message this store deposits today goes through `sealed::seal`, so
/// `deposit` always produces `Encrypted`; `Plain` exists for a future
/// unsealed notification payload and is accepted on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Encrypted,
    Plain,
}

/// One deposited message inside a write-bucket (spec.md §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineMessage {
    pub id: Uuid,
    #[serde(with = "encoding::bytes")]
    pub content: Vec<u8>,
    #[serde(with = "encoding::bytes")]
    pub sender_info: Vec<u8>,
    pub content_hash: Hash256,
    pub sender_info_hash: Hash256,
    pub timestamp: u64,
    #[serde(with = "encoding::bytes")]
    pub bucket_key: Vec<u8>,
    #[serde(with = "encoding::array64")]
    pub signature: [u8; 64],
    pub message_type: MessageType,
    pub expires_at: u64,
}

impl OfflineMessage {
    fn signing_bytes(content_hash: &Hash256, sender_info_hash: &Hash256, timestamp: u64, bucket_key: &[u8]) -> Vec<u8> {
        #[derive(Serialize)]
        struct Signed<'a> {
            content_hash: &'a Hash256,
            sender_info_hash: &'a Hash256,
            timestamp: u64,
            #[serde(with = "encoding::bytes")]
            bucket_key: &'a Vec<u8>,
        }
        serde_json::to_vec(&Signed {
            content_hash,
            sender_info_hash,
            timestamp,
            bucket_key: &bucket_key.to_vec(),
        })
        .expect("serializing a plain struct to JSON cannot fail")
    }

    fn verify(&self, writer_signing_key: &[u8; 32]) -> Result<()> {
        if sha256(&self.content) != self.content_hash || sha256(&self.sender_info) != self.sender_info_hash {
            return Err(Error::Integrity("offline message hash mismatch".into()));
        }
        let bytes = Self::signing_bytes(&self.content_hash, &self.sender_info_hash, self.timestamp, &self.bucket_key);
        verify(writer_signing_key, &bytes, &self.signature)
    }
}

/// The record stored at a write-bucket's DHT key: a signed, versioned index
/// of message ids plus the messages themselves (spec.md §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineBucket {
    pub message_ids: Vec<Uuid>,
    pub version: u64,
    pub timestamp: u64,
    #[serde(with = "encoding::bytes")]
    pub bucket_key: Vec<u8>,
    #[serde(with = "encoding::array64")]
    pub signature: [u8; 64],
    pub messages: Vec<OfflineMessage>,
}

impl OfflineBucket {
    fn signing_bytes(message_ids: &[Uuid], version: u64, timestamp: u64, bucket_key: &[u8]) -> Vec<u8> {
        #[derive(Serialize)]
        struct Signed<'a> {
            message_ids: &'a [Uuid],
            version: u64,
            timestamp: u64,
            #[serde(with = "encoding::bytes")]
            bucket_key: &'a Vec<u8>,
        }
        serde_json::to_vec(&Signed {
            message_ids,
            version,
            timestamp,
            bucket_key: &bucket_key.to_vec(),
        })
        .expect("serializing a plain struct to JSON cannot fail")
    }

    /// Full verification per spec.md §4.5 fetch-path predicates.
    fn verify(&self, writer_signing_key: &[u8; 32], expected_key: &[u8]) -> bool {
        if self.bucket_key != expected_key {
            return false;
        }
        let bytes = Self::signing_bytes(&self.message_ids, self.version, self.timestamp, &self.bucket_key);
        if verify(writer_signing_key, &bytes, &self.signature).is_err() {
            return false;
        }
        let declared: HashSet<Uuid> = self.message_ids.iter().copied().collect();
        let actual: HashSet<Uuid> = self.messages.iter().map(|m| m.id).collect();
        declared == actual
    }
}

fn bucket_key(offline_bucket_secret: &[u8; 32], writer_signing_pubkey: &[u8; 32]) -> Vec<u8> {
    format!(
        "/kiyeovo-offline/{}/{}",
        encoding::encode(offline_bucket_secret),
        encoding::encode(writer_signing_pubkey)
    )
    .into_bytes()
}

/// Validator registered under the `offline` namespace (spec.md §4.5: "nodes
/// forward only well-formed records"). Checks structural well-formedness
/// only; the writer's identity is known at call sites, not at this layer.
pub fn validate_offline_bucket(key: &[u8], value: &[u8]) -> bool {
    match serde_json::from_slice::<OfflineBucket>(value) {
        Ok(bucket) => bucket.bucket_key == key && bucket.message_ids.len() <= OFFLINE_MESSAGE_LIMIT,
        Err(_) => false,
    }
}

pub fn select_latest_offline_bucket(_key: &[u8], candidates: &[&[u8]]) -> usize {
    let mut best_idx = 0;
    let mut best_version = 0u64;
    for (idx, candidate) in candidates.iter().enumerate() {
        if let Ok(bucket) = serde_json::from_slice::<OfflineBucket>(candidate) {
            if bucket.version >= best_version {
                best_version = bucket.version;
                best_idx = idx;
            }
        }
    }
    best_idx
}

/// A fully verified and decrypted offline message, ready for delivery.
pub struct DeliveredMessage {
    pub sender: SenderInfo,
    pub content: Vec<u8>,
    pub timestamp: u64,
}

#[derive(Default)]
struct WriteCache {
    messages: Vec<OfflineMessage>,
    version: u64,
    write_key: Vec<u8>,
}

/// Deposits messages into, and fetches messages from, the DHT-hosted bucket
/// protocol (spec.md §4.5).
pub struct OfflineStore<D: DhtHandle, C: Clock> {
    dht: std::sync::Arc<D>,
    clock: std::sync::Arc<C>,
    write_caches: RwLock<HashMap<PeerId, WriteCache>>,
    last_fetch: RwLock<HashMap<PeerId, u64>>,
    last_read: RwLock<HashMap<PeerId, u64>>,
}

impl<D: DhtHandle, C: Clock> OfflineStore<D, C> {
    pub fn new(dht: std::sync::Arc<D>, clock: std::sync::Arc<C>) -> Self {
        dht.register_validator(NAMESPACE, validate_offline_bucket);
        dht.register_selector(NAMESPACE, select_latest_offline_bucket);
        Self {
            dht,
            clock,
            write_caches: RwLock::new(HashMap::new()),
            last_fetch: RwLock::new(HashMap::new()),
            last_read: RwLock::new(HashMap::new()),
        }
    }

    /// Deposit a message for an offline `peer` (spec.md §4.5).
    pub async fn deposit(
        &self,
        identity: &Identity,
        username: &str,
        peer: PeerId,
        peer_offline_public_key: &[u8; 32],
        offline_bucket_secret: &[u8; 32],
        content: &[u8],
    ) -> Result<()> {
        let write_key = bucket_key(offline_bucket_secret, &identity.signing.public_bytes());
        let sender_info = SenderInfo {
            peer_id: identity.peer_id(),
            username: username.to_string(),
            offline_ack_timestamp: None,
        };
        let sealed_content = sealed::seal(peer_offline_public_key, content)?;
        let sealed_sender_info = sealed::seal(peer_offline_public_key, &serde_json::to_vec(&sender_info)?)?;
        let content_hash = sha256(&sealed_content);
        let sender_info_hash = sha256(&sealed_sender_info);
        let now = self.clock.now_millis();
        let signing_bytes = OfflineMessage::signing_bytes(&content_hash, &sender_info_hash, now, &write_key);
        let signature = identity.signing.sign(&signing_bytes).to_bytes();

        let message = OfflineMessage {
            id: Uuid::new_v4(),
            content: sealed_content,
            sender_info: sealed_sender_info,
            content_hash,
            sender_info_hash,
            timestamp: now,
            bucket_key: write_key.clone(),
            signature,
            message_type: MessageType::Encrypted,
            expires_at: now + OFFLINE_MESSAGE_TTL.as_millis() as u64,
        };

        let bucket = {
            let mut caches = self.write_caches.write().unwrap();
            let cache = caches.entry(peer).or_default();
            cache.write_key = write_key.clone();
            cache.messages.push(message);
            while cache.messages.len() > OFFLINE_MESSAGE_LIMIT {
                cache.messages.remove(0);
            }
            cache.version += 1;
            let message_ids: Vec<Uuid> = cache.messages.iter().map(|m| m.id).collect();
            let store_bytes = OfflineBucket::signing_bytes(&message_ids, cache.version, now, &write_key);
            let store_signature = identity.signing.sign(&store_bytes).to_bytes();
            OfflineBucket {
                message_ids,
                version: cache.version,
                timestamp: now,
                bucket_key: write_key.clone(),
                signature: store_signature,
                messages: cache.messages.clone(),
            }
        };

        let bytes = serde_json::to_vec(&bucket)?;
        let events = self.dht.put(&write_key, bytes).await?;
        if !DhtEvent::put_succeeded(&events) {
            return Err(Error::NetworkUnreachable);
        }
        Ok(())
    }

    /// Drop locally-cached messages for `peer` that the peer has acked via
    /// an online `offline_ack_timestamp`, and re-publish the shrunk bucket
    /// (spec.md §4.4 "sender observes ACK via online path and prunes its
    /// local write-cache").
    pub async fn prune_acked(&self, identity: &Identity, peer: PeerId, up_to_timestamp: u64) -> Result<()> {
        let bucket = {
            let mut caches = self.write_caches.write().unwrap();
            let Some(cache) = caches.get_mut(&peer) else {
                return Ok(());
            };
            let before = cache.messages.len();
            cache.messages.retain(|m| m.timestamp > up_to_timestamp);
            if cache.messages.len() == before {
                return Ok(());
            }
            cache.version += 1;
            let now = self.clock.now_millis();
            let message_ids: Vec<Uuid> = cache.messages.iter().map(|m| m.id).collect();
            let store_bytes = OfflineBucket::signing_bytes(&message_ids, cache.version, now, &cache.write_key);
            let store_signature = identity.signing.sign(&store_bytes).to_bytes();
            OfflineBucket {
                message_ids,
                version: cache.version,
                timestamp: now,
                bucket_key: cache.write_key.clone(),
                signature: store_signature,
                messages: cache.messages.clone(),
            }
        };
        let bytes = serde_json::to_vec(&bucket)?;
        let events = self.dht.put(&bucket.bucket_key, bytes).await?;
        if !DhtEvent::put_succeeded(&events) {
            return Err(Error::NetworkUnreachable);
        }
        Ok(())
    }

    /// Fetch and deliver new messages from `peer`'s write-bucket (spec.md
    /// §4.5). Throttled per peer by `OFFLINE_CHECK_CACHE_TTL`.
    pub async fn fetch(
        &self,
        my_offline_keypair: &X25519KeyPair,
        peer: PeerId,
        peer_signing_key: &[u8; 32],
        offline_bucket_secret: &[u8; 32],
    ) -> Result<Vec<DeliveredMessage>> {
        let now = self.clock.now_millis();
        {
            let mut last_fetch = self.last_fetch.write().unwrap();
            if let Some(last) = last_fetch.get(&peer) {
                if now.saturating_sub(*last) < OFFLINE_CHECK_CACHE_TTL.as_millis() as u64 {
                    return Ok(vec![]);
                }
            }
            last_fetch.insert(peer, now);
        }

        let read_key = bucket_key(offline_bucket_secret, peer_signing_key);
        let events = self.dht.get(&read_key).await?;
        let bucket = DhtEvent::values(&events)
            .find_map(|v| {
                serde_json::from_slice::<OfflineBucket>(v)
                    .ok()
                    .filter(|b| b.verify(peer_signing_key, &read_key))
            });
        let Some(bucket) = bucket else {
            return Ok(vec![]);
        };

        let watermark = *self.last_read.read().unwrap().get(&peer).unwrap_or(&0);
        let mut delivered = Vec::new();
        let mut max_seen = watermark;
        for message in &bucket.messages {
            if message.verify(peer_signing_key).is_err() {
                continue;
            }
            if message.timestamp <= watermark {
                continue;
            }
            if now >= message.expires_at {
                continue;
            }
            let content = sealed::unseal(my_offline_keypair, &message.content)?;
            let sender_bytes = sealed::unseal(my_offline_keypair, &message.sender_info)?;
            let sender: SenderInfo = serde_json::from_slice(&sender_bytes)?;
            max_seen = max_seen.max(message.timestamp);
            delivered.push(DeliveredMessage {
                sender,
                content,
                timestamp: message.timestamp,
            });
        }
        if max_seen > watermark {
            self.last_read.write().unwrap().insert(peer, max_seen);
        }
        Ok(delivered)
    }

    pub fn last_read_timestamp(&self, peer: &PeerId) -> u64 {
        *self.last_read.read().unwrap().get(peer).unwrap_or(&0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct FakeDht {
        records: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
    }

    #[async_trait]
    impl DhtHandle for FakeDht {
        async fn get(&self, key: &[u8]) -> Result<Vec<DhtEvent>> {
            let records = self.records.lock().unwrap();
            Ok(match records.get(key) {
                Some(v) => vec![DhtEvent::Value(v.clone())],
                None => vec![],
            })
        }

        async fn put(&self, key: &[u8], value: Vec<u8>) -> Result<Vec<DhtEvent>> {
            self.records.lock().unwrap().insert(key.to_vec(), value);
            Ok(vec![DhtEvent::PeerResponse])
        }

        fn register_validator(&self, _namespace: &str, _validator: crate::dht::RecordValidator) {}
        fn register_selector(&self, _namespace: &str, _selector: crate::dht::RecordSelector) {}
    }

    #[tokio::test]
    async fn deposit_then_fetch_delivers_message() {
        let dht = Arc::new(FakeDht::default());
        let clock = Arc::new(FakeClock::new(1_000_000));
        let store = OfflineStore::new(dht, clock.clone());

        let alice = Identity::generate();
        let bob = Identity::generate();
        let shared = [42u8; 32];

        store
            .deposit(&alice, "alice", bob.peer_id(), &bob.offline.public_bytes(), &shared, b"hi bob")
            .await
            .unwrap();

        clock.advance(OFFLINE_CHECK_CACHE_TTL.as_millis() as u64 + 1);
        let delivered = store
            .fetch(&bob.offline, alice.peer_id(), &alice.signing.public_bytes(), &shared)
            .await
            .unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].content, b"hi bob");
        assert_eq!(delivered[0].sender.username, "alice");
    }

    #[tokio::test]
    async fn fetch_is_throttled_by_cache_ttl() {
        let dht = Arc::new(FakeDht::default());
        let clock = Arc::new(FakeClock::new(1_000_000));
        let store = OfflineStore::new(dht, clock.clone());
        let alice = Identity::generate();
        let bob = Identity::generate();
        let shared = [7u8; 32];
        store
            .deposit(&alice, "alice", bob.peer_id(), &bob.offline.public_bytes(), &shared, b"hi")
            .await
            .unwrap();

        let first = store
            .fetch(&bob.offline, alice.peer_id(), &alice.signing.public_bytes(), &shared)
            .await
            .unwrap();
        assert_eq!(first.len(), 1);

        clock.advance(10);
        let second = store
            .fetch(&bob.offline, alice.peer_id(), &alice.signing.public_bytes(), &shared)
            .await
            .unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn fetch_skips_expired_messages() {
        let dht = Arc::new(FakeDht::default());
        let clock = Arc::new(FakeClock::new(1_000_000));
        let store = OfflineStore::new(dht, clock.clone());
        let alice = Identity::generate();
        let bob = Identity::generate();
        let shared = [9u8; 32];

        store
            .deposit(&alice, "alice", bob.peer_id(), &bob.offline.public_bytes(), &shared, b"stale")
            .await
            .unwrap();

        clock.advance(OFFLINE_MESSAGE_TTL.as_millis() as u64 + 1);
        let delivered = store
            .fetch(&bob.offline, alice.peer_id(), &alice.signing.public_bytes(), &shared)
            .await
            .unwrap();
        assert!(delivered.is_empty());
    }

    #[tokio::test]
    async fn prune_acked_removes_only_acked_messages_and_republishes() {
        let dht = Arc::new(FakeDht::default());
        let clock = Arc::new(FakeClock::new(1_000_000));
        let store = OfflineStore::new(dht, clock.clone());
        let alice = Identity::generate();
        let bob = Identity::generate();
        let shared = [3u8; 32];

        store
            .deposit(&alice, "alice", bob.peer_id(), &bob.offline.public_bytes(), &shared, b"first")
            .await
            .unwrap();
        let ack_point = clock.now_millis();
        clock.advance(10);
        store
            .deposit(&alice, "alice", bob.peer_id(), &bob.offline.public_bytes(), &shared, b"second")
            .await
            .unwrap();

        store.prune_acked(&alice, bob.peer_id(), ack_point).await.unwrap();

        clock.advance(OFFLINE_CHECK_CACHE_TTL.as_millis() as u64 + 1);
        let delivered = store
            .fetch(&bob.offline, alice.peer_id(), &alice.signing.public_bytes(), &shared)
            .await
            .unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].content, b"second");
    }
}
