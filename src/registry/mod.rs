//! DHT-backed username registry (spec.md §4.1).
//!
//! Grounded on the teacher's Kademlia record model (`mesh::kademlia_dht`):
//! records are namespaced byte keys with application-level validation and
//! conflict resolution supplied as callbacks, the same split this module
//! uses via `DhtHandle::register_validator`/`register_selector`.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::clock::Clock;
use crate::crypto::keys::{verify, Identity};
use crate::dht::{DhtEvent, DhtHandle};
use crate::error::{Error, Result};
use crate::protocol::constants::{MAX_REG_AGE, REREG_INTERVAL};
use crate::protocol::{is_valid_username, now_millis, sha256, PeerId};

const USERNAME_NAMESPACE: &str = "username";
const PEER_NAMESPACE: &str = "peer";

/// The record a peer publishes to claim a username (spec.md §4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub username: String,
    pub peer_id: PeerId,
    #[serde(with = "crate::crypto::encoding::array32")]
    pub signing_public_key: [u8; 32],
    #[serde(with = "crate::crypto::encoding::array32")]
    pub offline_public_key: [u8; 32],
    pub timestamp: u64,
    #[serde(with = "crate::crypto::encoding::array64")]
    pub signature: [u8; 64],
}

impl UserRecord {
    fn signing_bytes(
        username: &str,
        peer_id: &PeerId,
        signing_public_key: &[u8; 32],
        offline_public_key: &[u8; 32],
        timestamp: u64,
    ) -> Vec<u8> {
        #[derive(Serialize)]
        struct Signed<'a> {
            username: &'a str,
            peer_id: &'a PeerId,
            #[serde(with = "crate::crypto::encoding::array32")]
            signing_public_key: &'a [u8; 32],
            #[serde(with = "crate::crypto::encoding::array32")]
            offline_public_key: &'a [u8; 32],
            timestamp: u64,
        }
        serde_json::to_vec(&Signed {
            username,
            peer_id,
            signing_public_key,
            offline_public_key,
            timestamp,
        })
        .expect("serializing a record's signing bytes cannot fail")
    }

    pub fn sign(identity: &Identity, username: &str, timestamp: u64) -> Self {
        let peer_id = identity.peer_id();
        let signing_public_key = identity.signing.public_bytes();
        let offline_public_key = identity.offline.public_bytes();
        let bytes = Self::signing_bytes(
            username,
            &peer_id,
            &signing_public_key,
            &offline_public_key,
            timestamp,
        );
        let signature = identity.signing.sign(&bytes).to_bytes();
        Self {
            username: username.to_string(),
            peer_id,
            signing_public_key,
            offline_public_key,
            timestamp,
            signature,
        }
    }

    pub fn verify(&self) -> Result<()> {
        if !is_valid_username(&self.username) {
            return Err(Error::Protocol(format!("invalid username: {}", self.username)));
        }
        if self.peer_id != PeerId::from_signing_public_key(&self.signing_public_key) {
            return Err(Error::InvalidSignature(
                "peer_id does not match signing key".into(),
            ));
        }
        let bytes = Self::signing_bytes(
            &self.username,
            &self.peer_id,
            &self.signing_public_key,
            &self.offline_public_key,
            self.timestamp,
        );
        verify(&self.signing_public_key, &bytes, &self.signature)
    }

    fn is_fresh(&self, now: u64) -> bool {
        now.saturating_sub(self.timestamp) <= MAX_REG_AGE.as_millis() as u64
    }
}

fn username_key(username: &str) -> Vec<u8> {
    format_key(USERNAME_NAMESPACE, username.to_lowercase().as_bytes())
}

fn peer_key(peer: &PeerId) -> Vec<u8> {
    format_key(PEER_NAMESPACE, peer.as_bytes())
}

fn format_key(namespace: &str, discriminator: &[u8]) -> Vec<u8> {
    let mut hasher_input = Vec::with_capacity(namespace.len() + 1 + discriminator.len());
    hasher_input.extend_from_slice(namespace.as_bytes());
    hasher_input.push(b':');
    hasher_input.extend_from_slice(discriminator);
    let digest = sha256(&hasher_input);
    let mut key = Vec::with_capacity(namespace.len() + 1 + digest.len());
    key.extend_from_slice(namespace.as_bytes());
    key.push(b':');
    key.extend_from_slice(&digest);
    key
}

/// Validator registered under the `username` namespace: well-formed,
/// self-consistent, and cryptographically signed (spec.md §4.1).
pub fn validate_user_record(_key: &[u8], value: &[u8]) -> bool {
    match serde_json::from_slice::<UserRecord>(value) {
        Ok(record) => record.verify().is_ok(),
        Err(_) => false,
    }
}

/// Selector registered under the `username` namespace: the freshest record
/// that verifies wins a conflict (spec.md §4.1).
pub fn select_latest_user_record(_key: &[u8], candidates: &[&[u8]]) -> usize {
    let mut best_idx = 0;
    let mut best_ts = 0u64;
    for (idx, candidate) in candidates.iter().enumerate() {
        if let Ok(record) = serde_json::from_slice::<UserRecord>(candidate) {
            if record.verify().is_ok() && record.timestamp >= best_ts {
                best_ts = record.timestamp;
                best_idx = idx;
            }
        }
    }
    best_idx
}

/// Resolves usernames to peer identity material and keeps this identity's
/// own registration fresh on the DHT (spec.md §4.1).
pub struct UsernameRegistry<D: DhtHandle, C: Clock> {
    dht: Arc<D>,
    clock: Arc<C>,
}

impl<D: DhtHandle, C: Clock> UsernameRegistry<D, C> {
    pub fn new(dht: Arc<D>, clock: Arc<C>) -> Self {
        dht.register_validator(USERNAME_NAMESPACE, validate_user_record);
        dht.register_selector(USERNAME_NAMESPACE, select_latest_user_record);
        Self { dht, clock }
    }

    /// Publish a fresh, signed registration for `username` under both the
    /// username key and this peer's own peer-id key (spec.md §4.1).
    pub async fn register(&self, identity: &Identity, username: &str) -> Result<()> {
        if !is_valid_username(username) {
            return Err(Error::Protocol(format!("invalid username: {username}")));
        }
        if let Some(existing) = self.lookup_by_username(username).await? {
            if existing.peer_id != identity.peer_id() {
                return Err(Error::UsernameTaken);
            }
        }
        // On a rename, tombstone the old `H(old_username)` record by writing
        // an empty value, so it stops resolving (spec.md §4.1).
        if let Some(previous) = self.lookup_by_peer(&identity.peer_id()).await? {
            if previous.username != username {
                self.dht.put(&username_key(&previous.username), Vec::new()).await?;
            }
        }
        let record = UserRecord::sign(identity, username, self.clock.now_millis());
        let bytes = serde_json::to_vec(&record)?;
        let events = self.dht.put(&username_key(username), bytes.clone()).await?;
        if !DhtEvent::put_succeeded(&events) {
            return Err(Error::NetworkUnreachable);
        }
        self.dht.put(&peer_key(&identity.peer_id()), bytes).await?;
        Ok(())
    }

    /// Tombstone this identity's registration under both keys, stopping
    /// periodic re-registration's effects and any future lookup from
    /// resolving it (spec.md §4.1 "periodic re-registration … stops on
    /// explicit unregister").
    pub async fn unregister(&self, identity: &Identity, username: &str) -> Result<()> {
        self.dht.put(&username_key(username), Vec::new()).await?;
        self.dht.put(&peer_key(&identity.peer_id()), Vec::new()).await?;
        Ok(())
    }

    pub async fn lookup_by_username(&self, username: &str) -> Result<Option<UserRecord>> {
        self.lookup(&username_key(username)).await
    }

    pub async fn lookup_by_peer(&self, peer: &PeerId) -> Result<Option<UserRecord>> {
        self.lookup(&peer_key(peer)).await
    }

    async fn lookup(&self, key: &[u8]) -> Result<Option<UserRecord>> {
        let events = self.dht.get(key).await?;
        let now = self.clock.now_millis();
        let mut best: Option<UserRecord> = None;
        for value in DhtEvent::values(&events) {
            if let Ok(record) = serde_json::from_slice::<UserRecord>(value) {
                if record.verify().is_ok() && record.is_fresh(now) {
                    let is_better = best
                        .as_ref()
                        .map(|b| record.timestamp > b.timestamp)
                        .unwrap_or(true);
                    if is_better {
                        best = Some(record);
                    }
                }
            }
        }
        Ok(best)
    }

    /// Spawn a periodic re-registration task; cancel by dropping the
    /// returned `oneshot::Sender` (spec.md §4.1).
    pub fn spawn_reregistration(
        self: Arc<Self>,
        identity: Identity,
        username: String,
    ) -> oneshot::Sender<()>
    where
        D: 'static,
        C: 'static,
    {
        let (cancel_tx, mut cancel_rx) = oneshot::channel();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(REREG_INTERVAL);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(err) = self.register(&identity, &username).await {
                            tracing::warn!(%err, "periodic re-registration failed");
                        }
                    }
                    _ = &mut cancel_rx => break,
                }
            }
        });
        cancel_tx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeDht {
        records: Mutex<std::collections::HashMap<Vec<u8>, Vec<u8>>>,
    }

    #[async_trait]
    impl DhtHandle for FakeDht {
        async fn get(&self, key: &[u8]) -> Result<Vec<DhtEvent>> {
            let records = self.records.lock().unwrap();
            Ok(match records.get(key) {
                Some(value) => vec![DhtEvent::Value(value.clone())],
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
    async fn register_then_lookup_roundtrips() {
        let dht = Arc::new(FakeDht::default());
        let clock = Arc::new(FakeClock::new(1_000_000));
        let registry = UsernameRegistry::new(dht, clock);
        let identity = Identity::generate();
        registry.register(&identity, "alice").await.unwrap();

        let record = registry.lookup_by_username("alice").await.unwrap().unwrap();
        assert_eq!(record.peer_id, identity.peer_id());

        let by_peer = registry
            .lookup_by_peer(&identity.peer_id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_peer.username, "alice");
    }

    #[tokio::test]
    async fn registering_taken_username_fails_for_other_identity() {
        let dht = Arc::new(FakeDht::default());
        let clock = Arc::new(FakeClock::new(1_000_000));
        let registry = UsernameRegistry::new(dht, clock);
        let alice = Identity::generate();
        let mallory = Identity::generate();
        registry.register(&alice, "alice").await.unwrap();

        let err = registry.register(&mallory, "alice").await.unwrap_err();
        assert!(matches!(err, Error::UsernameTaken));
    }

    #[tokio::test]
    async fn stale_record_is_not_returned() {
        let dht = Arc::new(FakeDht::default());
        let clock = Arc::new(FakeClock::new(0));
        let registry = UsernameRegistry::new(dht, clock.clone());
        let identity = Identity::generate();
        registry.register(&identity, "alice").await.unwrap();

        clock.advance(MAX_REG_AGE.as_millis() as u64 + 1);
        assert!(registry
            .lookup_by_username("alice")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn renaming_tombstones_the_old_username() {
        let dht = Arc::new(FakeDht::default());
        let clock = Arc::new(FakeClock::new(1_000_000));
        let registry = UsernameRegistry::new(dht, clock);
        let identity = Identity::generate();
        registry.register(&identity, "alice").await.unwrap();
        registry.register(&identity, "alice2").await.unwrap();

        assert!(registry
            .lookup_by_username("alice")
            .await
            .unwrap()
            .is_none());
        let record = registry.lookup_by_username("alice2").await.unwrap().unwrap();
        assert_eq!(record.peer_id, identity.peer_id());
    }

    #[tokio::test]
    async fn unregister_removes_both_records() {
        let dht = Arc::new(FakeDht::default());
        let clock = Arc::new(FakeClock::new(1_000_000));
        let registry = UsernameRegistry::new(dht, clock);
        let identity = Identity::generate();
        registry.register(&identity, "alice").await.unwrap();

        registry.unregister(&identity, "alice").await.unwrap();

        assert!(registry
            .lookup_by_username("alice")
            .await
            .unwrap()
            .is_none());
        assert!(registry
            .lookup_by_peer(&identity.peer_id())
            .await
            .unwrap()
            .is_none());
    }
}
