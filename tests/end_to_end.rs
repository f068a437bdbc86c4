//! End-to-end scenarios spanning messaging, offline delivery, the username
//! registry, and key rotation, driven against in-memory fakes for the
//! `Transport` and `DhtHandle` external interfaces.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use kiyeovo_core::clock::FakeClock;
use kiyeovo_core::crypto::Identity;
use kiyeovo_core::dht::{DhtEvent, DhtHandle, RecordSelector, RecordValidator};
use kiyeovo_core::error::Result;
use kiyeovo_core::messaging::{MessageHandler, PeerKeys};
use kiyeovo_core::offline::OfflineStore;
use kiyeovo_core::protocol::PeerId;
use kiyeovo_core::registry::UsernameRegistry;
use kiyeovo_core::session::SessionManager;
use kiyeovo_core::transport::{BoxedStream, Transport};

/// Shared in-memory DHT: every peer in the test talks to the same instance.
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

    fn register_validator(&self, _namespace: &str, _validator: RecordValidator) {}
    fn register_selector(&self, _namespace: &str, _selector: RecordSelector) {}
}

/// Transport whose `dial` hands the caller one end of an in-memory duplex
/// pipe and forwards the other end to whichever peer "owns" the dialed
/// `PeerId`, via a shared routing table keyed by peer id.
#[derive(Clone)]
struct FakeTransport {
    inboxes: Arc<Mutex<HashMap<PeerId, mpsc::UnboundedSender<BoxedStream>>>>,
}

impl FakeTransport {
    fn new() -> Self {
        Self {
            inboxes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn register(&self, peer: PeerId) -> mpsc::UnboundedReceiver<BoxedStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inboxes.lock().unwrap().insert(peer, tx);
        rx
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn dial(&self, peer: PeerId, _protocol: &str) -> Result<BoxedStream> {
        let (client, server) = tokio::io::duplex(256 * 1024);
        let tx = self
            .inboxes
            .lock()
            .unwrap()
            .get(&peer)
            .cloned()
            .ok_or_else(|| kiyeovo_core::Error::Transport("no route to peer".into()))?;
        tx.send(Box::new(server))
            .map_err(|_| kiyeovo_core::Error::Transport("peer inbox closed".into()))?;
        Ok(Box::new(client))
    }
}

struct Node {
    identity: Identity,
    #[allow(dead_code)]
    username: &'static str,
    handler: Arc<MessageHandler<FakeTransport, FakeDht, FakeClock>>,
    sessions: Arc<SessionManager<FakeClock>>,
    inbox: mpsc::UnboundedReceiver<BoxedStream>,
}

fn build_node(
    transport: &FakeTransport,
    dht: Arc<FakeDht>,
    clock: Arc<FakeClock>,
    username: &'static str,
) -> Node {
    let identity = Identity::generate();
    let inbox = transport.register(identity.peer_id());
    let sessions = Arc::new(SessionManager::new(identity.clone(), username.to_string(), clock.clone()));
    let offline = Arc::new(OfflineStore::new(dht, clock));
    let handler = Arc::new(MessageHandler::new(
        Arc::new(transport.clone()),
        sessions.clone(),
        offline,
        identity.clone(),
        username.to_string(),
    ));
    Node {
        identity,
        username,
        handler,
        sessions,
        inbox,
    }
}

fn peer_keys(node: &Node) -> PeerKeys {
    PeerKeys {
        signing_public_key: node.identity.signing.public_bytes(),
        offline_public_key: node.identity.offline.public_bytes(),
    }
}

#[tokio::test]
async fn online_message_roundtrip() {
    let transport = FakeTransport::new();
    let dht = Arc::new(FakeDht::default());
    let clock = Arc::new(FakeClock::new(1_000_000));

    let alice = build_node(&transport, dht.clone(), clock.clone(), "alice");
    let bob = build_node(&transport, dht.clone(), clock.clone(), "bob");
    let alice_keys = peer_keys(&alice);
    let bob_keys = peer_keys(&bob);
    let bob_id = bob.identity.peer_id();
    let alice_id = alice.identity.peer_id();
    let shared = [5u8; 32];

    let bob_handler = bob.handler.clone();
    let alice_signing = alice_keys.signing_public_key;
    let responder = tokio::spawn(async move {
        // Handshake init
        let stream = bob.inbox.recv().await.unwrap();
        bob_handler.handle_inbound(alice_id, &alice_signing, stream).await.unwrap();
        // Encrypted application message
        let stream = bob.inbox.recv().await.unwrap();
        let received = bob_handler
            .handle_inbound(alice_id, &alice_signing, stream)
            .await
            .unwrap()
            .expect("expected a delivered message");
        assert_eq!(received.plaintext, b"hello");
        assert_eq!(received.sender_username, "alice");
    });

    let outcome = alice
        .handler
        .send(bob_id, bob_keys, &shared, b"hello")
        .await
        .unwrap();
    responder.await.unwrap();
    assert!(matches!(outcome, kiyeovo_core::messaging::DeliveryOutcome::Online));
    assert!(alice.sessions.is_established(&bob_id));
}

#[tokio::test]
async fn offline_then_online_delivers_and_acks() {
    let dht = Arc::new(FakeDht::default());
    let clock = Arc::new(FakeClock::new(2_000_000));
    let alice = Identity::generate();
    let bob = Identity::generate();
    let shared = [9u8; 32];

    let offline_a = OfflineStore::new(dht.clone(), clock.clone());
    offline_a
        .deposit(&alice, "alice", bob.peer_id(), &bob.offline.public_bytes(), &shared, b"ping")
        .await
        .unwrap();

    clock.advance(kiyeovo_core::protocol::constants::OFFLINE_CHECK_CACHE_TTL.as_millis() as u64 + 1);
    let offline_b = OfflineStore::new(dht.clone(), clock.clone());
    let delivered = offline_b
        .fetch(&bob.offline, alice.peer_id(), &alice.signing.public_bytes(), &shared)
        .await
        .unwrap();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].content, b"ping");
    assert!(offline_b.last_read_timestamp(&alice.peer_id()) > 0);
}

#[tokio::test]
async fn username_collision_second_registrant_sees_taken() {
    let dht = Arc::new(FakeDht::default());
    let clock = Arc::new(FakeClock::new(3_000_000));
    let registry = UsernameRegistry::new(dht, clock.clone());
    let alice = Identity::generate();
    let mallory = Identity::generate();

    registry.register(&alice, "alice").await.unwrap();
    clock.advance(1);
    let err = registry.register(&mallory, "alice").await.unwrap_err();
    assert!(matches!(err, kiyeovo_core::Error::UsernameTaken));

    let record = registry.lookup_by_username("alice").await.unwrap().unwrap();
    assert_eq!(record.peer_id, alice.peer_id());
}

#[tokio::test]
async fn chunk_integrity_attack_is_detected() {
    use kiyeovo_core::transfer::{FileOfferResponse, FileReceiver, FileSender};
    use uuid::Uuid;

    let key = [3u8; 32];
    let data: Vec<u8> = (0..kiyeovo_core::protocol::constants::CHUNK_SIZE * 3)
        .map(|i| (i % 256) as u8)
        .collect();
    let mut sender = FileSender::new(Uuid::new_v4(), "doc.pdf".into(), "application/pdf".into(), data).unwrap();
    let offer = sender.build_offer();
    sender
        .handle_response(&FileOfferResponse {
            file_id: offer.file_id,
            accepted: true,
            reason: None,
        })
        .unwrap();
    let mut receiver = FileReceiver::new(offer, 0).unwrap();
    receiver.accept(0);

    let (first_chunk, _) = sender.next_chunk(&key).unwrap().unwrap();
    receiver.apply_chunk(&first_chunk, &key, 0).unwrap();

    let (mut second_chunk, _) = sender.next_chunk(&key).unwrap().unwrap();
    // Flip a ciphertext byte; the legitimate per-chunk hash is left untouched,
    // so this must be caught by AEAD authentication, not the hash check.
    let last = second_chunk.data.len() - 1;
    second_chunk.data[last] ^= 0xFF;
    let result = receiver.apply_chunk(&second_chunk, &key, 0);
    assert!(result.is_err());
}
