//! Tracks one [`Session`] per peer plus pending exchanges and signature-
//! failure rate limiting (spec.md §4.2, §4.3, §9).
//!
//! Grounded on the teacher's `transport::connection_pool`/`mesh::session`
//! pattern of a `DashMap<PeerId, _>` guarded by the manager rather than a
//! lock around one giant table.

use std::sync::Arc;

use dashmap::DashMap;

use crate::clock::Clock;
use crate::crypto::keys::{Identity, X25519KeyPair};
use crate::error::{Error, Result};
use crate::protocol::constants::{PENDING_EXPIRATION, ROTATION_COOLDOWN, ROTATION_THRESHOLD};
use crate::protocol::messages::{KeyExchangeContent, KeyExchangeMessage};
use crate::protocol::PeerId;

use super::exchange;
use super::state::{Session, SessionKeys, SessionState};

const MAX_FAILED_EXCHANGES: u32 = 5;
const FAILED_EXCHANGE_WINDOW_MILLIS: u64 = 60_000;

struct PendingExchange {
    our_ephemeral: X25519KeyPair,
    started_at: u64,
}

/// Owns every per-peer [`Session`] plus the bookkeeping needed to drive the
/// key-exchange and rotation state machines (spec.md §4.2, §4.3).
pub struct SessionManager<C: Clock> {
    identity: Identity,
    username: String,
    clock: Arc<C>,
    sessions: DashMap<PeerId, Session>,
    pending: DashMap<PeerId, PendingExchange>,
    failed_exchanges: DashMap<PeerId, (u32, u64)>,
}

impl<C: Clock> SessionManager<C> {
    pub fn new(identity: Identity, username: String, clock: Arc<C>) -> Self {
        Self {
            identity,
            username,
            clock,
            sessions: DashMap::new(),
            pending: DashMap::new(),
            failed_exchanges: DashMap::new(),
        }
    }

    fn record_signature_failure(&self, peer: PeerId) -> Result<()> {
        let now = self.clock.now_millis();
        let mut entry = self.failed_exchanges.entry(peer).or_insert((0, now));
        if now.saturating_sub(entry.1) > FAILED_EXCHANGE_WINDOW_MILLIS {
            *entry = (0, now);
        }
        entry.0 += 1;
        if entry.0 > MAX_FAILED_EXCHANGES {
            return Err(Error::RateLimited(
                "too many failed key exchanges from this peer".into(),
            ));
        }
        Ok(())
    }

    /// Begin a handshake with `peer` as initiator (spec.md §4.2).
    pub fn initiate(&self, peer: PeerId) -> KeyExchangeMessage {
        let ephemeral = X25519KeyPair::generate();
        let ephemeral_public = ephemeral.public_bytes();
        let msg = exchange::build_message(
            &self.identity,
            KeyExchangeContent::KeyExchangeInit,
            ephemeral_public,
            &self.username,
            None,
        );
        self.pending.insert(
            peer,
            PendingExchange {
                our_ephemeral: ephemeral,
                started_at: self.clock.now_millis(),
            },
        );
        self.sessions.insert(
            peer,
            Session {
                peer,
                state: SessionState::AwaitingResponse,
                messages_since_rotation: 0,
                last_rotation_at: self.clock.now_millis(),
            },
        );
        msg
    }

    /// Handle an inbound `key_exchange_init`, generating our ephemeral key
    /// and a `key_exchange_response` while establishing the session
    /// immediately on our side (spec.md §4.2 responder path).
    pub fn handle_init(
        &self,
        peer: PeerId,
        msg: &KeyExchangeMessage,
        sender_signing_key: &[u8; 32],
    ) -> Result<KeyExchangeMessage> {
        if let Err(err) = exchange::verify_message(msg, sender_signing_key) {
            self.record_signature_failure(peer)?;
            return Err(err);
        }
        let our_ephemeral = X25519KeyPair::generate();
        let our_ephemeral_public = our_ephemeral.public_bytes();
        let keys = exchange::derive_session_keys(
            &our_ephemeral,
            &our_ephemeral_public,
            &msg.ephemeral_public_key,
            false,
        );
        let now = self.clock.now_millis();
        self.sessions.insert(
            peer,
            Session {
                peer,
                state: SessionState::Established { keys },
                messages_since_rotation: 0,
                last_rotation_at: now,
            },
        );
        Ok(exchange::build_message(
            &self.identity,
            KeyExchangeContent::KeyExchangeResponse,
            our_ephemeral_public,
            &self.username,
            None,
        ))
    }

    /// Complete the initiator side once `key_exchange_response` arrives
    /// (spec.md §4.2).
    pub fn handle_response(
        &self,
        peer: PeerId,
        msg: &KeyExchangeMessage,
        sender_signing_key: &[u8; 32],
    ) -> Result<()> {
        if let Err(err) = exchange::verify_message(msg, sender_signing_key) {
            self.record_signature_failure(peer)?;
            return Err(err);
        }
        let pending = self
            .pending
            .remove(&peer)
            .ok_or_else(|| Error::InvalidState("no pending key exchange for this peer".into()))?
            .1;
        if self.clock.now_millis().saturating_sub(pending.started_at) > PENDING_EXPIRATION.as_millis() as u64
        {
            return Err(Error::Timeout("key exchange response arrived too late".into()));
        }
        let our_ephemeral_public = pending.our_ephemeral.public_bytes();
        let keys = exchange::derive_session_keys(
            &pending.our_ephemeral,
            &our_ephemeral_public,
            &msg.ephemeral_public_key,
            true,
        );
        let now = self.clock.now_millis();
        self.sessions.insert(
            peer,
            Session {
                peer,
                state: SessionState::Established { keys },
                messages_since_rotation: 0,
                last_rotation_at: now,
            },
        );
        Ok(())
    }

    /// Record that the peer rejected our exchange (spec.md §4.2).
    pub fn handle_rejected(&self, peer: PeerId) {
        self.pending.remove(&peer);
        if let Some(mut session) = self.sessions.get_mut(&peer) {
            session.state = SessionState::Terminated;
        }
    }

    /// Whether a rotation should be initiated now: message-count threshold
    /// reached and the cooldown since the last rotation has elapsed
    /// (spec.md §4.3).
    pub fn should_rotate(&self, peer: &PeerId) -> bool {
        match self.sessions.get(peer) {
            Some(session) => {
                session.is_established()
                    && session.messages_since_rotation >= ROTATION_THRESHOLD
                    && self.clock.now_millis().saturating_sub(session.last_rotation_at)
                        >= ROTATION_COOLDOWN.as_millis() as u64
            }
            None => false,
        }
    }

    /// Begin a key rotation: keep the old keys live while a new handshake
    /// runs alongside (spec.md §4.3).
    pub fn initiate_rotation(&self, peer: PeerId) -> Result<KeyExchangeMessage> {
        let keys = {
            let session = self
                .sessions
                .get(&peer)
                .ok_or(Error::SessionNotFound)?;
            session.keys().cloned().ok_or(Error::SessionNotFound)?
        };
        let ephemeral = X25519KeyPair::generate();
        let ephemeral_public = ephemeral.public_bytes();
        let msg = exchange::build_message(
            &self.identity,
            KeyExchangeContent::KeyRotation,
            ephemeral_public,
            &self.username,
            None,
        );
        self.pending.insert(
            peer,
            PendingExchange {
                our_ephemeral: ephemeral,
                started_at: self.clock.now_millis(),
            },
        );
        if let Some(mut session) = self.sessions.get_mut(&peer) {
            session.state = SessionState::Rotating { keys };
        }
        Ok(msg)
    }

    /// Respond to an inbound `key_rotation` while our own rotation to the
    /// same peer may also be in flight (spec.md §8 "rotation race"): the side
    /// with the lexicographically smaller peer-id lets its own rotation
    /// proceed — it leaves its `pending` entry untouched and just echoes its
    /// own in-flight `key_rotation` back instead of deriving anything, so the
    /// peer's dial does not hang and our own `handle_rotation_response` later
    /// completes the rotation normally. The other side (larger peer-id, or no
    /// race in flight) cancels any pending attempt of its own and answers the
    /// peer's request as an ordinary responder.
    pub fn handle_rotation(
        &self,
        peer: PeerId,
        our_peer_id: &PeerId,
        msg: &KeyExchangeMessage,
        sender_signing_key: &[u8; 32],
    ) -> Result<KeyExchangeMessage> {
        if let Err(err) = exchange::verify_message(msg, sender_signing_key) {
            self.record_signature_failure(peer)?;
            return Err(err);
        }
        if our_peer_id < &peer {
            if let Some(pending) = self.pending.get(&peer) {
                let our_ephemeral_public = pending.our_ephemeral.public_bytes();
                return Ok(exchange::build_message(
                    &self.identity,
                    KeyExchangeContent::KeyRotation,
                    our_ephemeral_public,
                    &self.username,
                    None,
                ));
            }
        }
        self.pending.remove(&peer);
        let our_ephemeral = X25519KeyPair::generate();
        let our_ephemeral_public = our_ephemeral.public_bytes();
        let keys = exchange::derive_session_keys(
            &our_ephemeral,
            &our_ephemeral_public,
            &msg.ephemeral_public_key,
            false,
        );
        let now = self.clock.now_millis();
        self.sessions.insert(
            peer,
            Session {
                peer,
                state: SessionState::Established { keys },
                messages_since_rotation: 0,
                last_rotation_at: now,
            },
        );
        Ok(exchange::build_message(
            &self.identity,
            KeyExchangeContent::KeyRotationResponse,
            our_ephemeral_public,
            &self.username,
            None,
        ))
    }

    /// Complete our own rotation once `key_rotation_response` arrives
    /// (spec.md §4.3).
    pub fn handle_rotation_response(
        &self,
        peer: PeerId,
        msg: &KeyExchangeMessage,
        sender_signing_key: &[u8; 32],
    ) -> Result<()> {
        self.handle_response(peer, msg, sender_signing_key)
    }

    /// Record that a message was sent/received on this session, for rotation
    /// accounting (spec.md §4.3).
    pub fn record_message(&self, peer: &PeerId) {
        if let Some(mut session) = self.sessions.get_mut(peer) {
            session.messages_since_rotation += 1;
        }
    }

    pub fn session_keys(&self, peer: &PeerId) -> Option<SessionKeys> {
        self.sessions.get(peer).and_then(|s| s.keys().cloned())
    }

    pub fn is_established(&self, peer: &PeerId) -> bool {
        self.sessions
            .get(peer)
            .map(|s| s.is_established())
            .unwrap_or(false)
    }
}
