//! Online message send/receive orchestration (spec.md §4.4): wires the
//! transport, session manager, and offline store together into a single
//! `send`/`handle_inbound` surface.
//!
//! Grounded on the teacher's length-prefixed framing convention in
//! `transport::tcp_transport::TcpTransport::send_via_connection`: try the
//! direct path, and on a transport-level failure fall back to a
//! store-and-forward path rather than surfacing the error to the caller.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::clock::Clock;
use crate::crypto::aead;
use crate::crypto::keys::Identity;
use crate::dht::DhtHandle;
use crate::error::{Error, Result};
use crate::offline::OfflineStore;
use crate::protocol::constants::CHAT_PROTOCOL;
use crate::protocol::messages::{ChatMessage, EncryptedMessage, KeyExchangeContent};
use crate::protocol::{now_millis, PeerId};
use crate::session::SessionManager;
use crate::transport::{BoxedStream, Transport};

/// Identity facts about a peer needed to drive a handshake or verify
/// inbound control messages; resolved by the caller via the username
/// registry / chat store before calling into this module.
#[derive(Clone, Copy)]
pub struct PeerKeys {
    pub signing_public_key: [u8; 32],
    pub offline_public_key: [u8; 32],
}

pub enum DeliveryOutcome {
    Online,
    Offline,
}

async fn write_frame(stream: &mut BoxedStream, msg: &ChatMessage) -> Result<()> {
    let body = serde_json::to_vec(msg)?;
    let len = body.len() as u32;
    stream
        .write_all(&len.to_be_bytes())
        .await
        .map_err(|e| Error::Transport(e.to_string()))?;
    stream
        .write_all(&body)
        .await
        .map_err(|e| Error::Transport(e.to_string()))?;
    stream.shutdown().await.map_err(|e| Error::Transport(e.to_string()))
}

async fn read_frame(stream: &mut BoxedStream) -> Result<ChatMessage> {
    let mut len_buf = [0u8; 4];
    stream
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| Error::Transport(e.to_string()))?;
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut body = vec![0u8; len];
    stream
        .read_exact(&mut body)
        .await
        .map_err(|e| Error::Transport(e.to_string()))?;
    Ok(serde_json::from_slice(&body)?)
}

/// One delivered application message, handed to the caller for persistence
/// and UI notification (spec.md §4.4 receive path: "raise a
/// `MessageReceived` event").
pub struct ReceivedMessage {
    pub plaintext: Vec<u8>,
    pub sender_username: String,
    pub timestamp: u64,
    pub offline_ack_timestamp: Option<u64>,
}

pub struct MessageHandler<T: Transport, D: DhtHandle, C: Clock> {
    transport: Arc<T>,
    sessions: Arc<SessionManager<C>>,
    offline: Arc<OfflineStore<D, C>>,
    identity: Identity,
    username: String,
}

impl<T: Transport, D: DhtHandle, C: Clock> MessageHandler<T, D, C> {
    pub fn new(
        transport: Arc<T>,
        sessions: Arc<SessionManager<C>>,
        offline: Arc<OfflineStore<D, C>>,
        identity: Identity,
        username: String,
    ) -> Self {
        Self {
            transport,
            sessions,
            offline,
            identity,
            username,
        }
    }

    /// Run the handshake if no session exists yet (spec.md §4.4
    /// `ensure_session`).
    async fn ensure_session(&self, target: PeerId, peer: PeerKeys) -> Result<()> {
        if self.sessions.is_established(&target) {
            return Ok(());
        }
        let init = self.sessions.initiate(target);
        let mut stream = self.transport.dial(target, CHAT_PROTOCOL).await?;
        write_frame(&mut stream, &ChatMessage::KeyExchange(init)).await?;
        let response = read_frame(&mut stream).await?;
        match response {
            ChatMessage::KeyExchange(msg) if msg.content == KeyExchangeContent::KeyExchangeResponse => {
                self.sessions
                    .handle_response(target, &msg, &peer.signing_public_key)
            }
            ChatMessage::KeyExchange(msg) if msg.content == KeyExchangeContent::KeyExchangeRejected => {
                self.sessions.handle_rejected(target);
                Err(Error::Authorization(
                    msg.reason.unwrap_or_else(|| "key exchange rejected".into()),
                ))
            }
            _ => Err(Error::Protocol("unexpected reply to key exchange init".into())),
        }
    }

    /// spec.md §4.4 `send(target, plaintext)`.
    pub async fn send(
        &self,
        target: PeerId,
        peer: PeerKeys,
        offline_bucket_secret: &[u8; 32],
        plaintext: &[u8],
    ) -> Result<DeliveryOutcome> {
        if let Err(err) = self.ensure_session(target, peer).await {
            return match err {
                Error::Transport(_) | Error::NetworkUnreachable => {
                    self.offline
                        .deposit(
                            &self.identity,
                            &self.username,
                            target,
                            &peer.offline_public_key,
                            offline_bucket_secret,
                            plaintext,
                        )
                        .await?;
                    Ok(DeliveryOutcome::Offline)
                }
                other => Err(other),
            };
        }

        let sending_key = self
            .sessions
            .session_keys(&target)
            .ok_or(Error::SessionNotFound)?
            .sending_key;
        let (nonce, ciphertext) = aead::encrypt(&sending_key, plaintext)?;
        let offline_ack_timestamp = match self.offline.last_read_timestamp(&target) {
            0 => None,
            ts => Some(ts),
        };
        let msg = ChatMessage::Encrypted(EncryptedMessage {
            content: ciphertext,
            nonce,
            sender_username: self.username.clone(),
            timestamp: now_millis(),
            signature: None,
            offline_ack_timestamp,
        });

        match self.transport.dial(target, CHAT_PROTOCOL).await {
            Ok(mut stream) => match write_frame(&mut stream, &msg).await {
                Ok(()) => {
                    self.sessions.record_message(&target);
                    Ok(DeliveryOutcome::Online)
                }
                Err(Error::Transport(_)) => {
                    self.offline
                        .deposit(
                            &self.identity,
                            &self.username,
                            target,
                            &peer.offline_public_key,
                            offline_bucket_secret,
                            plaintext,
                        )
                        .await?;
                    Ok(DeliveryOutcome::Offline)
                }
                Err(other) => Err(other),
            },
            Err(Error::Transport(_)) | Err(Error::NetworkUnreachable) => {
                self.offline
                    .deposit(
                        &self.identity,
                        &self.username,
                        target,
                        &peer.offline_public_key,
                        offline_bucket_secret,
                        plaintext,
                    )
                    .await?;
                Ok(DeliveryOutcome::Offline)
            }
            Err(other) => Err(other),
        }
    }

    /// If this session has crossed the rotation threshold, drive a rotation
    /// to completion over a fresh dial (spec.md §4.3, §8 "rotation race").
    pub async fn maybe_rotate(&self, target: PeerId, peer: PeerKeys) -> Result<()> {
        if !self.sessions.should_rotate(&target) {
            return Ok(());
        }
        let rotation_init = self.sessions.initiate_rotation(target)?;
        let mut stream = self.transport.dial(target, CHAT_PROTOCOL).await?;
        write_frame(&mut stream, &ChatMessage::KeyExchange(rotation_init)).await?;
        let response = read_frame(&mut stream).await?;
        match response {
            ChatMessage::KeyExchange(msg) if msg.content == KeyExchangeContent::KeyRotationResponse => {
                self.sessions
                    .handle_rotation_response(target, &msg, &peer.signing_public_key)
            }
            ChatMessage::KeyExchange(msg) if msg.content == KeyExchangeContent::KeyRotation => {
                // The peer raced us with its own rotation; answer it and let our
                // own attempt lapse (spec.md §8 rotation race, peer-id ordering).
                let our_peer_id = self.identity.peer_id();
                let answer = self
                    .sessions
                    .handle_rotation(target, &our_peer_id, &msg, &peer.signing_public_key)?;
                write_frame(&mut stream, &ChatMessage::KeyExchange(answer)).await?;
                Ok(())
            }
            _ => Err(Error::Protocol("unexpected reply to key rotation".into())),
        }
    }

    /// Handle one accepted inbound stream on the chat protocol (spec.md
    /// §4.4 receive path). Responder-side key exchange messages are
    /// answered on the same stream; encrypted messages are decrypted and
    /// returned to the caller for persistence.
    pub async fn handle_inbound(
        &self,
        from: PeerId,
        sender_signing_key: &[u8; 32],
        mut stream: BoxedStream,
    ) -> Result<Option<ReceivedMessage>> {
        let message = read_frame(&mut stream).await?;
        match message {
            ChatMessage::KeyExchange(msg) if msg.content == KeyExchangeContent::KeyExchangeInit => {
                let response = self.sessions.handle_init(from, &msg, sender_signing_key)?;
                write_frame(&mut stream, &ChatMessage::KeyExchange(response)).await?;
                Ok(None)
            }
            ChatMessage::KeyExchange(msg) if msg.content == KeyExchangeContent::KeyExchangeRejected => {
                self.sessions.handle_rejected(from);
                Ok(None)
            }
            ChatMessage::KeyExchange(msg) if msg.content == KeyExchangeContent::KeyRotation => {
                let our_peer_id = self.identity.peer_id();
                let response = self
                    .sessions
                    .handle_rotation(from, &our_peer_id, &msg, sender_signing_key)?;
                write_frame(&mut stream, &ChatMessage::KeyExchange(response)).await?;
                Ok(None)
            }
            ChatMessage::KeyExchange(msg) if msg.content == KeyExchangeContent::KeyRotationResponse => {
                self.sessions
                    .handle_rotation_response(from, &msg, sender_signing_key)?;
                Ok(None)
            }
            ChatMessage::KeyExchange(_) => Ok(None),
            ChatMessage::Encrypted(msg) => {
                let receiving_key = match self.sessions.session_keys(&from) {
                    Some(keys) => keys.receiving_key,
                    None => return Err(Error::SessionNotFound),
                };
                match aead::decrypt(&receiving_key, &msg.nonce, &msg.content) {
                    Ok(plaintext) => {
                        self.sessions.record_message(&from);
                        if let Some(ack) = msg.offline_ack_timestamp {
                            // spec.md §4.4: "sender observes ACK via online path and
                            // prunes its local write-cache".
                            self.offline.prune_acked(&self.identity, from, ack).await?;
                        }
                        Ok(Some(ReceivedMessage {
                            plaintext,
                            sender_username: msg.sender_username,
                            timestamp: msg.timestamp,
                            offline_ack_timestamp: msg.offline_ack_timestamp,
                        }))
                    }
                    Err(err) => {
                        // spec.md §4.4: "drop and clear the session" on decrypt failure.
                        self.sessions.handle_rejected(from);
                        Err(err)
                    }
                }
            }
        }
    }
}
