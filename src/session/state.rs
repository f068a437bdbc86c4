//! Per-peer session state machine (spec.md §4.2, §4.3).
//!
//! Grounded on the teacher's `session::noise::NoiseSessionState` phased-enum
//! shape, re-targeted away from Noise: this crate's key exchange is a
//! bespoke 3-message authenticated ECDH, not `Noise_XX`, so the states below
//! describe that handshake instead of Noise's message phases.

use crate::protocol::PeerId;

/// Directional AEAD keys derived once the handshake completes (spec.md
/// §4.2): `sending_key` encrypts messages we send, `receiving_key` decrypts
/// messages from the peer. They are distinct because the HKDF salt is
/// computed over the sorted ephemeral public keys (spec.md §4.2) — each side
/// ends up with the other side's "half" of the keystream.
#[derive(Clone)]
pub struct SessionKeys {
    pub sending_key: [u8; 32],
    pub receiving_key: [u8; 32],
}

/// Phase of the per-peer session state machine (spec.md §4.2, §4.3).
pub enum SessionState {
    /// No handshake in progress.
    Idle,
    /// We sent `KeyExchangeInit` and are waiting for a response. The
    /// ephemeral keypair we sent lives in the manager's `pending` table.
    AwaitingResponse,
    /// Directional AEAD keys are live.
    Established { keys: SessionKeys },
    /// A rotation was initiated; old keys still valid until it completes
    /// (spec.md §4.3: "the old key remains valid until rotation completes").
    /// The new ephemeral keypair lives in the manager's `pending` table, the
    /// same place a fresh handshake's ephemeral key lives.
    Rotating { keys: SessionKeys },
    /// The peer rejected the exchange, or rotation failed past retry.
    Terminated,
}

pub struct Session {
    pub peer: PeerId,
    pub state: SessionState,
    pub messages_since_rotation: u64,
    pub last_rotation_at: u64,
}

impl Session {
    pub fn is_established(&self) -> bool {
        matches!(
            self.state,
            SessionState::Established { .. } | SessionState::Rotating { .. }
        )
    }

    pub fn keys(&self) -> Option<&SessionKeys> {
        match &self.state {
            SessionState::Established { keys } | SessionState::Rotating { keys } => Some(keys),
            _ => None,
        }
    }
}
