//! Connection gating and contact-mode policy (spec.md §4.7, §4.2 responder
//! authorization).
//!
//! Grounded on the teacher's pluggable-predicate shape: core subsystems
//! contribute rules consumed by the transport upgrader rather than owning
//! the transport themselves, the same separation the teacher keeps between
//! `transport::security` (predicate-style checks) and the transport impls
//! that call them.

use std::collections::HashSet;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::protocol::PeerId;

/// How to treat a key-exchange attempt from a peer we don't already have a
/// chat with (spec.md §4.2 responder path, §6 settings).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactMode {
    /// Prompt the user and await accept/reject.
    Active,
    /// Log the attempt and drop silently.
    Silent,
    /// Drop inbound connections from unknown peers outright.
    Block,
}

impl Default for ContactMode {
    fn default() -> Self {
        ContactMode::Active
    }
}

/// Blocklist + contact-mode policy consumed by the transport upgrader
/// (spec.md §4.7) and by the key-exchange responder path (spec.md §4.2).
pub struct ConnectionGater {
    blocked: RwLock<HashSet<PeerId>>,
    known_contacts: RwLock<HashSet<PeerId>>,
    contact_mode: RwLock<ContactMode>,
}

impl ConnectionGater {
    pub fn new(contact_mode: ContactMode) -> Self {
        Self {
            blocked: RwLock::new(HashSet::new()),
            known_contacts: RwLock::new(HashSet::new()),
            contact_mode: RwLock::new(contact_mode),
        }
    }

    pub fn block(&self, peer: PeerId) {
        self.blocked.write().unwrap().insert(peer);
    }

    pub fn unblock(&self, peer: &PeerId) {
        self.blocked.write().unwrap().remove(peer);
    }

    pub fn is_blocked(&self, peer: &PeerId) -> bool {
        self.blocked.read().unwrap().contains(peer)
    }

    pub fn mark_known(&self, peer: PeerId) {
        self.known_contacts.write().unwrap().insert(peer);
    }

    pub fn is_known(&self, peer: &PeerId) -> bool {
        self.known_contacts.read().unwrap().contains(peer)
    }

    pub fn set_contact_mode(&self, mode: ContactMode) {
        *self.contact_mode.write().unwrap() = mode;
    }

    pub fn contact_mode(&self) -> ContactMode {
        *self.contact_mode.read().unwrap()
    }

    /// Deny dialing a peer outright (spec.md §4.7).
    pub fn deny_dial(&self, peer: &PeerId) -> bool {
        self.is_blocked(peer)
    }

    /// Deny an outbound connection attempt.
    pub fn deny_outbound(&self, peer: &PeerId) -> bool {
        self.is_blocked(peer)
    }

    /// Deny an inbound encrypted connection: always for blocked peers, and
    /// for unknown peers when the local contact-mode is `block` (spec.md
    /// §4.7).
    pub fn deny_inbound_encrypted(&self, peer: &PeerId) -> bool {
        if self.is_blocked(peer) {
            return true;
        }
        self.contact_mode() == ContactMode::Block && !self.is_known(peer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocked_peer_is_always_denied() {
        let gater = ConnectionGater::new(ContactMode::Active);
        let peer = PeerId([1u8; 32]);
        gater.block(peer);
        assert!(gater.deny_dial(&peer));
        assert!(gater.deny_inbound_encrypted(&peer));
    }

    #[test]
    fn block_mode_denies_unknown_peers_only() {
        let gater = ConnectionGater::new(ContactMode::Block);
        let stranger = PeerId([2u8; 32]);
        let known = PeerId([3u8; 32]);
        gater.mark_known(known);
        assert!(gater.deny_inbound_encrypted(&stranger));
        assert!(!gater.deny_inbound_encrypted(&known));
    }
}
