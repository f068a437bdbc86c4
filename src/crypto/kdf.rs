//! Key derivation for sessions and offline buckets (spec.md §4.2).
//!
//! Grounded on the teacher's `crypto::keys::GameCrypto::derive_game_key`
//! (SHA-256-based key derivation from a shared secret) generalized to the
//! spec's HKDF-SHA256 scheme via the `hkdf` crate, which the teacher already
//! depends on.

use hkdf::Hkdf;
use sha2::Sha256;

use crate::protocol::{sha256, Hash256, PeerId};

/// `SHA256(min(a, b) || max(a, b))`, independent of argument order.
fn sorted_salt(a: &[u8; 32], b: &[u8; 32]) -> Hash256 {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let mut buf = Vec::with_capacity(64);
    buf.extend_from_slice(lo);
    buf.extend_from_slice(hi);
    sha256(&buf)
}

/// `SHA256(max(a, b) || min(a, b))` — the reverse of [`sorted_salt`], used to
/// make the notifications-bucket salt unlinkable from the offline-bucket
/// salt even though both derive from the same peer-id pair.
fn reverse_sorted_salt(a: &[u8; 32], b: &[u8; 32]) -> Hash256 {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let mut buf = Vec::with_capacity(64);
    buf.extend_from_slice(hi);
    buf.extend_from_slice(lo);
    sha256(&buf)
}

fn hkdf_expand(ikm: &[u8], salt: &[u8], info: &[u8], out: &mut [u8]) {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    hk.expand(info, out)
        .expect("requested HKDF output length is always within RFC 5869 bounds");
}

/// Derive the two directional transport keys shared by both peers from one
/// ECDH shared secret and the two ephemeral public keys involved.
///
/// Returns `(k1, k2)`; role mapping (which side sends with which) is the
/// caller's responsibility (spec.md §4.2 "Role mapping").
pub fn derive_session_keys(
    shared_secret: &[u8; 32],
    eph_a_pub: &[u8; 32],
    eph_b_pub: &[u8; 32],
) -> ([u8; 32], [u8; 32]) {
    let salt = sorted_salt(eph_a_pub, eph_b_pub);
    let mut okm = [0u8; 64];
    hkdf_expand(
        shared_secret,
        &salt,
        crate::protocol::constants::HKDF_INFO_SESSION,
        &mut okm,
    );
    let mut k1 = [0u8; 32];
    let mut k2 = [0u8; 32];
    k1.copy_from_slice(&okm[..32]);
    k2.copy_from_slice(&okm[32..]);
    (k1, k2)
}

/// Derive the shared offline-bucket secret for a direct chat (spec.md §3
/// "Chat" invariant, §4.2).
pub fn derive_offline_bucket_secret(shared_secret: &[u8; 32], peer_a: &PeerId, peer_b: &PeerId) -> [u8; 32] {
    let salt = sorted_salt(peer_a.as_bytes(), peer_b.as_bytes());
    let mut out = [0u8; 32];
    hkdf_expand(
        shared_secret,
        &salt,
        crate::protocol::constants::HKDF_INFO_OFFLINE,
        &mut out,
    );
    out
}

/// Derive the notifications-bucket key, unlinkable from the offline-bucket
/// secret by swapping the salt's byte order (spec.md §4.2).
pub fn derive_notifications_bucket_key(
    shared_secret: &[u8; 32],
    peer_a: &PeerId,
    peer_b: &PeerId,
) -> [u8; 32] {
    let salt = reverse_sorted_salt(peer_a.as_bytes(), peer_b.as_bytes());
    let mut out = [0u8; 32];
    hkdf_expand(
        shared_secret,
        &salt,
        crate::protocol::constants::HKDF_INFO_NOTIFICATIONS,
        &mut out,
    );
    out
}
