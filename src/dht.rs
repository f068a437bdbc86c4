//! The DHT itself is an external collaborator (spec.md §1); this crate
//! consumes it through the narrow `get`/`put` query interface plus the
//! validator/selector hooks spec.md §4.1 and §4.5 describe.
//!
//! The spec models `get`/`put` as event *streams*; we collect each query to
//! completion as a `Vec<DhtEvent>` before returning, which preserves the
//! semantics callers rely on ("first value that verifies", "any
//! PEER_RESPONSE means success") without requiring this crate to depend on a
//! concrete DHT crate's streaming API. See DESIGN.md for the full rationale.

use async_trait::async_trait;

use crate::error::Result;

#[derive(Debug, Clone)]
pub enum DhtEvent {
    /// A candidate value read back from the DHT.
    Value(Vec<u8>),
    /// A peer acknowledged a put.
    PeerResponse,
    /// A query to one peer failed; does not by itself fail the operation.
    QueryError(String),
}

impl DhtEvent {
    pub fn values(events: &[DhtEvent]) -> impl Iterator<Item = &[u8]> {
        events.iter().filter_map(|e| match e {
            DhtEvent::Value(v) => Some(v.as_slice()),
            _ => None,
        })
    }

    /// spec.md §4.1/§9: a put succeeds if at least one `PEER_RESPONSE` was
    /// observed, even alongside `QUERY_ERROR`s; it fails only if every event
    /// was a `QUERY_ERROR` (or there were no events at all).
    pub fn put_succeeded(events: &[DhtEvent]) -> bool {
        events.iter().any(|e| matches!(e, DhtEvent::PeerResponse))
    }
}

/// A validator rejects malformed/stale/forged records before they are
/// admitted to the DHT (spec.md §4.1, §4.5, §6).
pub type RecordValidator = fn(key: &[u8], value: &[u8]) -> bool;

/// A selector picks a winner among conflicting values for the same key
/// (spec.md §4.1: "prefers the record with the highest timestamp that
/// verifies").
pub type RecordSelector = fn(key: &[u8], candidates: &[&[u8]]) -> usize;

#[async_trait]
pub trait DhtHandle: Send + Sync {
    async fn get(&self, key: &[u8]) -> Result<Vec<DhtEvent>>;
    async fn put(&self, key: &[u8], value: Vec<u8>) -> Result<Vec<DhtEvent>>;

    fn register_validator(&self, namespace: &str, validator: RecordValidator);
    fn register_selector(&self, namespace: &str, selector: RecordSelector);
}
