//! Chunked encrypted file transfer over a dedicated protocol stream
//! (spec.md §4.6).
//!
//! Grounded on the teacher's length-prefixed framing convention in
//! `transport::tcp_transport::TcpTransport::send_via_connection` (4-byte
//! big-endian length prefix over a raw stream, `tcp_transport.rs:426-428`)
//! and `gateway::core::RateLimiter`/`RateLimit` (per-source token bucket
//! tracking `violations` and a `banned_until` escalation once violations
//! pile up, plus `mesh::message_queue::MessageQueue`'s capacity-capped
//! enqueue), generalized here from connection/relay admission to file-offer
//! admission.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::{aead, encoding};
use crate::error::{Error, Result};
use crate::protocol::constants::{
    CHUNK_IDLE_TIMEOUT, CHUNK_SIZE, FILE_ACCEPTANCE_TIMEOUT, FILE_OFFER_RATE_LIMIT,
    FILE_OFFER_RATE_LIMIT_WINDOW, FILE_REJECTION_COUNTER_RESET_INTERVAL, MAX_COPY_ATTEMPTS,
    MAX_FILE_SIZE, MAX_PENDING_FILES_PER_PEER, MAX_PENDING_FILES_TOTAL,
    SILENT_REJECTION_THRESHOLD_GLOBAL, SILENT_REJECTION_THRESHOLD_PER_PEER,
};
use crate::protocol::{Hash256, PeerId};

/// One frame on the `/kiyeovo/1.0.0/file-transfer` stream (spec.md §4.6):
/// `[4-byte big-endian length][JSON body]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FileTransferMessage {
    #[serde(rename = "file_offer")]
    Offer(FileOffer),
    #[serde(rename = "file_offer_response")]
    OfferResponse(FileOfferResponse),
    #[serde(rename = "file_chunk")]
    Chunk(FileChunk),
    #[serde(rename = "file_transfer_confirm")]
    Confirm(FileTransferConfirm),
}

impl FileTransferMessage {
    /// Frame with the length prefix spec.md §4.6 specifies.
    pub fn encode_frame(&self) -> Result<Vec<u8>> {
        let body = serde_json::to_vec(self)?;
        let mut framed = Vec::with_capacity(4 + body.len());
        framed.extend_from_slice(&(body.len() as u32).to_be_bytes());
        framed.extend_from_slice(&body);
        Ok(framed)
    }

    pub fn decode_body(body: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(body)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileOffer {
    pub file_id: Uuid,
    pub filename: String,
    pub mime: String,
    pub size: u64,
    pub checksum: Hash256,
    pub total_chunks: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileOfferResponse {
    pub file_id: Uuid,
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChunk {
    pub file_id: Uuid,
    pub index: u32,
    #[serde(with = "encoding::array24")]
    pub nonce: [u8; 24],
    #[serde(with = "encoding::bytes")]
    pub data: Vec<u8>,
    pub hash: Hash256,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileTransferConfirm {
    pub file_id: Uuid,
    pub success: bool,
}

fn total_chunks_for(size: u64) -> u32 {
    ((size + CHUNK_SIZE as u64 - 1) / CHUNK_SIZE as u64) as u32
}

/// spec.md §4.6 receiver step 2d: strip path components, enforce length.
pub fn sanitize_filename(name: &str) -> Result<String> {
    let candidate = std::path::Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");
    if candidate.is_empty() || candidate.len() > 255 || candidate != name {
        return Err(Error::Protocol(format!("unsafe filename: {name}")));
    }
    Ok(candidate.to_string())
}

/// Pick a free destination filename via `name`, `name_copy`, `name_copy2`, ...
/// up to `MAX_COPY_ATTEMPTS` (spec.md §4.6 step 6).
pub fn resolve_destination_name(exists: impl Fn(&str) -> bool, filename: &str) -> Result<String> {
    if !exists(filename) {
        return Ok(filename.to_string());
    }
    let (stem, ext) = match filename.rsplit_once('.') {
        Some((stem, ext)) => (stem.to_string(), format!(".{ext}")),
        None => (filename.to_string(), String::new()),
    };
    for attempt in 2..=MAX_COPY_ATTEMPTS {
        let candidate = if attempt == 2 {
            format!("{stem}_copy{ext}")
        } else {
            format!("{stem}_copy{attempt}{ext}")
        };
        if !exists(&candidate) {
            return Ok(candidate);
        }
    }
    Err(Error::CapacityExceeded(
        "exhausted copy-name attempts for destination file".into(),
    ))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    Idle,
    Offering,
    Transmitting,
    Done,
    Failed,
}

/// Sender-side transfer state machine (spec.md §4.6).
pub struct FileSender {
    pub file_id: Uuid,
    filename: String,
    mime: String,
    plaintext: Vec<u8>,
    checksum: Hash256,
    total_chunks: u32,
    pub state: SenderState,
    next_index: u32,
    last_progress_percent: u32,
}

impl FileSender {
    /// Stat and load the file into memory (spec.md §4.6 step 1-2).
    pub fn new(file_id: Uuid, filename: String, mime: String, plaintext: Vec<u8>) -> Result<Self> {
        let size = plaintext.len() as u64;
        if size == 0 || size > MAX_FILE_SIZE {
            return Err(Error::Protocol(format!("invalid file size: {size}")));
        }
        let checksum: Hash256 = blake3::hash(&plaintext).into();
        let total_chunks = total_chunks_for(size);
        Ok(Self {
            file_id,
            filename,
            mime,
            plaintext,
            checksum,
            total_chunks,
            state: SenderState::Idle,
            next_index: 0,
            last_progress_percent: 0,
        })
    }

    pub fn build_offer(&mut self) -> FileOffer {
        self.state = SenderState::Offering;
        FileOffer {
            file_id: self.file_id,
            filename: self.filename.clone(),
            mime: self.mime.clone(),
            size: self.plaintext.len() as u64,
            checksum: self.checksum,
            total_chunks: self.total_chunks,
        }
    }

    pub fn handle_response(&mut self, response: &FileOfferResponse) -> Result<()> {
        if response.file_id != self.file_id {
            return Err(Error::Protocol("offer response for wrong file_id".into()));
        }
        if response.accepted {
            self.state = SenderState::Transmitting;
            Ok(())
        } else {
            self.state = SenderState::Failed;
            Err(Error::Authorization(
                response.reason.clone().unwrap_or_else(|| "rejected".into()),
            ))
        }
    }

    pub fn mark_expired(&mut self) {
        self.state = SenderState::Failed;
    }

    /// Emit the next chunk, encrypted with the session's sending key
    /// (spec.md §4.6 step 5). Returns `None` once every chunk has been sent.
    /// The second element is `true` when this chunk should trigger a
    /// progress event (first five chunks, then every +10%).
    pub fn next_chunk(&mut self, sending_key: &[u8; 32]) -> Result<Option<(FileChunk, bool)>> {
        if self.next_index >= self.total_chunks {
            self.state = SenderState::Done;
            return Ok(None);
        }
        let start = self.next_index as usize * CHUNK_SIZE;
        let end = (start + CHUNK_SIZE).min(self.plaintext.len());
        let plaintext_chunk = &self.plaintext[start..end];
        let hash: Hash256 = blake3::hash(plaintext_chunk).into();
        let (nonce, ciphertext) = aead::encrypt(sending_key, plaintext_chunk)?;
        let chunk = FileChunk {
            file_id: self.file_id,
            index: self.next_index,
            nonce,
            data: ciphertext,
            hash,
        };

        let should_emit = if self.next_index < 5 {
            true
        } else {
            let percent = ((self.next_index + 1) * 100 / self.total_chunks.max(1)) as u32;
            let emit = percent >= self.last_progress_percent + 10;
            if emit {
                self.last_progress_percent = percent - (percent % 10);
            }
            emit
        };

        self.next_index += 1;
        if self.next_index >= self.total_chunks {
            self.state = SenderState::Done;
        }
        Ok(Some((chunk, should_emit)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    AwaitOffer,
    AwaitingUserDecision,
    Receiving,
    Assembling,
    Completed,
    Failed,
}

/// Receiver-side transfer state machine (spec.md §4.6).
pub struct FileReceiver {
    pub offer: FileOffer,
    pub state: ReceiverState,
    chunks: HashMap<u32, Vec<u8>>,
    pub last_activity_millis: u64,
}

impl FileReceiver {
    pub fn new(offer: FileOffer, now: u64) -> Result<Self> {
        if offer.size == 0 || offer.size > MAX_FILE_SIZE {
            return Err(Error::Protocol("invalid offered file size".into()));
        }
        if offer.total_chunks != total_chunks_for(offer.size) {
            return Err(Error::Protocol("total_chunks does not match size".into()));
        }
        Ok(Self {
            offer,
            state: ReceiverState::AwaitingUserDecision,
            chunks: HashMap::new(),
            last_activity_millis: now,
        })
    }

    pub fn accept(&mut self, now: u64) {
        self.state = ReceiverState::Receiving;
        self.last_activity_millis = now;
    }

    pub fn reject(&mut self) {
        self.state = ReceiverState::Failed;
    }

    pub fn is_decision_overdue(&self, now: u64) -> bool {
        self.state == ReceiverState::AwaitingUserDecision
            && now.saturating_sub(self.last_activity_millis) >= FILE_ACCEPTANCE_TIMEOUT.as_millis() as u64
    }

    pub fn is_idle_timed_out(&self, now: u64) -> bool {
        self.state == ReceiverState::Receiving
            && now.saturating_sub(self.last_activity_millis) >= CHUNK_IDLE_TIMEOUT.as_millis() as u64
    }

    /// Apply one inbound chunk (spec.md §4.6 step 5): rejects out-of-range
    /// or duplicate indices, decrypts, and checks the per-chunk hash.
    pub fn apply_chunk(&mut self, chunk: &FileChunk, receiving_key: &[u8; 32], now: u64) -> Result<()> {
        if self.state != ReceiverState::Receiving {
            return Err(Error::InvalidState("chunk received outside Receiving state".into()));
        }
        if chunk.index >= self.offer.total_chunks {
            self.state = ReceiverState::Failed;
            return Err(Error::Protocol("chunk index out of range".into()));
        }
        if self.chunks.contains_key(&chunk.index) {
            self.state = ReceiverState::Failed;
            return Err(Error::Integrity("duplicate chunk index".into()));
        }
        let plaintext = aead::decrypt(receiving_key, &chunk.nonce, &chunk.data)?;
        let hash: Hash256 = blake3::hash(&plaintext).into();
        if hash != chunk.hash {
            self.state = ReceiverState::Failed;
            return Err(Error::Integrity("chunk hash mismatch".into()));
        }
        self.chunks.insert(chunk.index, plaintext);
        self.last_activity_millis = now;
        Ok(())
    }

    /// Once every chunk has arrived, concatenate and verify the whole-file
    /// checksum (spec.md §4.6 step 6).
    pub fn assemble(&mut self) -> Result<Vec<u8>> {
        self.state = ReceiverState::Assembling;
        if self.chunks.len() as u32 != self.offer.total_chunks {
            self.state = ReceiverState::Failed;
            return Err(Error::Protocol("missing chunks at assembly time".into()));
        }
        let mut data = Vec::with_capacity(self.offer.size as usize);
        for index in 0..self.offer.total_chunks {
            data.extend_from_slice(
                self.chunks
                    .get(&index)
                    .ok_or_else(|| Error::Protocol("missing chunk during assembly".into()))?,
            );
        }
        let checksum: Hash256 = blake3::hash(&data).into();
        if checksum != self.offer.checksum {
            self.state = ReceiverState::Failed;
            return Err(Error::Integrity("assembled file checksum mismatch".into()));
        }
        self.state = ReceiverState::Completed;
        Ok(data)
    }
}

#[derive(Default)]
struct PeerAdmission {
    pending: u32,
    rejections_since_reset: u32,
    offer_timestamps: Vec<u64>,
}

/// Admission control for inbound file offers (spec.md §4.6 step 2):
/// global/per-peer pending caps, per-peer offer rate limiting, and a
/// silent-drop escalation once rejection counters pass their thresholds.
pub struct AdmissionControl {
    total_pending: RwLock<u32>,
    global_rejections: RwLock<u32>,
    per_peer: RwLock<HashMap<PeerId, PeerAdmission>>,
    last_counter_reset: RwLock<u64>,
}

impl Default for AdmissionControl {
    fn default() -> Self {
        Self {
            total_pending: RwLock::new(0),
            global_rejections: RwLock::new(0),
            per_peer: RwLock::new(HashMap::new()),
            last_counter_reset: RwLock::new(0),
        }
    }
}

/// Result of an admission check.
pub enum Admission {
    Accept,
    /// Reject with a reply (counted toward the silent-rejection threshold).
    RejectWithReply,
    /// Drop silently: a threshold has been crossed, don't spend bandwidth
    /// on a reply.
    RejectSilently,
}

impl AdmissionControl {
    fn maybe_reset_counters(&self, now: u64) {
        let mut last_reset = self.last_counter_reset.write().unwrap();
        if now.saturating_sub(*last_reset) >= FILE_REJECTION_COUNTER_RESET_INTERVAL.as_millis() as u64 {
            *last_reset = now;
            *self.global_rejections.write().unwrap() = 0;
            for admission in self.per_peer.write().unwrap().values_mut() {
                admission.rejections_since_reset = 0;
            }
        }
    }

    /// spec.md §4.6 step 2: admission control in order. `is_known` must come
    /// from `ConnectionGater::is_known` — a file offer from a peer we have
    /// no established chat with is rejected outright (step 2e,
    /// "first-contact-via-file is disallowed"), before any capacity check.
    pub fn check_offer(&self, peer: PeerId, is_known: bool, now: u64) -> Result<Admission> {
        if !is_known {
            return Err(Error::Authorization(
                "file offers from unknown contacts are not allowed".into(),
            ));
        }

        self.maybe_reset_counters(now);

        if *self.total_pending.read().unwrap() >= MAX_PENDING_FILES_TOTAL as u32 {
            let mut global_rejections = self.global_rejections.write().unwrap();
            *global_rejections += 1;
            return Ok(if *global_rejections > SILENT_REJECTION_THRESHOLD_GLOBAL {
                Admission::RejectSilently
            } else {
                Admission::RejectWithReply
            });
        }

        let mut per_peer = self.per_peer.write().unwrap();
        let admission = per_peer.entry(peer).or_default();
        admission
            .offer_timestamps
            .retain(|ts| now.saturating_sub(*ts) < FILE_OFFER_RATE_LIMIT_WINDOW.as_millis() as u64);

        if admission.pending >= MAX_PENDING_FILES_PER_PEER as u32 {
            admission.rejections_since_reset += 1;
            return Ok(if admission.rejections_since_reset > SILENT_REJECTION_THRESHOLD_PER_PEER {
                Admission::RejectSilently
            } else {
                Admission::RejectWithReply
            });
        }

        if admission.offer_timestamps.len() as u32 >= FILE_OFFER_RATE_LIMIT {
            return Ok(Admission::RejectWithReply);
        }

        admission.offer_timestamps.push(now);
        admission.pending += 1;
        *self.total_pending.write().unwrap() += 1;
        Ok(Admission::Accept)
    }

    /// Release one pending slot once a transfer finishes or is abandoned.
    pub fn release(&self, peer: &PeerId) {
        let mut total_pending = self.total_pending.write().unwrap();
        *total_pending = total_pending.saturating_sub(1);
        if let Some(admission) = self.per_peer.write().unwrap().get_mut(peer) {
            admission.pending = admission.pending.saturating_sub(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sender_rejects_empty_and_oversized_files() {
        assert!(FileSender::new(Uuid::new_v4(), "a".into(), "text/plain".into(), vec![]).is_err());
    }

    #[test]
    fn happy_path_transfer_roundtrips() {
        let key = [1u8; 32];
        let data: Vec<u8> = (0..(CHUNK_SIZE * 2 + 10)).map(|i| (i % 256) as u8).collect();
        let mut sender = FileSender::new(Uuid::new_v4(), "f.bin".into(), "application/octet-stream".into(), data.clone()).unwrap();
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

        while let Some((chunk, _)) = sender.next_chunk(&key).unwrap() {
            receiver.apply_chunk(&chunk, &key, 0).unwrap();
        }
        assert_eq!(sender.state, SenderState::Done);
        let assembled = receiver.assemble().unwrap();
        assert_eq!(assembled, data);
    }

    #[test]
    fn duplicate_chunk_index_is_fatal() {
        let key = [1u8; 32];
        let data = vec![7u8; 10];
        let mut sender = FileSender::new(Uuid::new_v4(), "f.bin".into(), "text/plain".into(), data).unwrap();
        let offer = sender.build_offer();
        sender
            .handle_response(&FileOfferResponse { file_id: offer.file_id, accepted: true, reason: None })
            .unwrap();
        let mut receiver = FileReceiver::new(offer, 0).unwrap();
        receiver.accept(0);
        let (chunk, _) = sender.next_chunk(&key).unwrap().unwrap();
        receiver.apply_chunk(&chunk, &key, 0).unwrap();
        assert!(receiver.apply_chunk(&chunk, &key, 0).is_err());
    }

    #[test]
    fn tampered_chunk_hash_is_rejected() {
        let key = [1u8; 32];
        let data = vec![3u8; 10];
        let mut sender = FileSender::new(Uuid::new_v4(), "f.bin".into(), "text/plain".into(), data).unwrap();
        let offer = sender.build_offer();
        sender
            .handle_response(&FileOfferResponse { file_id: offer.file_id, accepted: true, reason: None })
            .unwrap();
        let mut receiver = FileReceiver::new(offer, 0).unwrap();
        receiver.accept(0);
        let (mut chunk, _) = sender.next_chunk(&key).unwrap().unwrap();
        chunk.hash = [0u8; 32];
        assert!(receiver.apply_chunk(&chunk, &key, 0).is_err());
    }

    #[test]
    fn sanitize_filename_rejects_path_components() {
        assert!(sanitize_filename("../../etc/passwd").is_err());
        assert_eq!(sanitize_filename("report.pdf").unwrap(), "report.pdf");
    }

    #[test]
    fn resolve_destination_name_appends_copy_suffix() {
        let taken = ["report.pdf", "report_copy.pdf"];
        let name = resolve_destination_name(|n| taken.contains(&n), "report.pdf").unwrap();
        assert_eq!(name, "report_copy2.pdf");
    }

    #[test]
    fn admission_control_caps_total_pending() {
        let admission = AdmissionControl::default();
        for i in 0..MAX_PENDING_FILES_TOTAL {
            let peer = PeerId([i as u8; 32]);
            assert!(matches!(
                admission.check_offer(peer, true, 0).unwrap(),
                Admission::Accept
            ));
        }
        let overflow_peer = PeerId([99u8; 32]);
        assert!(matches!(
            admission.check_offer(overflow_peer, true, 0).unwrap(),
            Admission::RejectWithReply
        ));
    }

    #[test]
    fn admission_control_rejects_unknown_contact_before_capacity_checks() {
        let admission = AdmissionControl::default();
        let peer = PeerId([1u8; 32]);
        let err = admission.check_offer(peer, false, 0).unwrap_err();
        assert!(matches!(err, Error::Authorization(_)));
    }
}
