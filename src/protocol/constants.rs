//! Protocol-wide timing and sizing constants (spec.md §5, §4.2, §4.5, §4.6).

use std::time::Duration;

/// Key-exchange acceptance window and pending-exchange expiry.
pub const PENDING_EXPIRATION: Duration = Duration::from_secs(5 * 60);

/// Freshness window for control-message timestamps.
pub const MAX_KEY_EXCHANGE_AGE: Duration = Duration::from_secs(5 * 60);

/// Default inbound key-exchange attempts accepted per peer per window.
pub const KEY_EXCHANGE_RATE_LIMIT: u32 = 10;

/// Re-registration cadence for the username registry.
pub const REREG_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Records older than this are rejected on read.
pub const MAX_REG_AGE: Duration = Duration::from_secs(2 * 5 * 60);

/// Message count at which the sender initiates key rotation.
pub const ROTATION_THRESHOLD: u64 = 15;

/// Minimum spacing between successive rotations.
pub const ROTATION_COOLDOWN: Duration = Duration::from_secs(30);

/// Time to wait for a rotation response before clearing the session.
pub const KEY_ROTATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Bound on a single message decrypt operation.
pub const DECRYPTION_TIMEOUT: Duration = Duration::from_secs(64);

/// Online-send timeout before falling back to the offline store.
pub const MESSAGE_TIMEOUT: Duration = Duration::from_secs(10);

/// Offline-fetch throttle, per peer.
pub const OFFLINE_CHECK_CACHE_TTL: Duration = Duration::from_secs(20);

/// Maximum messages retained per write-bucket.
pub const OFFLINE_MESSAGE_LIMIT: usize = 100;

/// Lifetime of a deposited offline message before `fetch` must treat it as
/// expired (spec.md §4.5 invariant `now < expires_at`).
pub const OFFLINE_MESSAGE_TTL: Duration = Duration::from_secs(14 * 24 * 60 * 60);

/// File-transfer chunk size.
pub const CHUNK_SIZE: usize = 32 * 1024;

/// Maximum accepted file size.
pub const MAX_FILE_SIZE: u64 = 2 * 1024 * 1024 * 1024; // 2 GiB

/// Memory guard on the control-frame decode buffer.
pub const MAX_FILE_MESSAGE_SIZE: usize = 1024 * 1024;

/// Time to wait for the recipient's offer decision.
pub const FILE_ACCEPTANCE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Idle time before an in-progress chunk stream is abandoned.
pub const CHUNK_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Global and per-peer pending-file admission limits.
pub const MAX_PENDING_FILES_TOTAL: usize = 10;
pub const MAX_PENDING_FILES_PER_PEER: usize = 5;

/// Silent-rejection thresholds (global then per-peer).
pub const SILENT_REJECTION_THRESHOLD_GLOBAL: u32 = 20;
pub const SILENT_REJECTION_THRESHOLD_PER_PEER: u32 = 5;

/// Offer rate limit: at most this many offers per window, per peer.
pub const FILE_OFFER_RATE_LIMIT: u32 = 5;
pub const FILE_OFFER_RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

/// Silent-rejection counters reset on this cadence.
pub const FILE_REJECTION_COUNTER_RESET_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Maximum `name_copyK` suffix attempted before giving up on a free filename.
pub const MAX_COPY_ATTEMPTS: u32 = 64;

/// HKDF info strings (spec.md §4.2).
pub const HKDF_INFO_SESSION: &[u8] = b"kiyeovo-hkdf-v1";
pub const HKDF_INFO_OFFLINE: &[u8] = b"kiyeovo-hkdf-offline";
pub const HKDF_INFO_NOTIFICATIONS: &[u8] = b"kiyeovo-hkdf-notifications";

/// Protocol stream identifiers (spec.md §6).
pub const CHAT_PROTOCOL: &str = "/kiyeovo/1.0.0/chat";
pub const FILE_TRANSFER_PROTOCOL: &str = "/kiyeovo/1.0.0/file-transfer";
