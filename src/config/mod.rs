//! Runtime settings (spec.md §6), loaded from TOML with environment
//! overrides, following the teacher's `config::Config` composition
//! (figment-style layering: defaults, then file, then env).

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::gating::ContactMode;

/// `auto_register ∈ {true, false, never}` (spec.md §6): `True` registers on
/// startup if unregistered and keeps re-registering; `False` skips
/// auto-registration but a manual `register()` call still re-registers
/// periodically; `Never` disables registration outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoRegister {
    True,
    False,
    Never,
}

/// User-tunable knobs for the secure-messaging substate (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub username: String,
    pub contact_mode: ContactMode,
    pub auto_register: AutoRegister,
    /// Seconds between DHT username re-registrations.
    pub reregistration_interval_secs: u64,
    /// Max offline messages retained per sender in our bucket.
    pub offline_message_limit: usize,
    /// Max inbound key-exchange attempts accepted per peer per window.
    pub key_exchange_rate_limit: u32,
    /// Bytes per file-transfer chunk.
    pub chunk_size: usize,
    /// Max accepted file size in bytes.
    pub max_file_size: u64,
    /// Max file offers accepted per peer per rate-limit window.
    pub file_offer_rate_limit: u32,
    /// Max concurrently pending inbound file offers from a single peer.
    pub max_pending_files_per_peer: usize,
    /// Max concurrently pending inbound file offers across all peers.
    pub max_pending_files_total: usize,
    /// Silent-rejection counter threshold, summed across all peers.
    pub silent_rejection_threshold_global: u32,
    /// Silent-rejection counter threshold, per peer.
    pub silent_rejection_threshold_per_peer: u32,
    /// Directory incoming files are written to.
    pub downloads_dir: String,
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            username: String::new(),
            contact_mode: ContactMode::Active,
            auto_register: AutoRegister::True,
            reregistration_interval_secs: crate::protocol::constants::REREG_INTERVAL.as_secs(),
            offline_message_limit: crate::protocol::constants::OFFLINE_MESSAGE_LIMIT,
            key_exchange_rate_limit: crate::protocol::constants::KEY_EXCHANGE_RATE_LIMIT,
            chunk_size: crate::protocol::constants::CHUNK_SIZE,
            max_file_size: crate::protocol::constants::MAX_FILE_SIZE,
            file_offer_rate_limit: crate::protocol::constants::FILE_OFFER_RATE_LIMIT,
            max_pending_files_per_peer: crate::protocol::constants::MAX_PENDING_FILES_PER_PEER,
            max_pending_files_total: crate::protocol::constants::MAX_PENDING_FILES_TOTAL,
            silent_rejection_threshold_global: crate::protocol::constants::SILENT_REJECTION_THRESHOLD_GLOBAL,
            silent_rejection_threshold_per_peer: crate::protocol::constants::SILENT_REJECTION_THRESHOLD_PER_PEER,
            downloads_dir: "downloads".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Load from an optional TOML file, then apply `KIYEOVO_*` env overrides.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut settings = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                toml::from_str(&raw).map_err(|e| Error::Config(e.to_string()))?
            }
            None => Settings::default(),
        };
        settings.apply_env_overrides();
        Ok(settings)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("KIYEOVO_USERNAME") {
            self.username = v;
        }
        if let Ok(v) = std::env::var("KIYEOVO_CONTACT_MODE") {
            self.contact_mode = match v.as_str() {
                "active" => ContactMode::Active,
                "silent" => ContactMode::Silent,
                "block" => ContactMode::Block,
                _ => self.contact_mode,
            };
        }
        if let Ok(v) = std::env::var("KIYEOVO_LOG_LEVEL") {
            self.log_level = v;
        }
        if let Ok(v) = std::env::var("KIYEOVO_DOWNLOADS_DIR") {
            self.downloads_dir = v;
        }
        if let Ok(v) = std::env::var("KIYEOVO_MAX_FILE_SIZE") {
            if let Ok(parsed) = v.parse() {
                self.max_file_size = parsed;
            }
        }
        if let Ok(v) = std::env::var("KIYEOVO_AUTO_REGISTER") {
            self.auto_register = match v.as_str() {
                "true" => AutoRegister::True,
                "false" => AutoRegister::False,
                "never" => AutoRegister::Never,
                _ => self.auto_register,
            };
        }
        if let Ok(v) = std::env::var("KIYEOVO_KEY_EXCHANGE_RATE_LIMIT") {
            if let Ok(parsed) = v.parse() {
                self.key_exchange_rate_limit = parsed;
            }
        }
        if let Ok(v) = std::env::var("KIYEOVO_FILE_OFFER_RATE_LIMIT") {
            if let Ok(parsed) = v.parse() {
                self.file_offer_rate_limit = parsed;
            }
        }
        if let Ok(v) = std::env::var("KIYEOVO_MAX_PENDING_FILES_PER_PEER") {
            if let Ok(parsed) = v.parse() {
                self.max_pending_files_per_peer = parsed;
            }
        }
        if let Ok(v) = std::env::var("KIYEOVO_MAX_PENDING_FILES_TOTAL") {
            if let Ok(parsed) = v.parse() {
                self.max_pending_files_total = parsed;
            }
        }
        if let Ok(v) = std::env::var("KIYEOVO_SILENT_REJECTION_THRESHOLD_GLOBAL") {
            if let Ok(parsed) = v.parse() {
                self.silent_rejection_threshold_global = parsed;
            }
        }
        if let Ok(v) = std::env::var("KIYEOVO_SILENT_REJECTION_THRESHOLD_PER_PEER") {
            if let Ok(parsed) = v.parse() {
                self.silent_rejection_threshold_per_peer = parsed;
            }
        }
    }
}
