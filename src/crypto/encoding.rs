//! base64url (no padding) serde helpers for fixed-size byte arrays and blobs.
//!
//! The wire protocol (spec.md §6) is JSON; every binary field is carried as a
//! base64url string (`ct_b64`, `nonce_b64`, `ephemeral_public_key`, ...).

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub fn encode(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn decode(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(s)
}

/// `#[serde(with = "crate::crypto::encoding::array32")]` for `[u8; 32]` fields.
pub mod array32 {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(d)?;
        let v = decode(&s).map_err(D::Error::custom)?;
        if v.len() != 32 {
            return Err(D::Error::custom(format!("expected 32 bytes, got {}", v.len())));
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(&v);
        Ok(out)
    }
}

/// `#[serde(with = "crate::crypto::encoding::array64")]` for `[u8; 64]` fields
/// (Ed25519 signatures).
pub mod array64 {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &[u8; 64], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 64], D::Error> {
        let s = String::deserialize(d)?;
        let v = decode(&s).map_err(D::Error::custom)?;
        if v.len() != 64 {
            return Err(D::Error::custom(format!("expected 64 bytes, got {}", v.len())));
        }
        let mut out = [0u8; 64];
        out.copy_from_slice(&v);
        Ok(out)
    }
}

/// `#[serde(with = "crate::crypto::encoding::array24")]` for `[u8; 24]`
/// fields (XChaCha20-Poly1305 nonces).
pub mod array24 {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &[u8; 24], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 24], D::Error> {
        let s = String::deserialize(d)?;
        let v = decode(&s).map_err(D::Error::custom)?;
        if v.len() != 24 {
            return Err(D::Error::custom(format!("expected 24 bytes, got {}", v.len())));
        }
        let mut out = [0u8; 24];
        out.copy_from_slice(&v);
        Ok(out)
    }
}

/// `#[serde(with = "crate::crypto::encoding::opt_array64")]` for an optional
/// 64-byte signature field.
pub mod opt_array64 {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Option<[u8; 64]>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => s.serialize_some(&encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<[u8; 64]>, D::Error> {
        let s: Option<String> = Option::deserialize(d)?;
        match s {
            Some(s) => {
                let v = decode(&s).map_err(D::Error::custom)?;
                if v.len() != 64 {
                    return Err(D::Error::custom(format!("expected 64 bytes, got {}", v.len())));
                }
                let mut out = [0u8; 64];
                out.copy_from_slice(&v);
                Ok(Some(out))
            }
            None => Ok(None),
        }
    }
}

/// `#[serde(with = "crate::crypto::encoding::bytes")]` for variable-length blobs.
pub mod bytes {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &Vec<u8>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        decode(&s).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let bytes = [9u8; 32];
        let s = encode(&bytes);
        assert_eq!(decode(&s).unwrap(), bytes.to_vec());
    }
}
