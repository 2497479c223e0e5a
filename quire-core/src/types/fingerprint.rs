//! Request fingerprints.
//!
//! A fingerprint identifies a logical render request. It is computed as
//!
//! ```text
//! SHA3-256( len(domain) || domain || canonical_json(options) )
//! ```
//!
//! where `canonical_json` serializes the typed options with every object's
//! keys sorted and absent fields omitted. Key order in the original request
//! therefore never changes the fingerprint.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Sha3_256};

use crate::constants::{DOMAIN_REQUEST_FINGERPRINT, FINGERPRINT_SIZE};
use crate::error::{QuireError, Result};
use crate::types::options::canonicalize_json;

/// Content hash of a normalized render request.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; FINGERPRINT_SIZE]);

impl Fingerprint {
    /// Computes the fingerprint of any serializable request description.
    pub fn of<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Ok(Self::from_canonical(&canonical_bytes(value)?))
    }

    /// Hashes already-canonical bytes.
    pub fn from_canonical(canonical: &[u8]) -> Self {
        let mut hasher = Sha3_256::new();
        hasher.update((DOMAIN_REQUEST_FINGERPRINT.len() as u32).to_le_bytes());
        hasher.update(DOMAIN_REQUEST_FINGERPRINT);
        hasher.update(canonical);

        let digest = hasher.finalize();
        let mut bytes = [0u8; FINGERPRINT_SIZE];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    /// Wraps raw fingerprint bytes.
    pub fn from_bytes(bytes: [u8; FINGERPRINT_SIZE]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_SIZE] {
        &self.0
    }

    /// Lowercase hex encoding (64 chars).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses a hex string, with or without a `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self> {
        let s = s.trim();
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s)?;
        let bytes: [u8; FINGERPRINT_SIZE] = bytes.try_into().map_err(|b: Vec<u8>| {
            QuireError::ValidationError(format!(
                "fingerprint must be {FINGERPRINT_SIZE} bytes, got {}",
                b.len()
            ))
        })?;
        Ok(Self(bytes))
    }
}

/// Serializes `value` to canonical JSON bytes: sorted object keys, no
/// insignificant whitespace.
pub fn canonical_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let value = canonicalize_json(serde_json::to_value(value)?);
    Ok(serde_json::to_vec(&value)?)
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &self.to_hex()[..12])
    }
}

impl FromStr for Fingerprint {
    type Err = QuireError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
