//! Integrity hash types (SHA-1 and BLAKE3).

use serde::{Deserialize, Deserializer, Serialize};
use sha1::{Digest, Sha1};

/// Errors raised when a hash string fails validation.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum HashError {
    /// The string has the wrong number of characters.
    #[error("Invalid SHA1 hash: expected 40 hex characters, got {0}")]
    InvalidLength(usize),

    /// The string contains characters outside `[0-9a-fA-F]`.
    #[error("Invalid SHA1 hash: contains non-hex characters in '{0}'")]
    NonHex(String),
}

/// A validated SHA1 digest (40 hex characters).
///
/// SHA1 is the integrity hash recorded in `RELEASES` feeds. Digests are stored
/// in upper case, matching what existing feeds carry, so comparisons ignore
/// the case of the original input.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Sha1Hash(String);

impl Sha1Hash {
    /// Create a validated `Sha1Hash`.
    ///
    /// # Errors
    ///
    /// Returns [`HashError`] if `s` is not exactly 40 ASCII hex characters.
    pub fn new(s: &str) -> Result<Self, HashError> {
        if s.len() != 40 {
            return Err(HashError::InvalidLength(s.len()));
        }
        if !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(HashError::NonHex(s.to_string()));
        }
        Ok(Self(s.to_ascii_uppercase()))
    }

    /// Compute the SHA1 digest of `data`.
    pub fn compute(data: &[u8]) -> Self {
        Self(hex::encode_upper(Sha1::digest(data)))
    }

    /// Compute the SHA1 digest of a file by reading it entirely into memory.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read.
    pub fn compute_file(path: &std::path::Path) -> std::io::Result<Self> {
        let data = std::fs::read(path)?;
        Ok(Self::compute(&data))
    }

    /// Return the inner hex string as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for Sha1Hash {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl<'de> Deserialize<'de> for Sha1Hash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::new(&s).map_err(serde::de::Error::custom)
    }
}

impl std::fmt::Display for Sha1Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Sha1Hash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// BLAKE3 hash for fast internal operations (file identity, dedup).
///
/// Used to decide whether a file is unchanged between two package versions.
/// Never written to `RELEASES`; SHA1 stays the published integrity hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Blake3Hash(String);

impl Blake3Hash {
    /// Compute BLAKE3 hash of data.
    pub fn compute(data: &[u8]) -> Self {
        let hash = blake3::hash(data);
        Self(hash.to_hex().to_string())
    }

    /// Return the inner hex string as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Blake3Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
