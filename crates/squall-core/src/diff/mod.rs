//! Binary diff/patch backends.
//!
//! Two interchangeable algorithms share one contract:
//! `apply_delta(create_delta(old, new), old) == new`.
//!
//! - [`DiffBackend::Legacy`]: bsdiff over a suffix array, suited to
//!   executables. Carries a CRC32 of the output and refuses inputs above a
//!   size ceiling.
//! - [`DiffBackend::Modern`]: zstd with the old blob as a prefix dictionary.
//!   No ceiling.
//!
//! The backend that produced a delta package is recorded in its manifest and
//! must be used to patch it.

mod bsdiff;
mod zstd_dict;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Numeric codes carried by [`DiffError`].
pub mod code {
    /// Input exceeds the backend's size ceiling.
    pub const TOO_LARGE: i32 = 1;
    /// Compression or decompression failed.
    pub const CODEC: i32 = 2;
    /// Delta header or blocks are malformed.
    pub const MALFORMED: i32 = 3;
    /// Reconstructed content failed the embedded checksum.
    pub const CHECKSUM: i32 = 4;
}

/// Default size ceiling for the legacy backend (128 MiB per input).
pub const DEFAULT_LEGACY_CEILING: u64 = 128 * 1024 * 1024;

/// Default zstd level for the modern backend.
pub const DEFAULT_ZSTD_LEVEL: i32 = 9;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiffError {
    #[error("Diff failed (code {code}): {reason}")]
    DiffFailed { code: i32, reason: String },

    #[error("Patch failed (code {code}): {reason}")]
    PatchFailed { code: i32, reason: String },
}

impl DiffError {
    pub(crate) fn diff(code: i32, reason: impl std::fmt::Display) -> Self {
        Self::DiffFailed {
            code,
            reason: reason.to_string(),
        }
    }

    pub(crate) fn patch(code: i32, reason: impl std::fmt::Display) -> Self {
        Self::PatchFailed {
            code,
            reason: reason.to_string(),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            Self::DiffFailed { code, .. } | Self::PatchFailed { code, .. } => *code,
        }
    }
}

/// Tuning shared by both backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiffOptions {
    /// Largest input the legacy backend accepts, in bytes.
    pub legacy_size_ceiling: u64,
    /// zstd level used by the modern backend and for legacy block compression.
    pub zstd_level: i32,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            legacy_size_ceiling: DEFAULT_LEGACY_CEILING,
            zstd_level: DEFAULT_ZSTD_LEVEL,
        }
    }
}

/// A binary diff algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffBackend {
    /// bsdiff with CRC32 signature and size ceiling.
    Legacy,
    /// zstd prefix-dictionary compression.
    #[default]
    Modern,
}

impl DiffBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Legacy => "legacy",
            Self::Modern => "modern",
        }
    }

    /// The other backend.
    pub fn alternative(self) -> Self {
        match self {
            Self::Legacy => Self::Modern,
            Self::Modern => Self::Legacy,
        }
    }

    /// Produce a delta turning `old` into `new`.
    pub fn create_delta(
        self,
        old: &[u8],
        new: &[u8],
        options: &DiffOptions,
    ) -> Result<Vec<u8>, DiffError> {
        let delta = match self {
            Self::Legacy => bsdiff::diff(old, new, options)?,
            Self::Modern => zstd_dict::diff(old, new, options.zstd_level)?,
        };
        debug!(
            backend = self.as_str(),
            old = old.len(),
            new = new.len(),
            delta = delta.len(),
            "created delta"
        );
        Ok(delta)
    }

    /// Reconstruct the new blob from `delta` and `old`.
    pub fn apply_delta(self, delta: &[u8], old: &[u8]) -> Result<Vec<u8>, DiffError> {
        match self {
            Self::Legacy => bsdiff::patch(delta, old),
            Self::Modern => zstd_dict::patch(delta, old),
        }
    }

    /// Pick the backend to use for this process.
    ///
    /// Runs a small round trip on `preferred`; if it fails, the other backend
    /// is tried. Falls back to `preferred` when neither passes, so the
    /// failure surfaces on the first real diff.
    pub fn probe(preferred: Self, options: &DiffOptions) -> Self {
        for candidate in [preferred, preferred.alternative()] {
            match candidate.self_test(options) {
                Ok(()) => {
                    if candidate != preferred {
                        warn!(
                            preferred = preferred.as_str(),
                            selected = candidate.as_str(),
                            "diff backend unavailable, falling back"
                        );
                    }
                    return candidate;
                }
                Err(e) => warn!(backend = candidate.as_str(), error = %e, "diff backend probe failed"),
            }
        }
        preferred
    }

    fn self_test(self, options: &DiffOptions) -> Result<(), DiffError> {
        let old: Vec<u8> = (0u16..2048).map(|i| (i % 251) as u8).collect();
        let mut new = old.clone();
        new[100..140].fill(0xA5);
        new.extend_from_slice(b"probe");
        let delta = self.create_delta(&old, &new, options)?;
        let back = self.apply_delta(&delta, &old)?;
        if back == new {
            Ok(())
        } else {
            Err(DiffError::patch(code::CHECKSUM, "probe round trip mismatch"))
        }
    }
}

impl std::fmt::Display for DiffBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DiffBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "legacy" | "bsdiff" => Ok(Self::Legacy),
            "modern" | "zstd" => Ok(Self::Modern),
            other => Err(format!(
                "Unknown diff backend '{other}' (expected 'legacy' or 'modern')"
            )),
        }
    }
}
