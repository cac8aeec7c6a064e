//! The `RELEASES` ledger.
//!
//! One `SHA1 filename filesize` line per published artifact, in publish
//! order. Parsing is strict: a single malformed line fails the whole feed,
//! because a partially read feed could make a client skip updates silently.

use std::collections::HashSet;

use semver::Version;

use crate::hash::Sha1Hash;
use crate::release::{ReleaseEntry, ReleaseError};

/// Conventional filename of the ledger.
pub const RELEASES_FILENAME: &str = "RELEASES";

/// Errors raised while reading a `RELEASES` ledger.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ManifestError {
    /// A line could not be parsed.
    #[error("RELEASES line {line} is corrupt ({reason}): '{content}'")]
    Corrupt {
        /// 1-based line number.
        line: usize,
        /// The offending line, verbatim.
        content: String,
        /// What was wrong with it.
        reason: String,
    },
}

/// Ordered set of release entries (insertion order = publish order).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseManifest {
    entries: Vec<ReleaseEntry>,
}

impl ReleaseManifest {
    /// An empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap entries without reordering them.
    pub fn from_entries(entries: Vec<ReleaseEntry>) -> Self {
        Self { entries }
    }

    /// Parse ledger text.
    ///
    /// A leading byte-order mark, blank lines and `#` comments are ignored.
    /// A filename field that is an absolute `http(s)` URL is split into a base
    /// URL and a filename.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Corrupt`] for the first line with the wrong
    /// field count, a non-hex hash, a non-numeric size, or a filename that
    /// does not name a release artifact.
    pub fn parse(text: &str) -> Result<Self, ManifestError> {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        let mut entries = Vec::new();

        for (idx, raw) in text.lines().enumerate() {
            let content = raw.split('#').next().unwrap_or("").trim();
            if content.is_empty() {
                continue;
            }
            let corrupt = |reason: String| ManifestError::Corrupt {
                line: idx + 1,
                content: raw.trim_end_matches('\r').to_string(),
                reason,
            };

            let fields: Vec<&str> = content.split_whitespace().collect();
            let [sha1, location, size] = fields.as_slice() else {
                return Err(corrupt(format!(
                    "expected 3 fields, found {}",
                    fields.len()
                )));
            };

            let sha1 = Sha1Hash::new(sha1).map_err(|e| corrupt(e.to_string()))?;
            let filesize: u64 = size
                .parse()
                .map_err(|_| corrupt(format!("size '{size}' is not a number")))?;
            let (base_url, filename) = split_location(location);
            let mut entry = ReleaseEntry::new(sha1, filename, filesize)
                .map_err(|e: ReleaseError| corrupt(e.to_string()))?;
            entry.base_url = base_url.map(str::to_string);
            entries.push(entry);
        }

        Ok(Self { entries })
    }

    /// Render the ledger: one line per entry, each followed by a newline.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&entry.to_line());
            out.push('\n');
        }
        out
    }

    /// Entries in publish order.
    pub fn entries(&self) -> &[ReleaseEntry] {
        &self.entries
    }

    /// Iterate entries in publish order.
    pub fn iter(&self) -> std::slice::Iter<'_, ReleaseEntry> {
        self.entries.iter()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the ledger has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append an entry, keeping publish order.
    pub fn push(&mut self, entry: ReleaseEntry) {
        self.entries.push(entry);
    }

    /// Look up an entry by filename (case-insensitive).
    pub fn get(&self, filename: &str) -> Option<&ReleaseEntry> {
        self.entries
            .iter()
            .find(|e| e.filename.eq_ignore_ascii_case(filename))
    }

    /// Entries sorted by version, full before delta for equal versions.
    pub fn sorted(&self) -> Vec<&ReleaseEntry> {
        let mut sorted: Vec<&ReleaseEntry> = self.entries.iter().collect();
        sorted.sort_by(|a, b| {
            a.version
                .cmp(&b.version)
                .then_with(|| a.is_delta.cmp(&b.is_delta))
        });
        sorted
    }

    /// The highest-versioned full release strictly below `target`.
    ///
    /// `None` means there is nothing to diff against, so only a full
    /// release gets published.
    pub fn find_previous_full_release(&self, target: &Version) -> Option<&ReleaseEntry> {
        self.entries
            .iter()
            .filter(|e| !e.is_delta && e.version < *target)
            .max_by(|a, b| a.version.cmp(&b.version))
    }

    /// The highest-versioned full release.
    pub fn latest_full(&self) -> Option<&ReleaseEntry> {
        self.entries
            .iter()
            .filter(|e| !e.is_delta)
            .max_by(|a, b| a.version.cmp(&b.version))
    }

    /// The highest version mentioned by any entry.
    pub fn latest_version(&self) -> Option<&Version> {
        self.entries.iter().map(|e| &e.version).max()
    }

    /// The full release for exactly `version`.
    pub fn full_for(&self, version: &Version) -> Option<&ReleaseEntry> {
        self.entries
            .iter()
            .find(|e| !e.is_delta && e.version == *version)
    }

    /// The delta release targeting exactly `version`.
    pub fn delta_for(&self, version: &Version) -> Option<&ReleaseEntry> {
        self.entries
            .iter()
            .find(|e| e.is_delta && e.version == *version)
    }

    /// Distinct package ids mentioned by the ledger.
    pub fn package_ids(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.entries
            .iter()
            .map(|e| e.package_id.as_str())
            .filter(|id| seen.insert(id.to_ascii_lowercase()))
            .collect()
    }

    /// Merge a local ledger over a remote one.
    ///
    /// Entries are keyed by filename; on a clash the local entry wins. The
    /// result is ordered by version, full before delta.
    pub fn merge(local: &Self, remote: &Self) -> Self {
        let mut entries: Vec<ReleaseEntry> = remote
            .entries
            .iter()
            .filter(|r| local.get(&r.filename).is_none())
            .cloned()
            .collect();
        entries.extend(local.entries.iter().cloned());
        entries.sort_by(|a, b| {
            a.version
                .cmp(&b.version)
                .then_with(|| a.is_delta.cmp(&b.is_delta))
        });
        Self { entries }
    }

    /// Keep only the newest `max_full` full releases and the deltas that can
    /// still be applied to them. Returns the removed entries.
    ///
    /// A delta targeting the oldest kept full release is dropped as well,
    /// since its base is no longer published.
    pub fn retain_latest(&mut self, max_full: usize) -> Vec<ReleaseEntry> {
        let mut full_versions: Vec<Version> = self
            .entries
            .iter()
            .filter(|e| !e.is_delta)
            .map(|e| e.version.clone())
            .collect();
        full_versions.sort();
        full_versions.dedup();
        if max_full == 0 || full_versions.len() <= max_full {
            return Vec::new();
        }

        let kept = full_versions.split_off(full_versions.len() - max_full);
        let Some(oldest_kept) = kept.first().cloned() else {
            return Vec::new();
        };

        let (keep, removed): (Vec<ReleaseEntry>, Vec<ReleaseEntry>) =
            self.entries.drain(..).partition(|e| {
                if e.is_delta {
                    e.version > oldest_kept
                } else {
                    e.version >= oldest_kept
                }
            });
        self.entries = keep;
        removed
    }
}

impl<'a> IntoIterator for &'a ReleaseManifest {
    type Item = &'a ReleaseEntry;
    type IntoIter = std::slice::Iter<'a, ReleaseEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl std::str::FromStr for ReleaseManifest {
    type Err = ManifestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Split `https://host/path/App-1.0.0-full.nupkg` into base URL and filename.
fn split_location(location: &str) -> (Option<&str>, &str) {
    let lower = location.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        if let Some(idx) = location.rfind('/') {
            return (Some(&location[..=idx]), &location[idx + 1..]);
        }
    }
    (None, location)
}
