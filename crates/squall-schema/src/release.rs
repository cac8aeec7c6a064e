//! Release artifact naming and the `ReleaseEntry` record.
//!
//! Artifacts are named `{id}-{version}-full.nupkg` or
//! `{id}-{version}-delta.nupkg`. The name alone decides delta-ness and
//! version, so feeds and sync layers never need to open an archive.

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::hash::Sha1Hash;

/// Extension shared by every release artifact.
pub const PACKAGE_EXTENSION: &str = ".nupkg";

/// Filename suffix marking a full release.
pub const FULL_SUFFIX: &str = "-full.nupkg";

/// Filename suffix marking a delta release.
pub const DELTA_SUFFIX: &str = "-delta.nupkg";

/// Errors raised when a filename cannot describe a release artifact.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ReleaseError {
    /// The filename contains a path separator.
    #[error("release filename '{0}' must not contain path separators")]
    PathSeparator(String),

    /// The filename does not end in `.nupkg`.
    #[error("release filename '{0}' does not end in .nupkg")]
    NotAPackage(String),

    /// No `-`-separated suffix of the stem parses as a semantic version.
    #[error("release filename '{0}' does not carry a semantic version")]
    MissingVersion(String),

    /// The package id part of the filename is empty.
    #[error("release filename '{0}' does not carry a package id")]
    MissingId(String),
}

/// Identity decoded from an artifact filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseName {
    /// Package id (may itself contain dashes).
    pub package_id: String,
    /// Version encoded in the name.
    pub version: Version,
    /// Whether the name carries the `-delta` marker.
    pub is_delta: bool,
}

impl ReleaseName {
    /// Decode a release artifact filename.
    ///
    /// The delta marker is matched case-insensitively. Names without a
    /// `-full`/`-delta` marker are treated as full releases. The version is
    /// the longest dash-separated suffix of the stem that parses as semver,
    /// so both ids and pre-release tags may contain dashes.
    ///
    /// # Errors
    ///
    /// Returns [`ReleaseError`] when the name is not a package filename or
    /// does not encode an id and version.
    pub fn parse(filename: &str) -> Result<Self, ReleaseError> {
        if filename.contains(['/', '\\']) {
            return Err(ReleaseError::PathSeparator(filename.to_string()));
        }
        let lower = filename.to_ascii_lowercase();
        let (stem_len, is_delta) = if lower.ends_with(DELTA_SUFFIX) {
            (filename.len() - DELTA_SUFFIX.len(), true)
        } else if lower.ends_with(FULL_SUFFIX) {
            (filename.len() - FULL_SUFFIX.len(), false)
        } else if lower.ends_with(PACKAGE_EXTENSION) {
            (filename.len() - PACKAGE_EXTENSION.len(), false)
        } else {
            return Err(ReleaseError::NotAPackage(filename.to_string()));
        };
        let stem = &filename[..stem_len];

        for (idx, _) in stem.match_indices('-') {
            if let Ok(version) = Version::parse(&stem[idx + 1..]) {
                let package_id = &stem[..idx];
                if package_id.is_empty() {
                    return Err(ReleaseError::MissingId(filename.to_string()));
                }
                return Ok(Self {
                    package_id: package_id.to_string(),
                    version,
                    is_delta,
                });
            }
        }
        Err(ReleaseError::MissingVersion(filename.to_string()))
    }

    /// Canonical filename for this release.
    pub fn filename(&self) -> String {
        let suffix = if self.is_delta { DELTA_SUFFIX } else { FULL_SUFFIX };
        format!("{}-{}{suffix}", self.package_id, self.version)
    }
}

/// Canonical filename of the full release of `id` at `version`.
pub fn full_filename(id: &str, version: &Version) -> String {
    format!("{id}-{version}{FULL_SUFFIX}")
}

/// Canonical filename of the delta release of `id` targeting `version`.
pub fn delta_filename(id: &str, version: &Version) -> String {
    format!("{id}-{version}{DELTA_SUFFIX}")
}

/// One published artifact, as recorded by a line of `RELEASES`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseEntry {
    /// SHA1 of the artifact's exact bytes.
    pub sha1: Sha1Hash,
    /// Absolute location prefix when the feed points outside its own host.
    pub base_url: Option<String>,
    /// Artifact filename, without directories.
    pub filename: String,
    /// Artifact size in bytes.
    pub filesize: u64,
    /// Whether the artifact is a delta release.
    pub is_delta: bool,
    /// Package id decoded from the filename.
    pub package_id: String,
    /// Version decoded from the filename.
    pub version: Version,
}

impl ReleaseEntry {
    /// Build an entry for an artifact, decoding its filename.
    ///
    /// # Errors
    ///
    /// Returns [`ReleaseError`] when `filename` is not a release artifact name.
    pub fn new(sha1: Sha1Hash, filename: &str, filesize: u64) -> Result<Self, ReleaseError> {
        let name = ReleaseName::parse(filename)?;
        Ok(Self {
            sha1,
            base_url: None,
            filename: filename.to_string(),
            filesize,
            is_delta: name.is_delta,
            package_id: name.package_id,
            version: name.version,
        })
    }

    /// Build an entry from an artifact's bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ReleaseError`] when `filename` is not a release artifact name.
    pub fn from_bytes(filename: &str, data: &[u8]) -> Result<Self, ReleaseError> {
        Self::new(Sha1Hash::compute(data), filename, data.len() as u64)
    }

    /// Attach an absolute location prefix (e.g. `https://cdn.example.com/app/`).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Where to fetch the artifact: the filename, or the absolute URL when
    /// the entry carries a base URL.
    pub fn location(&self) -> String {
        match &self.base_url {
            Some(base) => format!("{base}{}", self.filename),
            None => self.filename.clone(),
        }
    }

    /// Whether `data` is exactly the artifact this entry describes.
    pub fn matches(&self, data: &[u8]) -> bool {
        data.len() as u64 == self.filesize && Sha1Hash::compute(data) == self.sha1
    }

    /// Render the entry as one `RELEASES` line (without the newline).
    pub fn to_line(&self) -> String {
        format!(
            "{} {}{} {}",
            self.sha1,
            self.base_url.as_deref().unwrap_or(""),
            self.filename,
            self.filesize
        )
    }
}

impl std::fmt::Display for ReleaseEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_line())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_and_delta_names() {
        let full = ReleaseName::parse("MyApp-1.2.3-full.nupkg").unwrap();
        assert_eq!(full.package_id, "MyApp");
        assert_eq!(full.version, Version::new(1, 2, 3));
        assert!(!full.is_delta);

        let delta = ReleaseName::parse("MyApp-1.2.3-DELTA.nupkg").unwrap();
        assert!(delta.is_delta);
    }

    #[test]
    fn ids_and_prereleases_may_contain_dashes() {
        let name = ReleaseName::parse("my-cool-app-2.0.0-beta.1-full.nupkg").unwrap();
        assert_eq!(name.package_id, "my-cool-app");
        assert_eq!(name.version, Version::parse("2.0.0-beta.1").unwrap());
        assert_eq!(name.filename(), "my-cool-app-2.0.0-beta.1-full.nupkg");
    }

    #[test]
    fn unmarked_package_is_full() {
        let name = ReleaseName::parse("App-1.0.0.nupkg").unwrap();
        assert!(!name.is_delta);
    }

    #[test]
    fn rejects_invalid_names() {
        assert!(matches!(
            ReleaseName::parse("dir/App-1.0.0-full.nupkg"),
            Err(ReleaseError::PathSeparator(_))
        ));
        assert!(matches!(
            ReleaseName::parse("App-1.0.0.zip"),
            Err(ReleaseError::NotAPackage(_))
        ));
        assert!(matches!(
            ReleaseName::parse("App-latest-full.nupkg"),
            Err(ReleaseError::MissingVersion(_))
        ));
        assert!(matches!(
            ReleaseName::parse("-1.0.0-full.nupkg"),
            Err(ReleaseError::MissingId(_))
        ));
    }

    #[test]
    fn entry_line_includes_base_url() {
        let entry = ReleaseEntry::from_bytes("App-1.0.0-full.nupkg", b"payload")
            .unwrap()
            .with_base_url("https://cdn.example.com/app/");
        assert_eq!(
            entry.location(),
            "https://cdn.example.com/app/App-1.0.0-full.nupkg"
        );
        assert!(entry.to_line().ends_with(" https://cdn.example.com/app/App-1.0.0-full.nupkg 7"));
        assert!(entry.matches(b"payload"));
        assert!(!entry.matches(b"payloaD"));
    }
}
