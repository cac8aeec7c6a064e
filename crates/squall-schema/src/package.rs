//! Package identity and embedded package metadata.

use semver::Version;
use serde::{Deserialize, Serialize};

/// Name of the metadata file embedded at the root of every full package.
pub const METADATA_FILENAME: &str = "package.toml";

/// Errors raised when a package id is unusable.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PackageIdError {
    /// The id is empty.
    #[error("package id must not be empty")]
    Empty,

    /// The id contains a character outside `[A-Za-z0-9._-]`.
    #[error("package id '{0}' may only contain ASCII letters, digits, '.', '_' and '-'")]
    InvalidCharacter(String),
}

/// Metadata embedded in a full package (`package.toml`).
///
/// ```toml
/// id = "MyApp"
/// version = "1.1.0"
/// title = "My App"
/// platform = "linux-x86_64"
/// release_notes = "Fixes the crash on startup."
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageMetadata {
    /// Package id shared by every version of the application.
    pub id: String,
    /// Version of this package.
    pub version: Version,
    /// Human-readable title.
    pub title: String,
    /// Platform directory under `lib/` holding the application files.
    pub platform: String,
    /// Optional release notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_notes: Option<String>,
}

impl PackageMetadata {
    /// Archive prefix of the application files, e.g. `lib/linux-x86_64/`.
    pub fn lib_prefix(&self) -> String {
        format!("lib/{}/", self.platform)
    }
}

/// Check that `id` can be embedded in artifact filenames.
///
/// # Errors
///
/// Returns [`PackageIdError`] for empty ids or ids with characters that
/// would break artifact naming.
pub fn validate_package_id(id: &str) -> Result<(), PackageIdError> {
    if id.is_empty() {
        return Err(PackageIdError::Empty);
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(PackageIdError::InvalidCharacter(id.to_string()));
    }
    Ok(())
}
