//! Repository sync: mirroring a release directory to and from remote storage.
//!
//! Backends implement [`RemoteStore`]; a [`SyncSession`] drives one upload
//! or download over a store with retries and deduplication.

mod local;
mod retry;
mod session;

#[cfg(feature = "network")]
mod github;
#[cfg(feature = "network")]
mod http;
#[cfg(feature = "s3")]
mod s3;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use squall_schema::{ManifestError, ReleaseManifest};
use thiserror::Error;

use crate::releases::ReleasesError;

pub use local::LocalStore;
pub use retry::{Backoff, RetryPolicy};
pub use session::{DownloadSummary, SyncSession, UploadAction, UploadOptions, UploadSummary};

#[cfg(feature = "network")]
pub use github::{GitHubConfig, GitHubStore};
#[cfg(feature = "network")]
pub use http::HttpStore;
#[cfg(feature = "s3")]
pub use s3::{S3Config, S3Store};

/// How a transport failure should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Network, timeout or 5xx: worth another attempt.
    Retryable,
    /// Auth, unsupported operation or bad request: retrying will not help.
    Fatal,
    /// The object does not exist.
    NotFound,
}

#[derive(Error, Debug)]
#[error("{message}")]
pub struct TransportError {
    kind: TransportErrorKind,
    message: String,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn retryable(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Retryable, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Fatal, message)
    }

    pub fn not_found(name: &str) -> Self {
        Self::new(TransportErrorKind::NotFound, format!("{name} not found"))
    }

    pub fn unsupported(store: &str, operation: &str) -> Self {
        Self::fatal(format!("{store} does not support {operation}"))
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == TransportErrorKind::Retryable
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == TransportErrorKind::NotFound
    }

    /// Classify a local filesystem error.
    pub fn from_io(name: &str, err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        let kind = match err.kind() {
            ErrorKind::NotFound => TransportErrorKind::NotFound,
            ErrorKind::TimedOut | ErrorKind::Interrupted | ErrorKind::WouldBlock => {
                TransportErrorKind::Retryable
            }
            _ => TransportErrorKind::Fatal,
        };
        Self::new(kind, format!("{name}: {err}")).with_source(err)
    }

    /// Classify an HTTP status code.
    pub fn from_status(name: &str, status: u16) -> Self {
        let kind = match status {
            404 => TransportErrorKind::NotFound,
            408 | 429 | 500..=599 => TransportErrorKind::Retryable,
            _ => TransportErrorKind::Fatal,
        };
        Self::new(kind, format!("{name}: HTTP {status}"))
    }
}

#[cfg(feature = "network")]
impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        let kind = match err.status() {
            Some(status) => Self::from_status("request", status.as_u16()).kind,
            None if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() => {
                TransportErrorKind::Retryable
            }
            None => TransportErrorKind::Fatal,
        };
        Self::new(kind, err.to_string()).with_source(err)
    }
}

/// One object in a remote listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    pub name: String,
    /// Hash in the store's own format (see [`RemoteStore::content_hash`]).
    pub content_hash: Option<String>,
    pub size: Option<u64>,
    /// Backend-specific version handle, e.g. an S3 version id.
    pub version: Option<String>,
}

/// Flat remote storage holding one release directory.
///
/// Names are bare filenames. `download` also accepts the absolute location
/// of an entry with a base URL; backends that cannot fetch URLs use the
/// trailing filename.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Human-readable location for logs.
    fn describe(&self) -> String;

    async fn list(&self) -> Result<Vec<RemoteObject>, TransportError>;

    async fn download(&self, name: &str) -> Result<Bytes, TransportError>;

    /// Create or replace `name`. Readers never see a partial object.
    async fn upload(&self, name: &str, data: Bytes) -> Result<(), TransportError>;

    /// Server-side copy of `from` to `to`.
    async fn copy(&self, from: &str, to: &str) -> Result<(), TransportError>;

    /// Delete `name`. Deleting a missing object succeeds.
    async fn delete(&self, name: &str) -> Result<(), TransportError>;

    /// Hash of `data` in the format `list` reports.
    fn content_hash(&self, data: &[u8]) -> String;

    fn supports_copy(&self) -> bool {
        true
    }

    /// Remove what an overwrite of `previous` left behind, once the new
    /// content is confirmed. Stores that replace in place have nothing to do.
    async fn delete_superseded(&self, _previous: &RemoteObject) -> Result<(), TransportError> {
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Failed to upload {name}: {source}")]
    UploadFailed {
        name: String,
        #[source]
        source: TransportError,
    },

    #[error("Failed to download {name}: {source}")]
    DownloadFailed {
        name: String,
        #[source]
        source: TransportError,
    },

    #[error("Failed to list {store}: {source}")]
    ListFailed {
        store: String,
        #[source]
        source: TransportError,
    },

    #[error("Upload of {0} could not be confirmed")]
    Unconfirmed(String),

    #[error("Hash mismatch for {name}: expected {expected}, got {actual}")]
    HashMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("RELEASES mixes package ids: {}", .0.join(", "))]
    MixedPackageIds(Vec<String>),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Releases(#[from] ReleasesError),

    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Reject a ledger that mentions more than one package id.
pub(crate) fn check_single_package(manifest: &ReleaseManifest) -> Result<(), SyncError> {
    let ids = manifest.package_ids();
    if ids.len() > 1 {
        return Err(SyncError::MixedPackageIds(
            ids.into_iter().map(str::to_string).collect(),
        ));
    }
    Ok(())
}

/// Open the store a location string points at.
///
/// - `s3://bucket/prefix`: S3 with credentials from `SQUALL_S3_*`
/// - `github://owner/repo/tag`: assets of a GitHub release
/// - `http://` / `https://`: read-only HTTP feed
/// - `file://path` or a plain path: local directory
pub fn store_from_url(location: &str) -> Result<Arc<dyn RemoteStore>, TransportError> {
    if let Some(rest) = location.strip_prefix("s3://") {
        #[cfg(feature = "s3")]
        {
            let (bucket, prefix) = rest.split_once('/').unwrap_or((rest, ""));
            let config = S3Config::from_env(bucket, prefix).ok_or_else(|| {
                TransportError::fatal(
                    "S3 credentials missing: set SQUALL_S3_ACCESS_KEY and SQUALL_S3_SECRET_KEY",
                )
            })?;
            return Ok(Arc::new(S3Store::new(config)));
        }
        #[cfg(not(feature = "s3"))]
        {
            let _ = rest;
            return Err(TransportError::fatal("built without S3 support"));
        }
    }

    if let Some(rest) = location.strip_prefix("github://") {
        #[cfg(feature = "network")]
        {
            let config = GitHubConfig::parse(rest)?;
            return Ok(Arc::new(GitHubStore::new(config)?));
        }
        #[cfg(not(feature = "network"))]
        {
            let _ = rest;
            return Err(TransportError::fatal("built without network support"));
        }
    }

    if location.starts_with("http://") || location.starts_with("https://") {
        #[cfg(feature = "network")]
        {
            return Ok(Arc::new(HttpStore::new(location)?));
        }
        #[cfg(not(feature = "network"))]
        {
            return Err(TransportError::fatal("built without network support"));
        }
    }

    let path = location.strip_prefix("file://").unwrap_or(location);
    Ok(Arc::new(LocalStore::new(path)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_classify() {
        assert!(TransportError::from_status("x", 503).is_retryable());
        assert!(TransportError::from_status("x", 429).is_retryable());
        assert!(TransportError::from_status("x", 404).is_not_found());
        assert_eq!(
            TransportError::from_status("x", 403).kind(),
            TransportErrorKind::Fatal
        );
    }

    #[test]
    fn plain_paths_open_local_stores() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_from_url(&dir.path().display().to_string()).unwrap();
        assert!(store.describe().contains(&dir.path().display().to_string()));
        let url = format!("file://{}", dir.path().display());
        assert!(store_from_url(&url).is_ok());
    }

    #[cfg(feature = "network")]
    #[test]
    fn malformed_github_location_is_rejected() {
        assert!(store_from_url("github://owner-only").is_err());
    }
}
