//! `RELEASES` on disk.
//!
//! Reading, atomic writing and regeneration of the ledger in a release
//! directory. Parsing and ordering rules live in `squall_schema::manifest`.

use std::path::{Path, PathBuf};

use squall_schema::{
    ManifestError, PACKAGE_EXTENSION, RELEASES_FILENAME, ReleaseEntry, ReleaseError,
    ReleaseManifest,
};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ReleasesError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid release artifact {path}: {source}")]
    InvalidEntry {
        path: PathBuf,
        #[source]
        source: ReleaseError,
    },
}

impl ReleasesError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// `RELEASES` inside `dir`.
pub fn releases_path(dir: &Path) -> PathBuf {
    dir.join(RELEASES_FILENAME)
}

/// Build the ledger entry for an artifact file.
pub fn entry_for_file(path: &Path) -> Result<ReleaseEntry, ReleasesError> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let data = std::fs::read(path).map_err(|e| ReleasesError::io(path, e))?;
    ReleaseEntry::from_bytes(&name, &data).map_err(|source| ReleasesError::InvalidEntry {
        path: path.to_path_buf(),
        source,
    })
}

/// Read `dir/RELEASES`.
pub fn load(dir: &Path) -> Result<ReleaseManifest, ReleasesError> {
    let path = releases_path(dir);
    let text = std::fs::read_to_string(&path).map_err(|e| ReleasesError::io(&path, e))?;
    Ok(ReleaseManifest::parse(&text)?)
}

/// Read `dir/RELEASES`, or an empty ledger if there is none yet.
pub fn load_or_default(dir: &Path) -> Result<ReleaseManifest, ReleasesError> {
    match load(dir) {
        Err(ReleasesError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
            Ok(ReleaseManifest::new())
        }
        other => other,
    }
}

/// Atomically write `dir/RELEASES`.
pub fn save(dir: &Path, manifest: &ReleaseManifest) -> Result<(), ReleasesError> {
    let path = releases_path(dir);
    crate::io::write_atomic(&path, manifest.serialize().as_bytes())
        .map_err(|e| ReleasesError::io(&path, e))?;
    debug!(path = %path.display(), entries = manifest.len(), "wrote RELEASES");
    Ok(())
}

/// Regenerate `dir/RELEASES` from every package in `dir`.
///
/// Entries are ordered by version, full before delta. Files whose names do
/// not describe a release are skipped with a warning.
pub fn rebuild(dir: &Path) -> Result<ReleaseManifest, ReleasesError> {
    let mut entries = Vec::new();
    let listing = std::fs::read_dir(dir).map_err(|e| ReleasesError::io(dir, e))?;
    for item in listing {
        let item = item.map_err(|e| ReleasesError::io(dir, e))?;
        let path = item.path();
        let is_package = path.is_file()
            && path
                .file_name()
                .is_some_and(|n| n.to_string_lossy().to_ascii_lowercase().ends_with(PACKAGE_EXTENSION));
        if !is_package {
            continue;
        }
        match entry_for_file(&path) {
            Ok(entry) => entries.push(entry),
            Err(ReleasesError::InvalidEntry { path, source }) => {
                warn!(path = %path.display(), error = %source, "skipping unrecognized package");
            }
            Err(e) => return Err(e),
        }
    }

    entries.sort_by(|a, b| {
        a.version
            .cmp(&b.version)
            .then_with(|| a.is_delta.cmp(&b.is_delta))
            .then_with(|| a.filename.cmp(&b.filename))
    });
    let manifest = ReleaseManifest::from_entries(entries);
    save(dir, &manifest)?;
    info!(dir = %dir.display(), entries = manifest.len(), "rebuilt RELEASES");
    Ok(manifest)
}
