//! Package archive accessor.
//!
//! A package is an ordered mapping from relative path to file content.
//! Paths use forward slashes, compare case-insensitively and keep their
//! original casing for output. On disk a package is a zip container written
//! deterministically: sorted entries, fixed timestamps, deflate.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::collections::btree_map;
use std::hash::{Hash, Hasher};
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use zip::write::SimpleFileOptions;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Zip error in {path}: {source}")]
    Zip {
        path: String,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid entry path '{0}'")]
    InvalidPath(String),

    #[error("Duplicate entry '{0}' (paths are case-insensitive)")]
    DuplicateEntry(String),
}

impl ArchiveError {
    fn zip(path: impl Into<String>, source: zip::result::ZipError) -> Self {
        Self::Zip {
            path: path.into(),
            source,
        }
    }

    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// A normalized relative path inside a package.
///
/// Equality, ordering and hashing ignore case; `as_str` keeps the casing the
/// path was created with.
#[derive(Debug, Clone)]
pub struct EntryPath {
    raw: String,
    folded: String,
}

impl EntryPath {
    /// Normalize `raw`: backslashes become slashes, empty and `.` segments
    /// are dropped. Absolute paths and `..` segments are rejected.
    pub fn new(raw: &str) -> Result<Self, ArchiveError> {
        let unified = raw.replace('\\', "/");
        if unified.starts_with('/') || unified.contains(':') {
            return Err(ArchiveError::InvalidPath(raw.to_string()));
        }
        let mut segments = Vec::new();
        for segment in unified.split('/') {
            match segment {
                "" | "." => {}
                ".." => return Err(ArchiveError::InvalidPath(raw.to_string())),
                s => segments.push(s),
            }
        }
        if segments.is_empty() {
            return Err(ArchiveError::InvalidPath(raw.to_string()));
        }
        let normalized = segments.join("/");
        Ok(Self {
            folded: normalized.to_lowercase(),
            raw: normalized,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether the path lies under `prefix` (a directory path ending in `/`),
    /// ignoring case.
    pub fn starts_with_dir(&self, prefix: &str) -> bool {
        self.folded.starts_with(&prefix.to_lowercase())
    }

    /// Convert to a native relative path.
    pub fn to_path(&self) -> PathBuf {
        self.raw.split('/').collect()
    }
}

impl PartialEq for EntryPath {
    fn eq(&self, other: &Self) -> bool {
        self.folded == other.folded
    }
}

impl Eq for EntryPath {}

impl Hash for EntryPath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.folded.hash(state);
    }
}

impl PartialOrd for EntryPath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EntryPath {
    fn cmp(&self, other: &Self) -> Ordering {
        self.folded.cmp(&other.folded)
    }
}

impl std::fmt::Display for EntryPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Content of one archive entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub data: Vec<u8>,
    /// Unix executable bit, restored when the entry is materialized.
    pub executable: bool,
}

impl ArchiveEntry {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            executable: false,
        }
    }

    pub fn executable(data: Vec<u8>) -> Self {
        Self {
            data,
            executable: true,
        }
    }
}

/// An in-memory package: relative path to content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageArchive {
    entries: BTreeMap<EntryPath, ArchiveEntry>,
}

impl PackageArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a package from disk.
    pub fn open(path: &Path) -> Result<Self, ArchiveError> {
        let bytes = std::fs::read(path).map_err(|e| ArchiveError::io(path, e))?;
        Self::from_bytes(&bytes).map_err(|e| match e {
            ArchiveError::Zip { source, .. } => ArchiveError::zip(path.display().to_string(), source),
            other => other,
        })
    }

    /// Read a package from its container bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ArchiveError> {
        let mut zip =
            zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| ArchiveError::zip("<memory>", e))?;
        let mut archive = Self::new();

        for i in 0..zip.len() {
            let mut file = zip.by_index(i).map_err(|e| ArchiveError::zip("<memory>", e))?;
            if file.is_dir() {
                continue;
            }
            let name = file.name().to_string();
            let executable = file.unix_mode().is_some_and(|mode| mode & 0o111 != 0);
            let mut data = Vec::with_capacity(usize::try_from(file.size()).unwrap_or(0));
            file.read_to_end(&mut data)
                .map_err(|e| ArchiveError::io(&name, e))?;
            archive.insert(&name, ArchiveEntry { data, executable })?;
        }

        Ok(archive)
    }

    /// Add an entry. Paths are unique case-insensitively.
    pub fn insert(&mut self, path: &str, entry: ArchiveEntry) -> Result<(), ArchiveError> {
        let key = EntryPath::new(path)?;
        match self.entries.entry(key) {
            btree_map::Entry::Occupied(o) => {
                Err(ArchiveError::DuplicateEntry(o.key().as_str().to_string()))
            }
            btree_map::Entry::Vacant(v) => {
                v.insert(entry);
                Ok(())
            }
        }
    }

    /// Add or replace an entry; the new path casing wins.
    pub fn replace(&mut self, path: &str, entry: ArchiveEntry) -> Result<(), ArchiveError> {
        let key = EntryPath::new(path)?;
        self.entries.remove(&key);
        self.entries.insert(key, entry);
        Ok(())
    }

    /// Remove an entry, returning it if it existed.
    pub fn remove(&mut self, path: &str) -> Option<ArchiveEntry> {
        let key = EntryPath::new(path).ok()?;
        self.entries.remove(&key)
    }

    pub fn get(&self, path: &str) -> Option<&ArchiveEntry> {
        let key = EntryPath::new(path).ok()?;
        self.entries.get(&key)
    }

    /// The stored key for `path`, with its original casing.
    pub fn key(&self, path: &str) -> Option<&EntryPath> {
        let key = EntryPath::new(path).ok()?;
        self.entries.get_key_value(&key).map(|(k, _)| k)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Entries in case-insensitive path order.
    pub fn entries(&self) -> btree_map::Iter<'_, EntryPath, ArchiveEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Encode the package as container bytes. The output only depends on
    /// the entries.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ArchiveError> {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));

        for (path, entry) in &self.entries {
            let mode = if entry.executable { 0o755 } else { 0o644 };
            let options = SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Deflated)
                .last_modified_time(zip::DateTime::default())
                .unix_permissions(mode);
            zip.start_file(path.as_str(), options)
                .map_err(|e| ArchiveError::zip(path.as_str(), e))?;
            zip.write_all(&entry.data)
                .map_err(|e| ArchiveError::io(path.as_str(), e))?;
        }

        let cursor = zip.finish().map_err(|e| ArchiveError::zip("<memory>", e))?;
        Ok(cursor.into_inner())
    }

    /// Write the package to `path` atomically (temp file in the same
    /// directory, then rename).
    pub fn write(&self, path: &Path) -> Result<(), ArchiveError> {
        let bytes = self.to_bytes()?;
        crate::io::write_atomic(path, &bytes).map_err(|e| ArchiveError::io(path, e))
    }
}
