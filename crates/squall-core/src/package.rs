//! Release package builder.
//!
//! Turns a build-output directory into a full package:
//!
//! ```text
//! package.toml            id / version / title / platform / release notes
//! lib/<platform>/**       application files
//! ```
//!
//! Files are walked in name order and stored under case-insensitive keys, so
//! two builds of the same tree produce the same archive and unchanged files
//! hash identically across versions.

use std::path::{Path, PathBuf};

use semver::Version;
use squall_schema::{METADATA_FILENAME, PackageIdError, PackageMetadata, full_filename};
use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::archive::{ArchiveEntry, ArchiveError, PackageArchive};

/// Errors that can occur when building or reading a package.
#[derive(Error, Debug)]
pub enum PackageError {
    /// The package id cannot be used in artifact names.
    #[error(transparent)]
    InvalidId(#[from] PackageIdError),

    /// The build directory is missing or holds no files.
    #[error("Build directory {0} contains no files")]
    EmptyBuildDir(PathBuf),

    /// Walking or reading the build directory failed.
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The archive has no `package.toml`.
    #[error("Package has no package.toml")]
    MissingMetadata,

    /// `package.toml` is not valid.
    #[error("Invalid package.toml: {0}")]
    InvalidMetadata(String),

    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

/// Default platform directory for packages built on this machine, e.g.
/// `linux-x86_64`.
pub fn current_platform() -> String {
    format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH)
}

/// Builds full release packages from a build-output directory.
#[derive(Debug, Clone)]
pub struct ReleasePackageBuilder {
    id: String,
    version: Version,
    title: Option<String>,
    release_notes: Option<String>,
    platform: String,
    include_debug_symbols: bool,
}

impl ReleasePackageBuilder {
    pub fn new(id: impl Into<String>, version: Version) -> Result<Self, PackageError> {
        let id = id.into();
        squall_schema::validate_package_id(&id)?;
        Ok(Self {
            id,
            version,
            title: None,
            release_notes: None,
            platform: current_platform(),
            include_debug_symbols: false,
        })
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn release_notes(mut self, notes: impl Into<String>) -> Self {
        self.release_notes = Some(notes.into());
        self
    }

    pub fn platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = platform.into();
        self
    }

    pub fn include_debug_symbols(mut self, include: bool) -> Self {
        self.include_debug_symbols = include;
        self
    }

    /// Metadata that will be embedded in the package.
    pub fn metadata(&self) -> PackageMetadata {
        PackageMetadata {
            id: self.id.clone(),
            version: self.version.clone(),
            title: self.title.clone().unwrap_or_else(|| self.id.clone()),
            platform: self.platform.clone(),
            release_notes: self.release_notes.clone(),
        }
    }

    /// `{id}-{version}-full.nupkg`
    pub fn suggested_filename(&self) -> String {
        full_filename(&self.id, &self.version)
    }

    /// Assemble the package from `build_dir`.
    pub fn build(&self, build_dir: &Path) -> Result<PackageArchive, PackageError> {
        let meta = self.metadata();
        let prefix = meta.lib_prefix();
        let mut archive = PackageArchive::new();
        let mut skipped = 0usize;

        for entry in WalkDir::new(build_dir)
            .follow_links(false)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(build_dir).to_path_buf();
                PackageError::Io {
                    path,
                    source: e.into(),
                }
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(build_dir) else {
                continue;
            };
            if !self.include_debug_symbols && is_debug_symbol(rel) {
                skipped += 1;
                continue;
            }

            let data = std::fs::read(entry.path()).map_err(|source| PackageError::Io {
                path: entry.path().to_path_buf(),
                source,
            })?;
            let rel = rel.to_string_lossy().replace('\\', "/");
            let stored = ArchiveEntry {
                data,
                executable: is_executable(entry.path()),
            };
            archive.insert(&format!("{prefix}{rel}"), stored)?;
        }

        if archive.is_empty() {
            return Err(PackageError::EmptyBuildDir(build_dir.to_path_buf()));
        }

        let meta_toml =
            toml::to_string(&meta).map_err(|e| PackageError::InvalidMetadata(e.to_string()))?;
        archive.insert(METADATA_FILENAME, ArchiveEntry::new(meta_toml.into_bytes()))?;

        if skipped > 0 {
            debug!(skipped, "excluded debug symbol files");
        }
        info!(
            id = %meta.id,
            version = %meta.version,
            files = archive.len() - 1,
            "built release package"
        );
        Ok(archive)
    }
}

/// Read the embedded `package.toml`.
pub fn read_metadata(archive: &PackageArchive) -> Result<PackageMetadata, PackageError> {
    let entry = archive
        .get(METADATA_FILENAME)
        .ok_or(PackageError::MissingMetadata)?;
    let text = std::str::from_utf8(&entry.data)
        .map_err(|e| PackageError::InvalidMetadata(e.to_string()))?;
    toml::from_str(text).map_err(|e| PackageError::InvalidMetadata(e.to_string()))
}

/// Debug symbol files that stay out of release packages by default.
fn is_debug_symbol(rel: &Path) -> bool {
    let has_ext = |p: &Path, ext: &str| {
        p.extension()
            .is_some_and(|e| e.to_string_lossy().eq_ignore_ascii_case(ext))
    };
    if ["pdb", "dbg", "debug"].iter().any(|ext| has_ext(rel, ext)) {
        return true;
    }
    rel.ancestors().any(|a| has_ext(a, "dSYM"))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path).is_ok_and(|m| m.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(_path: &Path) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_tree(root: &Path) {
        std::fs::create_dir_all(root.join("bin")).unwrap();
        std::fs::create_dir_all(root.join("App.dSYM/Contents")).unwrap();
        std::fs::write(root.join("app.bin"), b"binary").unwrap();
        std::fs::write(root.join("bin/helper"), b"helper").unwrap();
        std::fs::write(root.join("app.pdb"), b"symbols").unwrap();
        std::fs::write(root.join("App.dSYM/Contents/Info.plist"), b"plist").unwrap();
    }

    #[test]
    fn lays_out_lib_platform_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        build_tree(dir.path());

        let builder = ReleasePackageBuilder::new("MyApp", Version::new(1, 0, 0))
            .unwrap()
            .title("My App")
            .release_notes("first")
            .platform("linux-x86_64");
        let archive = builder.build(dir.path()).unwrap();

        assert!(archive.contains("lib/linux-x86_64/app.bin"));
        assert!(archive.contains("lib/linux-x86_64/bin/helper"));
        assert!(!archive.contains("lib/linux-x86_64/app.pdb"));
        assert!(!archive.contains("lib/linux-x86_64/App.dSYM/Contents/Info.plist"));

        let meta = read_metadata(&archive).unwrap();
        assert_eq!(meta.id, "MyApp");
        assert_eq!(meta.title, "My App");
        assert_eq!(meta.release_notes.as_deref(), Some("first"));
        assert_eq!(builder.suggested_filename(), "MyApp-1.0.0-full.nupkg");
    }

    #[test]
    fn debug_symbols_can_be_included() {
        let dir = tempfile::tempdir().unwrap();
        build_tree(dir.path());
        let archive = ReleasePackageBuilder::new("MyApp", Version::new(1, 0, 0))
            .unwrap()
            .platform("p")
            .include_debug_symbols(true)
            .build(dir.path())
            .unwrap();
        assert!(archive.contains("lib/p/app.pdb"));
        assert!(archive.contains("lib/p/App.dSYM/Contents/Info.plist"));
    }

    #[test]
    fn repeated_builds_are_identical() {
        let dir = tempfile::tempdir().unwrap();
        build_tree(dir.path());
        let builder = ReleasePackageBuilder::new("MyApp", Version::new(1, 0, 0))
            .unwrap()
            .platform("p");
        let a = builder.build(dir.path()).unwrap().to_bytes().unwrap();
        let b = builder.build(dir.path()).unwrap().to_bytes().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_bad_ids_and_empty_dirs() {
        assert!(matches!(
            ReleasePackageBuilder::new("my app", Version::new(1, 0, 0)),
            Err(PackageError::InvalidId(_))
        ));
        let dir = tempfile::tempdir().unwrap();
        let err = ReleasePackageBuilder::new("MyApp", Version::new(1, 0, 0))
            .unwrap()
            .build(dir.path())
            .unwrap_err();
        assert!(matches!(err, PackageError::EmptyBuildDir(_)));
    }

    #[test]
    fn missing_metadata_is_reported() {
        let archive = PackageArchive::new();
        assert!(matches!(
            read_metadata(&archive),
            Err(PackageError::MissingMetadata)
        ));
    }
}
