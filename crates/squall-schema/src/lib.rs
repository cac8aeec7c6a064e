//! Shared types and wire formats for squall release feeds.
//!
//! Everything a publisher and a client must agree on lives here: artifact
//! naming, the `RELEASES` ledger, integrity hashes and package metadata.

pub mod hash;
pub mod manifest;
pub mod package;
pub mod release;

// Re-exports
pub use hash::{Blake3Hash, HashError, Sha1Hash};
pub use manifest::{ManifestError, RELEASES_FILENAME, ReleaseManifest};
pub use package::{METADATA_FILENAME, PackageIdError, PackageMetadata, validate_package_id};
pub use release::{
    DELTA_SUFFIX, FULL_SUFFIX, PACKAGE_EXTENSION, ReleaseEntry, ReleaseError, ReleaseName,
    delta_filename, full_filename,
};
