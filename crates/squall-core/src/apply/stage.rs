use std::path::Path;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{ApplyError, INSTALLED_METADATA};
use crate::archive::EntryPath;
use crate::archive::PackageArchive;
use crate::package::read_metadata;

/// Materialize the package's `lib/<platform>/` tree into a fresh directory
/// next to `install_dir`. Blocking.
///
/// The directory is removed again when the returned guard drops, so a
/// cancelled or failed apply leaves nothing behind.
pub fn stage(
    install_dir: &Path,
    archive: &PackageArchive,
    cancel: &CancellationToken,
) -> Result<TempDir, ApplyError> {
    let meta = read_metadata(archive)?;
    let parent = install_dir
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(|source| ApplyError::Io {
        path: parent.to_path_buf(),
        source,
    })?;

    let staging = tempfile::Builder::new()
        .prefix(&crate::paths::staging_prefix(install_dir))
        .tempdir_in(parent)
        .map_err(|source| ApplyError::Io {
            path: parent.to_path_buf(),
            source,
        })?;

    let prefix = meta.lib_prefix();
    let mut files = 0usize;
    for (path, entry) in archive.entries() {
        if !path.starts_with_dir(&prefix) {
            continue;
        }
        if cancel.is_cancelled() {
            return Err(ApplyError::Cancelled);
        }
        let Some(rel) = path.as_str().get(prefix.len()..) else {
            continue;
        };
        let dest = staging.path().join(EntryPath::new(rel)?.to_path());
        write_file(&dest, &entry.data, entry.executable)?;
        files += 1;
    }

    let installed = toml::to_string(&meta)
        .map_err(|e| crate::package::PackageError::InvalidMetadata(e.to_string()))?;
    write_file(
        &staging.path().join(INSTALLED_METADATA),
        installed.as_bytes(),
        false,
    )?;

    debug!(staging = %staging.path().display(), files, "staged package");
    Ok(staging)
}

fn write_file(dest: &Path, data: &[u8], executable: bool) -> Result<(), ApplyError> {
    let io = |source: std::io::Error| ApplyError::Io {
        path: dest.to_path_buf(),
        source,
    };
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(io)?;
    }
    std::fs::write(dest, data).map_err(io)?;
    if executable {
        mark_executable(dest).map_err(io)?;
    }
    Ok(())
}

#[cfg(unix)]
fn mark_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn mark_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
