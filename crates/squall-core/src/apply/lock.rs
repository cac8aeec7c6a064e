use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::ApplyError;

/// Exclusive claim on an install directory, held for a whole apply.
///
/// The lock is a `.<name>.lock` file next to the install directory, created
/// with `create_new` and removed on drop. A crashed process leaves the file
/// behind; it has to be removed by hand.
#[derive(Debug)]
pub struct InstallLock {
    path: PathBuf,
    _file: File,
}

impl InstallLock {
    pub fn acquire(install_dir: &Path) -> Result<Self, ApplyError> {
        let path = crate::paths::lock_path(install_dir);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ApplyError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(ApplyError::Locked(path));
            }
            Err(source) => return Err(ApplyError::Io { path, source }),
        };
        // The pid is diagnostic only
        if let Err(e) = writeln!(file, "{}", std::process::id()) {
            debug!(path = %path.display(), error = %e, "failed to record pid in lock file");
        }
        debug!(path = %path.display(), "acquired install lock");
        Ok(Self { path, _file: file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstallLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to remove install lock");
        }
    }
}
