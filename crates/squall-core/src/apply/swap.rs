use std::path::{Path, PathBuf};

use tracing::{error, info, warn};

use super::ApplyError;

/// Replace an install directory with a staged one using two renames on the
/// same volume.
///
/// 1. install -> aside
/// 2. staging -> install (the commit point)
/// 3. aside is deleted
///
/// If step 2 fails the aside tree is renamed back. Once step 2 succeeds the
/// new version stays, even if cleanup fails.
#[derive(Debug, Clone)]
pub struct DirectorySwap {
    install: PathBuf,
    staging: PathBuf,
    aside: PathBuf,
}

impl DirectorySwap {
    pub fn new(install: impl Into<PathBuf>, staging: impl Into<PathBuf>) -> Self {
        let install = install.into();
        let aside = crate::paths::aside_path(&install);
        Self {
            install,
            staging: staging.into(),
            aside,
        }
    }

    pub fn install(&self) -> &Path {
        &self.install
    }

    pub fn aside(&self) -> &Path {
        &self.aside
    }

    /// Undo an interrupted swap that stopped between the two renames.
    /// Returns whether anything was restored.
    pub fn recover(install: &Path) -> Result<bool, ApplyError> {
        let aside = crate::paths::aside_path(install);
        if install.exists() || !aside.exists() {
            return Ok(false);
        }
        std::fs::rename(&aside, install).map_err(|source| ApplyError::SwapFailed {
            path: aside.clone(),
            source,
        })?;
        warn!(install = %install.display(), "restored install left aside by an interrupted update");
        Ok(true)
    }

    /// Step 1. Returns `false` when there was no install to move.
    pub fn move_aside(&self) -> std::io::Result<bool> {
        if self.aside.exists() {
            // Leftover from an update that committed but never cleaned up
            std::fs::remove_dir_all(&self.aside)?;
        }
        if !self.install.exists() {
            return Ok(false);
        }
        std::fs::rename(&self.install, &self.aside)?;
        Ok(true)
    }

    /// Step 2.
    pub fn commit(&self) -> std::io::Result<()> {
        std::fs::rename(&self.staging, &self.install)
    }

    /// Step 3. Best effort.
    pub fn cleanup(&self) {
        if !self.aside.exists() {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.aside) {
            warn!(path = %self.aside.display(), error = %e, "failed to remove previous install");
        }
    }

    pub fn run(&self) -> Result<(), ApplyError> {
        let moved = self
            .move_aside()
            .map_err(|source| ApplyError::SwapFailed {
                path: self.install.clone(),
                source,
            })?;

        if let Err(source) = self.commit() {
            if moved {
                if let Err(restore) = std::fs::rename(&self.aside, &self.install) {
                    error!(
                        aside = %self.aside.display(),
                        error = %restore,
                        "failed to restore previous install"
                    );
                }
            }
            return Err(ApplyError::SwapFailed {
                path: self.staging.clone(),
                source,
            });
        }

        self.cleanup();
        info!(install = %self.install.display(), "swapped in new version");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(root: &Path, marker: &str) {
        std::fs::create_dir_all(root).unwrap();
        std::fs::write(root.join("version.txt"), marker).unwrap();
    }

    fn marker(root: &Path) -> String {
        std::fs::read_to_string(root.join("version.txt")).unwrap()
    }

    #[test]
    fn swap_replaces_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let install = dir.path().join("App");
        let staging = dir.path().join("staging");
        tree(&install, "old");
        tree(&staging, "new");

        let swap = DirectorySwap::new(&install, &staging);
        swap.run().unwrap();
        assert_eq!(marker(&install), "new");
        assert!(!swap.aside().exists());
        assert!(!staging.exists());
    }

    #[test]
    fn failed_commit_restores_old_tree() {
        let dir = tempfile::tempdir().unwrap();
        let install = dir.path().join("App");
        tree(&install, "old");

        let swap = DirectorySwap::new(&install, dir.path().join("missing"));
        assert!(matches!(swap.run(), Err(ApplyError::SwapFailed { .. })));
        assert_eq!(marker(&install), "old");
        assert!(!swap.aside().exists());
    }

    #[test]
    fn first_install_has_nothing_to_move() {
        let dir = tempfile::tempdir().unwrap();
        let install = dir.path().join("App");
        let staging = dir.path().join("staging");
        tree(&staging, "new");

        DirectorySwap::new(&install, &staging).run().unwrap();
        assert_eq!(marker(&install), "new");
    }

    #[test]
    fn recover_restores_tree_moved_aside() {
        let dir = tempfile::tempdir().unwrap();
        let install = dir.path().join("App");
        let staging = dir.path().join("staging");
        tree(&install, "old");
        tree(&staging, "new");

        let swap = DirectorySwap::new(&install, &staging);
        assert!(swap.move_aside().unwrap());
        assert!(!install.exists());

        assert!(DirectorySwap::recover(&install).unwrap());
        assert_eq!(marker(&install), "old");
        assert!(!DirectorySwap::recover(&install).unwrap());
    }
}
