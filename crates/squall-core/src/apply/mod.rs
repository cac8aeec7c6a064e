//! Atomic application of an update to an install directory.
//!
//! An apply moves through
//!
//! ```text
//! Idle -> Staging -> Swapping -> Done
//!            \           \
//!             `-----------`--> Failed
//! ```
//!
//! Staging rebuilds the target package from local artifacts and writes its
//! files into a sibling directory; nothing in the install directory is
//! touched. Swapping stops running instances and replaces the install
//! directory with two renames. Cancellation is honoured while staging and
//! refused once swapping starts. Every apply runs under its own child of the
//! applier's token, so a cancelled apply leaves later ones unaffected.

mod lock;
mod plan;
mod process;
mod stage;
mod swap;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use semver::Version;
use squall_schema::PackageMetadata;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use lock::InstallLock;
pub use plan::{UpdatePlan, plan_update, reconstruct};
pub use process::{NoProcesses, ProcessControl, ProcessHandle, SystemProcesses};
pub use stage::stage;
pub use swap::DirectorySwap;

use crate::archive::ArchiveError;
use crate::delta::DeltaError;
use crate::package::PackageError;
use crate::releases::{self, ReleasesError};

/// Installed-version record written inside every install directory.
pub const INSTALLED_METADATA: &str = ".squall-version";

const DEFAULT_EXIT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum ApplyError {
    #[error("Install directory is locked by another update ({0})")]
    Locked(PathBuf),

    #[error("No releases in {0}")]
    NoReleases(PathBuf),

    #[error("No local full release to update to {target} from")]
    NoBaseRelease { target: Version },

    #[error("Delta for {version} is not available locally")]
    MissingDelta { version: Version },

    #[error("Reconstruction of {name} failed: {reason}")]
    ReconstructionMismatch { name: String, reason: String },

    #[error("Update cancelled")]
    Cancelled,

    #[error("Swap failed at {path}: {source}")]
    SwapFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid installed version record {path}: {reason}")]
    InvalidInstall { path: PathBuf, reason: String },

    #[error(transparent)]
    Releases(#[from] ReleasesError),

    #[error(transparent)]
    Delta(DeltaError),

    #[error(transparent)]
    Package(#[from] PackageError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Apply task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl From<DeltaError> for ApplyError {
    fn from(err: DeltaError) -> Self {
        match err {
            DeltaError::ReconstructionMismatch {
                path,
                expected,
                actual,
            } => Self::ReconstructionMismatch {
                name: path,
                reason: format!("expected {expected}, got {actual}"),
            },
            other => Self::Delta(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyState {
    Idle,
    Staging,
    Swapping,
    Done,
    Failed,
}

impl std::fmt::Display for ApplyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Staging => "staging",
            Self::Swapping => "swapping",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    UpToDate(Version),
    Updated {
        from: Option<Version>,
        to: Version,
    },
}

/// Read the installed-version record, if the directory has one.
pub fn installed_metadata(install_dir: &Path) -> Result<Option<PackageMetadata>, ApplyError> {
    let path = install_dir.join(INSTALLED_METADATA);
    let text = match std::fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(ApplyError::Io { path, source }),
    };
    toml::from_str(&text)
        .map(Some)
        .map_err(|e| ApplyError::InvalidInstall {
            path,
            reason: e.to_string(),
        })
}

/// Applies updates from a local release directory to an install directory.
pub struct UpdateApplier {
    install_dir: PathBuf,
    release_dir: PathBuf,
    processes: Arc<dyn ProcessControl>,
    exit_timeout: Duration,
    relaunch: Option<(PathBuf, Vec<String>)>,
    cancel: CancellationToken,
    current: Mutex<CancellationToken>,
    state: watch::Sender<ApplyState>,
}

impl UpdateApplier {
    pub fn new(install_dir: impl Into<PathBuf>, release_dir: impl Into<PathBuf>) -> Self {
        let (state, _) = watch::channel(ApplyState::Idle);
        Self {
            install_dir: install_dir.into(),
            release_dir: release_dir.into(),
            processes: Arc::new(SystemProcesses::default()),
            exit_timeout: DEFAULT_EXIT_TIMEOUT,
            relaunch: None,
            cancel: CancellationToken::new(),
            current: Mutex::new(CancellationToken::new()),
            state,
        }
    }

    pub fn with_process_control(mut self, processes: Arc<dyn ProcessControl>) -> Self {
        self.processes = processes;
        self
    }

    pub fn with_exit_timeout(mut self, timeout: Duration) -> Self {
        self.exit_timeout = timeout;
        self
    }

    /// Start `exe` (relative to the install directory) after a successful swap.
    pub fn with_relaunch(mut self, exe: impl Into<PathBuf>, args: Vec<String>) -> Self {
        self.relaunch = Some((exe.into(), args));
        self
    }

    /// Parent token for every apply. Cancelling it stops the current apply
    /// and every later one.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn install_dir(&self) -> &Path {
        &self.install_dir
    }

    pub fn subscribe(&self) -> watch::Receiver<ApplyState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> ApplyState {
        *self.state.borrow()
    }

    /// Cancel the apply in progress.
    ///
    /// Only a staging apply can be cancelled; otherwise this returns `false`
    /// and has no effect on later applies.
    pub fn cancel(&self) -> bool {
        let mut seen = ApplyState::Idle;
        // Decided under the state lock so it cannot race the move to Swapping
        self.state.send_if_modified(|state| {
            seen = *state;
            if *state == ApplyState::Staging {
                self.current
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .cancel();
            }
            false
        });
        match seen {
            ApplyState::Staging => true,
            ApplyState::Swapping => {
                warn!("cancellation ignored: swap in progress");
                false
            }
            state => {
                debug!(%state, "cancellation ignored: no update in progress");
                false
            }
        }
    }

    /// Move to `Swapping` unless cancellation was requested first.
    fn begin_swap(&self, token: &CancellationToken) -> Result<(), ApplyError> {
        let mut cancelled = false;
        self.state.send_if_modified(|state| {
            if token.is_cancelled() {
                cancelled = true;
                false
            } else {
                *state = ApplyState::Swapping;
                true
            }
        });
        if cancelled {
            Err(ApplyError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub fn installed(&self) -> Result<Option<PackageMetadata>, ApplyError> {
        installed_metadata(&self.install_dir)
    }

    /// Update to the newest version in the local `RELEASES`.
    pub async fn apply_latest(&self) -> Result<ApplyOutcome, ApplyError> {
        let manifest = releases::load(&self.release_dir)?;
        let latest = manifest
            .latest_version()
            .cloned()
            .ok_or_else(|| ApplyError::NoReleases(self.release_dir.clone()))?;
        if let Some(installed) = self.installed()? {
            if installed.version >= latest {
                info!(version = %installed.version, "already up to date");
                return Ok(ApplyOutcome::UpToDate(installed.version));
            }
        }
        self.apply(&latest).await
    }

    /// Update the install directory to exactly `target`.
    pub async fn apply(&self, target: &Version) -> Result<ApplyOutcome, ApplyError> {
        let token = self.cancel.child_token();
        self.state.send_modify(|state| {
            *self
                .current
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = token.clone();
            *state = ApplyState::Staging;
        });
        let result = self.run(target, &token).await;
        match &result {
            Ok(_) => {
                self.state.send_replace(ApplyState::Done);
            }
            Err(e) => {
                warn!(error = %e, "update failed");
                self.state.send_replace(ApplyState::Failed);
            }
        }
        result
    }

    async fn run(
        &self,
        target: &Version,
        token: &CancellationToken,
    ) -> Result<ApplyOutcome, ApplyError> {
        let _lock = InstallLock::acquire(&self.install_dir)?;
        DirectorySwap::recover(&self.install_dir)?;

        let manifest = releases::load(&self.release_dir)?;
        let from = self.installed()?.map(|m| m.version);
        let plan = plan_update(&manifest, &self.release_dir, from.as_ref(), target)?;
        info!(
            target = %target,
            base = %plan.base.filename,
            deltas = plan.deltas.len(),
            "staging update"
        );
        if token.is_cancelled() {
            return Err(ApplyError::Cancelled);
        }

        let release_dir = self.release_dir.clone();
        let install_dir = self.install_dir.clone();
        let cancel = token.clone();
        let staging = tokio::task::spawn_blocking(move || {
            let archive = reconstruct(&release_dir, &plan, &cancel)?;
            if cancel.is_cancelled() {
                return Err(ApplyError::Cancelled);
            }
            stage(&install_dir, &archive, &cancel)
        })
        .await??;

        self.begin_swap(token)?;
        let staging = staging.keep();

        for handle in self.processes.find_running_instances(&self.install_dir).await {
            if !self.processes.request_exit(&handle, self.exit_timeout).await {
                warn!(pid = handle.pid, "process did not exit in time, swapping anyway");
            }
        }

        let swap = DirectorySwap::new(&self.install_dir, &staging);
        tokio::task::spawn_blocking(move || swap.run())
            .await?
            .inspect_err(|_| {
                if let Err(e) = std::fs::remove_dir_all(&staging) {
                    warn!(path = %staging.display(), error = %e, "failed to remove staging directory");
                }
            })?;
        info!(install = %self.install_dir.display(), version = %target, "update applied");

        if let Some((exe, args)) = &self.relaunch {
            let exe = self.install_dir.join(exe);
            if let Err(e) = self.processes.relaunch(&exe, args).await {
                warn!(exe = %exe.display(), error = %e, "failed to relaunch application");
            }
        }

        Ok(ApplyOutcome::Updated {
            from,
            to: target.clone(),
        })
    }
}
