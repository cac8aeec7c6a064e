//! Delta update engine: binary diffs, delta and release packages, the
//! `RELEASES` ledger, feed synchronization and atomic installs.

pub mod apply;
pub mod archive;
pub mod config;
pub mod delta;
pub mod diff;
pub mod io;
pub mod package;
pub mod paths;
pub mod publish;
pub mod releases;
pub mod reporter;
pub mod sync;

pub use apply::{ApplyError, ApplyOutcome, ApplyState, UpdateApplier};
pub use archive::PackageArchive;
pub use config::Config;
pub use delta::{DeltaBuilder, DeltaPackage};
pub use diff::{DiffBackend, DiffOptions};
pub use package::ReleasePackageBuilder;
pub use publish::Publisher;
pub use reporter::{NullReporter, Reporter};
pub use sync::{RemoteStore, SyncSession};

/// User Agent string for feed requests
pub const USER_AGENT: &str = concat!("squall/", env!("CARGO_PKG_VERSION"));
