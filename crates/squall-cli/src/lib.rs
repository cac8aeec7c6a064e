//! squall - delta releases and atomic updates for desktop applications
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_panics_doc)]
//!
//! # Workflow
//!
//! ```text
//! build output --releasify--> releases/  --upload-->   feed
//!                                         <--download-- feed
//! releases/ --apply--> install directory
//! ```
//!
//! A feed is any of `s3://bucket/prefix`, `github://owner/repo/tag`,
//! `https://host/path` (download only) or a local directory.

pub mod cmd;
pub mod ui;

use clap::{Parser, Subcommand};
use squall_core::diff::DiffBackend;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "squall")]
#[command(author, version, about = "squall - delta releases and atomic updates")]
pub struct Cli {
    /// Config file (default: ~/.squall/squall.toml)
    #[arg(long, global = true, env = "SQUALL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Package identity shared by `pack` and `releasify`.
#[derive(Debug, clap::Args)]
pub struct PackageArgs {
    /// Package id shared by every version
    #[arg(long)]
    pub id: String,
    /// Version being packaged (semver)
    #[arg(long = "version", value_name = "VERSION")]
    pub pkg_version: semver::Version,
    /// Directory holding the application files
    #[arg(long)]
    pub build_dir: PathBuf,
    /// Platform directory under lib/ (default: this machine)
    #[arg(long)]
    pub platform: Option<String>,
    /// Human-readable title
    #[arg(long)]
    pub title: Option<String>,
    /// Release notes
    #[arg(long)]
    pub notes: Option<String>,
    /// Keep .pdb/.dbg/.dSYM files in the package
    #[arg(long)]
    pub include_debug_symbols: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Build a full release package from a build directory
    Pack {
        #[command(flatten)]
        package: PackageArgs,
        /// Where to write the package
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
    /// Build a package and publish it into a release directory with its delta
    Releasify {
        #[command(flatten)]
        package: PackageArgs,
        /// Release directory holding RELEASES
        #[arg(long, default_value = "releases")]
        releases: PathBuf,
        /// Diff backend (overrides config)
        #[arg(long)]
        backend: Option<DiffBackend>,
    },
    /// Regenerate RELEASES from the packages in a directory
    #[command(name = "rebuild-releases")]
    RebuildReleases {
        /// Release directory
        #[arg(default_value = "releases")]
        releases: PathBuf,
    },
    /// Push a release directory to a feed
    Upload {
        /// Release directory holding RELEASES
        #[arg(long, default_value = "releases")]
        releases: PathBuf,
        /// Feed location
        #[arg(long)]
        to: String,
        /// Keep only this many full releases on the feed (overrides config)
        #[arg(long)]
        keep: Option<usize>,
    },
    /// Pull the latest release (and usable deltas) from a feed
    Download {
        /// Feed location
        #[arg(long)]
        from: String,
        /// Local release directory
        #[arg(long, default_value = "releases")]
        releases: PathBuf,
    },
    /// Apply a release to an install directory
    Apply {
        /// Local release directory
        #[arg(long, default_value = "releases")]
        releases: PathBuf,
        /// Install directory to update
        #[arg(long)]
        install: PathBuf,
        /// Target version (default: latest in RELEASES)
        #[arg(long = "to-version", value_name = "VERSION")]
        to_version: Option<semver::Version>,
        /// Executable to start after the update, relative to the install directory
        #[arg(long)]
        relaunch: Option<PathBuf>,
        /// Do not look for or stop running instances
        #[arg(long)]
        no_process_control: bool,
    },
}
