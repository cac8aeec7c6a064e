//! Subcommand implementations.

pub mod apply;
pub mod package;
pub mod releases;
pub mod sync;
