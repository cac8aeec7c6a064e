//! Terminal output for commands.

pub mod output;
pub mod progress;

pub use output::ConsoleReporter;
