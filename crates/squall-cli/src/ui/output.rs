//! Line-oriented console reporter.

use squall_core::Reporter;

use super::progress::{format_progress_status, format_size};

/// Prints progress lines to stdout and warnings to stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleReporter {
    quiet: bool,
}

impl ConsoleReporter {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }
}

impl Reporter for ConsoleReporter {
    fn section(&self, title: &str) {
        if !self.quiet {
            println!("\n{title}");
        }
    }

    fn transferring(&self, name: &str, current: u64, total: Option<u64>) {
        if !self.quiet {
            println!("  {} {name}", format_progress_status(current, total));
        }
    }

    fn skipped(&self, name: &str, reason: &str) {
        if !self.quiet {
            println!("  {:<14} {name} ({reason})", "skipped");
        }
    }

    fn done(&self, name: &str, detail: &str, size: Option<u64>) {
        if self.quiet {
            return;
        }
        match size {
            Some(size) => println!("  {detail:<14} {name} ({})", format_size(size)),
            None => println!("  {detail:<14} {name}"),
        }
    }

    fn failed(&self, name: &str, reason: &str) {
        eprintln!("  {:<14} {name}: {reason}", "failed");
    }

    fn info(&self, msg: &str) {
        if !self.quiet {
            println!("{msg}");
        }
    }

    fn warning(&self, msg: &str) {
        eprintln!("warning: {msg}");
    }

    fn summary(&self, count: usize, action: &str, elapsed_secs: f64) {
        if !self.quiet {
            println!("\n{count} {action} in {elapsed_secs:.1}s");
        }
    }
}
