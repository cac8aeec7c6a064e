//! Reporter trait for dependency injection
//!
//! Lets publish and sync report progress without being coupled to a
//! specific terminal UI.

pub trait Reporter: Send + Sync {
    /// Indicates a new section or phase has started (e.g. "Uploading").
    fn section(&self, title: &str);

    /// Updates the progress of an artifact transfer.
    fn transferring(&self, name: &str, current: u64, total: Option<u64>);

    /// An artifact needed no transfer.
    fn skipped(&self, name: &str, reason: &str);

    /// Marks an artifact operation as successfully completed.
    fn done(&self, name: &str, detail: &str, size: Option<u64>);

    /// Marks an artifact operation as failed with a specific reason.
    fn failed(&self, name: &str, reason: &str);

    /// Log an informational message.
    fn info(&self, msg: &str);

    /// Log a warning message.
    fn warning(&self, msg: &str);

    /// Display a final summary of multiple operations.
    fn summary(&self, count: usize, action: &str, elapsed_secs: f64);
}

impl<T: Reporter + ?Sized> Reporter for std::sync::Arc<T> {
    fn section(&self, title: &str) {
        (**self).section(title)
    }
    fn transferring(&self, name: &str, current: u64, total: Option<u64>) {
        (**self).transferring(name, current, total)
    }
    fn skipped(&self, name: &str, reason: &str) {
        (**self).skipped(name, reason)
    }
    fn done(&self, name: &str, detail: &str, size: Option<u64>) {
        (**self).done(name, detail, size)
    }
    fn failed(&self, name: &str, reason: &str) {
        (**self).failed(name, reason)
    }
    fn info(&self, msg: &str) {
        (**self).info(msg)
    }
    fn warning(&self, msg: &str) {
        (**self).warning(msg)
    }
    fn summary(&self, count: usize, action: &str, elapsed_secs: f64) {
        (**self).summary(count, action, elapsed_secs)
    }
}

/// A no-op reporter for silent operations (e.g., testing).
#[derive(Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn section(&self, _: &str) {}
    fn transferring(&self, _: &str, _: u64, _: Option<u64>) {}
    fn skipped(&self, _: &str, _: &str) {}
    fn done(&self, _: &str, _: &str, _: Option<u64>) {}
    fn failed(&self, _: &str, _: &str) {}
    fn info(&self, _: &str) {}
    fn warning(&self, _: &str) {}
    fn summary(&self, _: usize, _: &str, _: f64) {}
}
