//! `rebuild-releases`

use std::path::Path;

use anyhow::{Context, Result};
use squall_core::{Reporter, releases};

pub fn rebuild(dir: &Path, reporter: &dyn Reporter) -> Result<()> {
    let manifest = releases::rebuild(dir)
        .with_context(|| format!("Failed to rebuild RELEASES in {}", dir.display()))?;
    for entry in manifest.iter() {
        reporter.done(&entry.filename, &entry.version.to_string(), Some(entry.filesize));
    }
    reporter.summary(manifest.len(), "entries written", 0.0);
    Ok(())
}
