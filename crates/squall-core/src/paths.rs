use dirs::home_dir;
use std::path::{Path, PathBuf};

/// Returns the squall home directory, or None if the user's home cannot be resolved.
pub fn try_squall_home() -> Option<PathBuf> {
    if let Ok(val) = std::env::var("SQUALL_HOME") {
        return Some(PathBuf::from(val));
    }
    home_dir().map(|h| h.join(".squall"))
}

/// Default config file: ~/.squall/squall.toml
pub fn config_path() -> Option<PathBuf> {
    try_squall_home().map(|h| h.join("squall.toml"))
}

/// Lock file guarding an install directory: `<parent>/.<name>.lock`
pub fn lock_path(install_dir: &Path) -> PathBuf {
    sibling(install_dir, ".", ".lock")
}

/// Where the previous install is parked during a swap: `<parent>/.<name>.old`
pub fn aside_path(install_dir: &Path) -> PathBuf {
    sibling(install_dir, ".", ".old")
}

/// Prefix for staging directories created next to the install directory.
pub fn staging_prefix(install_dir: &Path) -> String {
    format!(".{}.staging-", dir_name(install_dir))
}

/// Extract the filename from a URL.
pub fn filename_from_url(url: &str) -> &str {
    url.split(['?', '#'])
        .next()
        .unwrap_or(url)
        .split('/')
        .next_back()
        .unwrap_or("")
}

fn dir_name(dir: &Path) -> String {
    dir.file_name()
        .map_or_else(|| "install".to_string(), |n| n.to_string_lossy().into_owned())
}

fn sibling(dir: &Path, prefix: &str, suffix: &str) -> PathBuf {
    let parent = dir.parent().unwrap_or_else(|| Path::new("."));
    parent.join(format!("{prefix}{}{suffix}", dir_name(dir)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn siblings_live_next_to_install_dir() {
        let install = Path::new("/opt/apps/MyApp");
        assert_eq!(lock_path(install), PathBuf::from("/opt/apps/.MyApp.lock"));
        assert_eq!(aside_path(install), PathBuf::from("/opt/apps/.MyApp.old"));
        assert_eq!(staging_prefix(install), ".MyApp.staging-");
    }

    #[test]
    fn filename_from_url_ignores_query() {
        assert_eq!(
            filename_from_url("https://cdn.example.com/app/App-1.0.0-full.nupkg?sig=abc"),
            "App-1.0.0-full.nupkg"
        );
        assert_eq!(filename_from_url("RELEASES"), "RELEASES");
    }
}
