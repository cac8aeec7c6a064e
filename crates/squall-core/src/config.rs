//! `squall.toml` configuration.
//!
//! ```toml
//! [delta]
//! backend = "modern"
//! max_delta_ratio = 1.0
//! legacy_size_ceiling = 134217728
//! zstd_level = 9
//!
//! [sync]
//! retry_attempts = 3
//! retry_backoff_ms = 1000
//! keep_max_releases = 5
//!
//! [apply]
//! exit_timeout_secs = 10
//! ```
//!
//! Every key is optional. `SQUALL_DIFF_BACKEND` overrides `delta.backend`.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::delta::{DeltaBuilder, DeltaPolicy};
use crate::diff::{DEFAULT_LEGACY_CEILING, DEFAULT_ZSTD_LEVEL, DiffBackend, DiffOptions};
use crate::sync::{Backoff, RetryPolicy};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub delta: DeltaConfig,
    pub sync: SyncConfig,
    pub apply: ApplyConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeltaConfig {
    pub backend: DiffBackend,
    /// Deltas larger than this fraction of the new file are stored whole.
    pub max_delta_ratio: f64,
    pub legacy_size_ceiling: u64,
    pub zstd_level: i32,
}

impl Default for DeltaConfig {
    fn default() -> Self {
        Self {
            backend: DiffBackend::default(),
            max_delta_ratio: DeltaPolicy::default().max_delta_ratio,
            legacy_size_ceiling: DEFAULT_LEGACY_CEILING,
            zstd_level: DEFAULT_ZSTD_LEVEL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub retry_attempts: u32,
    pub retry_backoff_ms: u64,
    /// Full releases kept on the remote; older ones are retired on upload.
    pub keep_max_releases: Option<usize>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 3,
            retry_backoff_ms: 1000,
            keep_max_releases: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplyConfig {
    /// How long running instances get to exit before the swap.
    pub exit_timeout_secs: u64,
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            exit_timeout_secs: 10,
        }
    }
}

impl Config {
    /// Load and parse a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        config.apply_env()?;
        Ok(config)
    }

    /// Load `~/.squall/squall.toml` (or `$SQUALL_HOME/squall.toml`), falling
    /// back to defaults when it does not exist.
    pub fn load_default() -> Result<Self> {
        match crate::paths::config_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => {
                let mut config = Self::default();
                config.apply_env()?;
                Ok(config)
            }
        }
    }

    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(backend) = std::env::var("SQUALL_DIFF_BACKEND") {
            if !backend.is_empty() {
                self.delta.backend = backend
                    .parse()
                    .map_err(anyhow::Error::msg)
                    .context("Invalid SQUALL_DIFF_BACKEND")?;
            }
        }
        Ok(())
    }

    pub fn diff_options(&self) -> DiffOptions {
        DiffOptions {
            legacy_size_ceiling: self.delta.legacy_size_ceiling,
            zstd_level: self.delta.zstd_level,
        }
    }

    pub fn delta_policy(&self) -> DeltaPolicy {
        DeltaPolicy {
            max_delta_ratio: self.delta.max_delta_ratio,
        }
    }

    /// Delta builder for the configured backend, probed on this machine.
    pub fn delta_builder(&self) -> DeltaBuilder {
        let options = self.diff_options();
        DeltaBuilder::new(DiffBackend::probe(self.delta.backend, &options))
            .with_options(options)
            .with_policy(self.delta_policy())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let backoff = if self.sync.retry_backoff_ms == 0 {
            Backoff::None
        } else {
            Backoff::Fixed(Duration::from_millis(self.sync.retry_backoff_ms))
        };
        RetryPolicy {
            max_attempts: self.sync.retry_attempts.max(1),
            backoff,
        }
    }

    pub fn exit_timeout(&self) -> Duration {
        Duration::from_secs(self.apply.exit_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert_eq!(config.diff_options(), DiffOptions::default());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("squall.toml");
        std::fs::write(
            &path,
            "[delta]\nbackend = \"legacy\"\n\n[sync]\nretry_backoff_ms = 0\nkeep_max_releases = 2\n",
        )
        .unwrap();

        let config: Config = toml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(config.delta.backend, DiffBackend::Legacy);
        assert_eq!(config.delta.zstd_level, DEFAULT_ZSTD_LEVEL);
        assert_eq!(config.sync.retry_attempts, 3);
        assert_eq!(config.sync.keep_max_releases, Some(2));
        assert_eq!(config.retry_policy().backoff, Backoff::None);
        assert_eq!(config.exit_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn unknown_backend_is_rejected() {
        assert!(toml::from_str::<Config>("[delta]\nbackend = \"xdelta\"\n").is_err());
    }
}
