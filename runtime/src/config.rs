//! TOML runtime configuration with file-watch hot reload, grounded on the
//! `Arc<RwLock<Config>>` + `notify` pattern in
//! `examples/N10h0ggr-Gladix/user-agent/src/config/mod.rs`
//! (`ConfigManager::watch`), adapted from anti-malware scan tunables to the
//! worker/queue/netlink tunables spec.md §4.6/§4.7 leave to the runtime.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use log::{error, info, warn};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use shared::constants::DEFAULT_TCMU_SRV;
use shared::errors::ConfigError;

fn default_workers_per_device() -> usize {
    4
}

fn default_queue_depth() -> usize {
    64
}

fn default_block_size() -> u32 {
    512
}

fn default_srv_name() -> String {
    DEFAULT_TCMU_SRV.to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_workers_per_device")]
    pub workers_per_device: usize,

    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    #[serde(default = "default_block_size")]
    pub default_block_size: u32,

    #[serde(default = "default_srv_name")]
    pub srv_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers_per_device: default_workers_per_device(),
            queue_depth: default_queue_depth(),
            default_block_size: default_block_size(),
            srv_name: default_srv_name(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers_per_device == 0 {
            return Err(ConfigError::Validation("workers_per_device must be >= 1".into()));
        }
        if self.queue_depth == 0 {
            return Err(ConfigError::Validation("queue_depth must be >= 1".into()));
        }
        if self.default_block_size == 0 || self.default_block_size % 512 != 0 {
            return Err(ConfigError::Validation(
                "default_block_size must be a positive multiple of 512".into(),
            ));
        }
        Ok(())
    }

    fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }
}

/// Shared, hot-reloadable configuration handle. Cloning is cheap; every
/// clone observes the same underlying `RwLock`.
#[derive(Clone)]
pub struct ConfigManager {
    inner: Arc<RwLock<Config>>,
}

impl ConfigManager {
    /// Build a manager around compiled-in defaults, with no backing file
    /// and no watcher (used when no config file is present at startup).
    pub fn with_defaults() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Config::default())),
        }
    }

    /// Load `path` once, with no file watch (used for one-shot tools/tests).
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config = Config::load_from(path)?;
        Ok(Self {
            inner: Arc::new(RwLock::new(config)),
        })
    }

    /// Load `path` and spawn a background watcher that reloads on every
    /// write, keeping the last-good config on parse/validation failure.
    pub fn watch(path: &Path) -> Result<(Self, RecommendedWatcher), ConfigError> {
        let manager = Self::load(path)?;
        let reload_path: PathBuf = path.to_path_buf();
        let inner = Arc::clone(&manager.inner);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let event = match res {
                Ok(event) => event,
                Err(err) => {
                    error!("config watcher error: {err}");
                    return;
                }
            };
            if !event.kind.is_modify() {
                return;
            }
            match Config::load_from(&reload_path) {
                Ok(new_config) => {
                    *inner.write().unwrap() = new_config;
                    info!("reloaded configuration from {}", reload_path.display());
                }
                Err(err) => warn!("keeping previous config, reload failed: {err}"),
            }
        })
        .map_err(|err| ConfigError::Validation(format!("could not start config watcher: {err}")))?;
        watcher
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(|err| ConfigError::Validation(format!("could not watch {}: {err}", path.display())))?;
        Ok((manager, watcher))
    }

    pub fn current(&self) -> Config {
        self.inner.read().unwrap().clone()
    }
}

/// How long the event loop waits on `poll` between iterations when no fd
/// is ready (spec.md §4.8); not itself user-configurable, kept here next
/// to the rest of the runtime's timing knobs.
pub const POLL_TIMEOUT: Duration = Duration::from_millis(500);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_workers() {
        let mut config = Config::default();
        config.workers_per_device = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_non_512_multiple_block_size() {
        let mut config = Config::default();
        config.default_block_size = 500;
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_from_parses_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tcmu-runtime.toml");
        std::fs::write(&path, "workers_per_device = 2\nqueue_depth = 16\n").unwrap();
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.workers_per_device, 2);
        assert_eq!(config.queue_depth, 16);
        assert_eq!(config.default_block_size, 512);
    }
}
