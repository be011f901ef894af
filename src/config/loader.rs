//! Configuration loading with hierarchy merging.
//!
//! Configuration is loaded from multiple sources and merged in order:
//!
//! 1. Embedded defaults (compiled into binary)
//! 2. System config: `/etc/webhook-sentry/config.toml`
//! 3. User config: `~/.config/webhook-sentry/config.toml`
//! 4. Additional config file (via `--config` flag)
//!
//! Missing config files are skipped; the proxy runs fine on embedded
//! defaults. Invalid TOML is an error (fail fast with a clear message).

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::error::ConfigError;
use super::schema::{Config, ListenerConfig};

/// System-wide configuration path.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/webhook-sentry/config.toml";

/// User configuration directory name.
pub const USER_CONFIG_DIR: &str = "webhook-sentry";

/// User configuration filename.
pub const USER_CONFIG_FILE: &str = "config.toml";

/// Configuration loader with support for hierarchy merging.
pub struct ConfigLoader {
    /// Path to system-wide configuration.
    system_path: PathBuf,
    /// Path to user configuration.
    user_path: PathBuf,
}

impl ConfigLoader {
    /// Create a new ConfigLoader with default paths.
    #[must_use]
    pub fn new() -> Self {
        let user_config_dir = dirs::config_dir()
            .map(|p| p.join(USER_CONFIG_DIR))
            .unwrap_or_else(|| PathBuf::from(".config").join(USER_CONFIG_DIR));

        Self {
            system_path: PathBuf::from(SYSTEM_CONFIG_PATH),
            user_path: user_config_dir.join(USER_CONFIG_FILE),
        }
    }

    /// Create a ConfigLoader with custom paths (for testing).
    #[must_use]
    pub fn with_paths(system_path: PathBuf, user_path: PathBuf) -> Self {
        Self {
            system_path,
            user_path,
        }
    }

    /// Load and merge configuration from all sources.
    ///
    /// `extra` is the `--config` flag path; unlike the hierarchy paths it
    /// must exist when given.
    pub fn load(&self, extra: Option<&Path>) -> Result<Config, ConfigError> {
        let mut config = Config::default();
        debug!("loaded embedded default configuration");

        if let Some(system_config) = self.load_file(&self.system_path)? {
            config.merge(system_config);
            debug!("loaded system config from {:?}", self.system_path);
        } else {
            debug!("no system config found at {:?}", self.system_path);
        }

        if let Some(user_config) = self.load_file(&self.user_path)? {
            config.merge(user_config);
            debug!("loaded user config from {:?}", self.user_path);
        } else {
            debug!("no user config found at {:?}", self.user_path);
        }

        if let Some(path) = extra {
            match self.load_file(path)? {
                Some(extra_config) => {
                    config.merge(extra_config);
                    debug!("loaded config from {:?}", path);
                }
                None => {
                    return Err(ConfigError::ReadError {
                        path: path.to_path_buf(),
                        source: std::io::Error::new(
                            std::io::ErrorKind::NotFound,
                            "file not found",
                        ),
                    });
                }
            }
        }

        // Listener lists append across sources; only when no source named
        // one does the embedded default listener apply.
        if config.listeners.is_empty() {
            config.listeners.push(ListenerConfig::default());
            debug!("no listeners configured, using the default listener");
        }

        config.validate()?;
        Ok(config)
    }

    /// Load a single config file, returning None if it does not exist.
    fn load_file(&self, path: &Path) -> Result<Option<Config>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }

        let contents = fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;

        let config = toml::from_str(&contents).map_err(|source| ConfigError::ParseError {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(Some(config))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
