//! Configuration loading and management.

use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

use crate::types::{SettleTimeout, ValidationError};

/// Settle timeout used when none is configured.
pub const DEFAULT_SETTLE_TIMEOUT_MS: u64 = 1000;

/// Tracker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Diagnostic label for the resource.
    pub name: String,
    /// How long the count must stay at zero before reporting idle.
    pub settle_timeout_ms: u64,
    /// Log every counter change.
    pub debug: bool,
    /// URI patterns (whole-string regexes) excluded from counting.
    pub ignore_patterns: Vec<String>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            name: "network".to_string(),
            settle_timeout_ms: DEFAULT_SETTLE_TIMEOUT_MS,
            debug: false,
            ignore_patterns: Vec::new(),
        }
    }
}

impl TrackerConfig {
    /// Loads configuration from default locations.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(None)
    }

    /// Loads configuration, optionally from a specific file.
    ///
    /// Later sources override earlier ones: built-in defaults, the user
    /// config file, `config_path`, then `URI_IDLE_*` environment variables.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        Self::figment(dirs_config_path().as_deref(), config_path).extract()
    }

    /// Layers every source; `user_config_dir` holds the user `config.toml`.
    fn figment(user_config_dir: Option<&Path>, config_path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(config_dir) = user_config_dir {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        figment.merge(Env::prefixed("URI_IDLE_"))
    }

    /// Returns the validated settle timeout.
    pub const fn settle_timeout(&self) -> Result<SettleTimeout, ValidationError> {
        SettleTimeout::from_millis(self.settle_timeout_ms)
    }
}

/// Returns the platform-specific config directory.
///
/// On Linux: `~/.config/uri-idle`
fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("uri-idle"))
}
