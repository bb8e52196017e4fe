//! Configuration loading
//!
//! Bootstrap configuration is a small TOML file:
//!
//! ```toml
//! [refetch]
//! cooldown_minutes = 60
//! forecast_half_life_days = 30.0
//!
//! [logging]
//! level = "info"
//! ```
//!
//! Every field has a built-in default, so a partial file (or none at all) is
//! valid. Resolution priority:
//! 1. Explicit path (command-line argument) - must exist
//! 2. `DGN_CONFIG` environment variable
//! 3. Platform config file (`<config_dir>/dgn/config.toml`)
//! 4. Compiled defaults (fallback)
//!
//! A missing file at levels 2-3 is a warning, never fatal.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::{Error, Result};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "DGN_CONFIG";

/// Minutes after a fetch during which maturity-driven refetches are suppressed
pub const DEFAULT_COOLDOWN_MINUTES: i64 = 60;

/// Half-life of the forecast recency weighting
pub const DEFAULT_FORECAST_HALF_LIFE_DAYS: f64 = 30.0;

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// Refetch policy and merge tuning
    pub refetch: RefetchSettings,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Refetch policy and merge tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefetchSettings {
    /// Cooldown window shared by window and cohort evaluation
    ///
    /// Default: 60 minutes. Zero disables the cooldown.
    pub cooldown_minutes: i64,

    /// Half-life (days) of the exponential recency weights used by the forecast
    ///
    /// Default: 30 days. Must be positive.
    pub forecast_half_life_days: f64,
}

impl Default for RefetchSettings {
    fn default() -> Self {
        Self {
            cooldown_minutes: DEFAULT_COOLDOWN_MINUTES,
            forecast_half_life_days: DEFAULT_FORECAST_HALF_LIFE_DAYS,
        }
    }
}

impl RefetchSettings {
    /// Reject values the policy engine cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.cooldown_minutes < 0 {
            return Err(Error::Config(format!(
                "refetch.cooldown_minutes must be >= 0, got {}",
                self.cooldown_minutes
            )));
        }
        if !self.forecast_half_life_days.is_finite() || self.forecast_half_life_days <= 0.0 {
            return Err(Error::Config(format!(
                "refetch.forecast_half_life_days must be > 0, got {}",
                self.forecast_half_life_days
            )));
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl TomlConfig {
    /// Parse and validate TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: TomlConfig = toml::from_str(text)?;
        config.refetch.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }
}

/// Load configuration following the resolution priority
pub fn load_config(cli_arg: Option<&Path>) -> Result<TomlConfig> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        if !path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        info!("Loading config from {}", path.display());
        return TomlConfig::load_from_path(path);
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        let path = PathBuf::from(path);
        if path.exists() {
            info!("Loading config from {} ({})", path.display(), CONFIG_ENV_VAR);
            return TomlConfig::load_from_path(&path);
        }
        warn!(
            "{} points at missing file {}, using defaults",
            CONFIG_ENV_VAR,
            path.display()
        );
        return Ok(TomlConfig::default());
    }

    // Priority 3: Platform config file
    if let Some(path) = default_config_path() {
        if path.exists() {
            info!("Loading config from {}", path.display());
            return TomlConfig::load_from_path(&path);
        }
        debug!("No config file at {}", path.display());
    }

    // Priority 4: Compiled defaults
    Ok(TomlConfig::default())
}

/// Platform config file location (`~/.config/dgn/config.toml` on Linux)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("dgn").join("config.toml"))
}
