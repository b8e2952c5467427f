//! Hold configuration management

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HoldConfig {
    #[serde(default)]
    pub general: GeneralSettings,
    #[serde(default)]
    pub capture: CaptureSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralSettings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "GeneralSettings::default_log_level")]
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}

impl GeneralSettings {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

/// How devices are captured and released
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureSettings {
    /// Discard a device whose capture failed instead of holding it degraded
    #[serde(default = "default_true")]
    pub strict: bool,
    /// Detach kernel drivers bound to the device's interfaces before claiming
    #[serde(default = "default_true")]
    pub detach_kernel_driver: bool,
    /// Set the sysfs `authorized` attribute when a device is deauthorized
    #[serde(default = "default_true")]
    pub authorize_sysfs: bool,
    /// Reset the device before releasing it
    #[serde(default = "default_true")]
    pub reset_on_release: bool,
    /// Acquire each requested device on its own thread
    #[serde(default)]
    pub parallel_acquire: bool,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            strict: true,
            detach_kernel_driver: true,
            authorize_sysfs: true,
            reset_on_release: true,
            parallel_acquire: false,
        }
    }
}

fn default_true() -> bool {
    true
}

impl HoldConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            // Try standard locations in order
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/usb-hold/config.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config = Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Parse and validate a TOML document
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: HoldConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!("Failed to load config: {:#}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        // Create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("usb-hold").join("config.toml")
        } else {
            PathBuf::from("/etc/usb-hold/config.toml")
        }
    }

    fn validate(&self) -> Result<()> {
        Self::validate_log_level(&self.general.log_level)
    }

    /// Check a log level against the levels tracing understands
    pub fn validate_log_level(level: &str) -> Result<()> {
        if VALID_LOG_LEVELS.contains(&level.to_lowercase().as_str()) {
            Ok(())
        } else {
            Err(anyhow!(
                "Invalid log level '{}', expected one of: {}",
                level,
                VALID_LOG_LEVELS.join(", ")
            ))
        }
    }
}
