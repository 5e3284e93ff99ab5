//! Latchkey configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::biometric::BiometricPrompt;
use crate::error::Result;
use crate::lockout::LockoutPolicy;

/// Configuration for the lockout tracker and biometric gate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LatchkeyConfig {
    /// Durable key-value store for lockout state and biometric settings
    pub store_path: PathBuf,

    /// Device key used to seal the biometric credential bundle
    pub device_key_path: PathBuf,

    /// Failed-attempt thresholds
    pub lockout: LockoutPolicy,

    /// Text for the biometric challenge
    pub prompt: BiometricPrompt,
}

impl Default for LatchkeyConfig {
    fn default() -> Self {
        let base = Self::default_base_path();
        Self {
            store_path: base.join("state.json"),
            device_key_path: base.join("device.key"),
            lockout: LockoutPolicy::default(),
            prompt: BiometricPrompt::default(),
        }
    }
}

impl LatchkeyConfig {
    /// Get the default data directory
    pub fn default_base_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("latchkey")
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("latchkey")
            .join("config.json")
    }

    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.lockout.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Create data directories if they don't exist
    pub fn ensure_directories(&self) -> Result<()> {
        for path in [&self.store_path, &self.device_key_path] {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}
