//! Composition root
//!
//! Decides which capabilities the core gets: the durable store (or the
//! memory fallback), the system clock, the device sealing key, and either the
//! terminal biometric sensor or the null capability.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use latchkey_core::{
    open_secure_store, open_store, BiometricAuthenticator, BiometricGate, CredentialSealer,
    DeviceKey, LatchkeyConfig, LockoutTracker, StoreKind, SystemClock, UnavailableBiometrics,
};
use tracing::{info, warn};

use crate::terminal::TerminalBiometrics;

/// Wired-up core components
pub struct App {
    pub tracker: LockoutTracker,
    pub gate: BiometricGate,
}

impl App {
    /// Build the components described by `config`
    pub async fn build(config: &LatchkeyConfig, biometrics_enabled: bool) -> Result<Self> {
        config
            .ensure_directories()
            .context("Failed to create data directories")?;

        let store = open_store(&config.store_path).await;
        if store.kind() == StoreKind::Memory {
            warn!("Lockout state will not survive this process");
        }

        let tracker =
            LockoutTracker::with_policy(store, config.lockout.clone(), Arc::new(SystemClock));

        let gate = match DeviceKey::load_or_create(&config.device_key_path) {
            Ok(key) => {
                let authenticator: Arc<dyn BiometricAuthenticator> = if biometrics_enabled {
                    Arc::new(TerminalBiometrics)
                } else {
                    Arc::new(UnavailableBiometrics)
                };
                BiometricGate::new(
                    Some(authenticator),
                    open_secure_store(secure_store_path(&config.store_path)).await,
                    CredentialSealer::new(*key),
                    config.prompt.clone(),
                )
            }
            Err(e) => {
                warn!(error = %e, "Device key unavailable, biometric login disabled");
                BiometricGate::unavailable()
            }
        };

        info!(store = %config.store_path.display(), "Latchkey ready");
        Ok(Self { tracker, gate })
    }
}

/// Load the config at `path`, writing the default on first run
pub fn load_or_create_config(path: &Path) -> Result<LatchkeyConfig> {
    if path.exists() {
        return LatchkeyConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()));
    }

    let config = LatchkeyConfig::default();
    config
        .save(path)
        .with_context(|| format!("Failed to write default config to {}", path.display()))?;
    info!("Created default config at {:?}", path);
    Ok(config)
}

/// Biometric settings live next to, but apart from, the lockout state
fn secure_store_path(store_path: &Path) -> std::path::PathBuf {
    store_path.with_file_name("biometric.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use latchkey_core::LockoutPolicy;
    use tempfile::tempdir;

    fn test_config(dir: &Path) -> LatchkeyConfig {
        LatchkeyConfig {
            store_path: dir.join("data").join("state.json"),
            device_key_path: dir.join("data").join("device.key"),
            lockout: LockoutPolicy::strict(),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_config_written_once() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("config.json");

        let first = load_or_create_config(&path).unwrap();
        assert!(path.exists());
        assert_eq!(load_or_create_config(&path).unwrap(), first);
    }

    #[tokio::test]
    async fn test_build_uses_configured_policy() {
        let temp_dir = tempdir().unwrap();
        let config = test_config(temp_dir.path());

        let app = App::build(&config, false).await.unwrap();
        assert_eq!(app.tracker.policy(), &LockoutPolicy::strict());
        assert!(config.device_key_path.exists());

        for _ in 0..3 {
            app.tracker.record_failed_attempt("ada@example.com").await;
        }

        // A second build sees the persisted lockout
        let app = App::build(&config, false).await.unwrap();
        assert!(app.tracker.check_status("ada@example.com").await.is_locked);
    }

    #[tokio::test]
    async fn test_no_biometrics_flag() {
        let temp_dir = tempdir().unwrap();
        let app = App::build(&test_config(temp_dir.path()), false)
            .await
            .unwrap();

        assert!(!app.gate.is_available().await);
        assert!(!app.gate.enable("ada@example.com", "hunter2").await);
    }

    #[test]
    fn test_secure_store_path() {
        assert_eq!(
            secure_store_path(Path::new("/data/latchkey/state.json")),
            Path::new("/data/latchkey/biometric.json")
        );
    }
}
