//! Biometric credential gate
//!
//! Lets a returning user skip manual credential entry: after an explicit
//! opt-in, the identity and secret are sealed into the secure store and
//! released only after a fresh platform biometric challenge.
//!
//! # Capabilities
//!
//! The gate needs a [`BiometricAuthenticator`] and a durable secure store.
//! The composition root passes `None` for either one it cannot provide, and
//! the gate then reports itself unavailable from every operation instead of
//! failing. Absence is detected once at construction.
//!
//! # Caller Contract
//!
//! - [`BiometricGate::enable`] trusts the caller to have just confirmed the
//!   user's identity (fresh password entry or a completed challenge).
//! - [`BiometricGate::authenticate`] does not consult the lockout tracker.
//!   The caller must check lockout status before forwarding the released
//!   credentials to the login service.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};
use crate::seal::CredentialSealer;
use crate::store::KeyValueStore;

/// Storage key for the opt-in flag
pub const BIOMETRIC_ENABLED_KEY: &str = "biometric_enabled";

/// Storage key for the sealed credential bundle
pub const BIOMETRIC_CREDENTIALS_KEY: &str = "biometric_credentials";

/// Text shown by the platform challenge
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BiometricPrompt {
    /// Main prompt message
    pub message: String,
    /// Label of the fallback button
    pub fallback_label: String,
    /// Whether the device passcode may be used instead of a biometric
    pub allow_device_fallback: bool,
}

impl Default for BiometricPrompt {
    fn default() -> Self {
        Self {
            message: "Authenticate to login".to_string(),
            fallback_label: "Use password".to_string(),
            allow_device_fallback: true,
        }
    }
}

/// How a platform challenge ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChallengeOutcome {
    /// The user was verified
    Success,
    /// The biometric did not match
    Failed,
    /// The user dismissed the prompt
    Cancelled,
}

/// Platform biometric capability
#[async_trait]
pub trait BiometricAuthenticator: Send + Sync {
    /// Whether compatible hardware is present
    async fn has_hardware(&self) -> Result<bool>;

    /// Whether at least one biometric is enrolled at the OS level
    async fn is_enrolled(&self) -> Result<bool>;

    /// Run the platform challenge
    ///
    /// A user cancellation is `Ok(ChallengeOutcome::Cancelled)`, not an error.
    async fn challenge(&self, prompt: &BiometricPrompt) -> Result<ChallengeOutcome>;
}

/// Null capability for devices without biometric support
#[derive(Clone, Copy, Debug, Default)]
pub struct UnavailableBiometrics;

#[async_trait]
impl BiometricAuthenticator for UnavailableBiometrics {
    async fn has_hardware(&self) -> Result<bool> {
        Ok(false)
    }

    async fn is_enrolled(&self) -> Result<bool> {
        Ok(false)
    }

    async fn challenge(&self, _prompt: &BiometricPrompt) -> Result<ChallengeOutcome> {
        Ok(ChallengeOutcome::Failed)
    }
}

/// Stored login credentials released by a successful challenge
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct CredentialBundle {
    /// Login identity (email)
    pub identity: String,
    /// Login secret (password)
    pub secret: String,
}

impl CredentialBundle {
    /// Create a bundle
    pub fn new(identity: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for CredentialBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialBundle")
            .field("identity", &self.identity)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Everything the gate needs to operate
struct GateCapability {
    authenticator: Arc<dyn BiometricAuthenticator>,
    store: Arc<dyn KeyValueStore>,
    sealer: CredentialSealer,
}

/// Opt-in biometric shortcut for login
pub struct BiometricGate {
    /// `None` once a required capability was found missing
    capability: Option<GateCapability>,
    /// Prompt text for the challenge
    prompt: BiometricPrompt,
}

impl BiometricGate {
    /// Create a gate from whatever capabilities the host provides
    pub fn new(
        authenticator: Option<Arc<dyn BiometricAuthenticator>>,
        store: Option<Arc<dyn KeyValueStore>>,
        sealer: CredentialSealer,
        prompt: BiometricPrompt,
    ) -> Self {
        let capability = match (authenticator, store) {
            (Some(authenticator), Some(store)) => Some(GateCapability {
                authenticator,
                store,
                sealer,
            }),
            (None, _) => {
                warn!("Biometric capability not provided, biometric login will be disabled");
                None
            }
            (_, None) => {
                warn!("Secure storage not provided, biometric login will be disabled");
                None
            }
        };

        Self { capability, prompt }
    }

    /// A gate with no capabilities at all
    pub fn unavailable() -> Self {
        Self {
            capability: None,
            prompt: BiometricPrompt::default(),
        }
    }

    /// Whether the device has compatible hardware with an enrolled biometric
    pub async fn is_available(&self) -> bool {
        let Some(cap) = &self.capability else {
            return false;
        };

        match probe(cap.authenticator.as_ref()).await {
            Ok(available) => available,
            Err(e) => {
                error!(error = %e, "Error checking biometric availability");
                false
            }
        }
    }

    /// Whether the user has opted in and biometrics are still available
    ///
    /// A stored opt-in is ignored on a device that has since lost its
    /// enrolled biometric.
    pub async fn is_enabled(&self) -> bool {
        let Some(cap) = &self.capability else {
            return false;
        };

        if !self.is_available().await {
            return false;
        }

        match cap.store.get(BIOMETRIC_ENABLED_KEY).await {
            Ok(value) => value.as_deref() == Some("true"),
            Err(e) => {
                error!(error = %e, "Error checking if biometric is enabled");
                false
            }
        }
    }

    /// Opt in: seal and store the credentials, then set the flag
    ///
    /// Returns `false` without storing anything when biometrics are
    /// unavailable, so the caller can explain the prerequisites instead of
    /// showing a generic error.
    ///
    /// # Caller Contract
    ///
    /// The gate does not challenge the user here. Call this only right after
    /// the user proved their identity.
    pub async fn enable(&self, identity: &str, secret: &str) -> bool {
        let Some(cap) = &self.capability else {
            return false;
        };

        if !self.is_available().await {
            debug!("Refusing to enable biometric login, no enrolled biometric");
            return false;
        }

        let bundle = CredentialBundle::new(identity, secret);
        match store_bundle(cap, &bundle).await {
            Ok(()) => {
                info!(identity, "Biometric login enabled");
                true
            }
            Err(e) => {
                error!(error = %e, "Error enabling biometric");
                false
            }
        }
    }

    /// Opt out: remove the stored credentials and clear the flag
    ///
    /// A missing bundle is not an error.
    pub async fn disable(&self) -> bool {
        let Some(cap) = &self.capability else {
            return false;
        };

        let result = async {
            cap.store.remove(BIOMETRIC_CREDENTIALS_KEY).await?;
            cap.store.set(BIOMETRIC_ENABLED_KEY, "false").await
        }
        .await;

        match result {
            Ok(()) => {
                info!("Biometric login disabled");
                true
            }
            Err(e) => {
                error!(error = %e, "Error disabling biometric");
                false
            }
        }
    }

    /// Run the biometric challenge and release the stored credentials
    ///
    /// Returns `None` without prompting when biometrics are unavailable or
    /// not enabled, and `None` when the challenge fails or is cancelled.
    pub async fn authenticate(&self) -> Option<CredentialBundle> {
        let cap = self.capability.as_ref()?;

        if !self.is_enabled().await {
            return None;
        }

        match cap.authenticator.challenge(&self.prompt).await {
            Ok(ChallengeOutcome::Success) => {}
            Ok(ChallengeOutcome::Cancelled) => {
                debug!("Biometric challenge cancelled");
                return None;
            }
            Ok(ChallengeOutcome::Failed) => {
                debug!("Biometric challenge failed");
                return None;
            }
            Err(e) => {
                error!(error = %e, "Error during biometric authentication");
                return None;
            }
        }

        match load_bundle(cap).await {
            Ok(bundle) => bundle,
            Err(e) => {
                error!(error = %e, "Error reading stored biometric credentials");
                None
            }
        }
    }
}

async fn probe(authenticator: &dyn BiometricAuthenticator) -> Result<bool> {
    Ok(authenticator.has_hardware().await? && authenticator.is_enrolled().await?)
}

async fn store_bundle(cap: &GateCapability, bundle: &CredentialBundle) -> Result<()> {
    let plaintext = zeroize::Zeroizing::new(serde_json::to_vec(bundle)?);
    let sealed = cap.sealer.seal(&plaintext)?;

    cap.store.set(BIOMETRIC_CREDENTIALS_KEY, &sealed).await?;

    if let Err(e) = cap.store.set(BIOMETRIC_ENABLED_KEY, "true").await {
        // No sealed secret without the flag that governs it
        if let Err(cleanup) = cap.store.remove(BIOMETRIC_CREDENTIALS_KEY).await {
            warn!(error = %cleanup, "Failed to remove credentials after enable failure");
        }
        return Err(e);
    }

    Ok(())
}

async fn load_bundle(cap: &GateCapability) -> Result<Option<CredentialBundle>> {
    let Some(sealed) = cap.store.get(BIOMETRIC_CREDENTIALS_KEY).await? else {
        warn!("Biometric login enabled but no credentials stored");
        return Ok(None);
    };

    let plaintext = cap.sealer.open(&sealed)?;
    let bundle = serde_json::from_slice(&plaintext)
        .map_err(|e| Error::Serialization(format!("Invalid credential bundle: {}", e)))?;
    Ok(Some(bundle))
}
