//! Latchkey Core - Client-side login lockout and biometric credential gating
//!
//! This crate provides the stateful pieces of a mobile-style login flow:
//! - Per-identity failed-attempt counting with a timed, self-expiring lockout
//! - An opt-in biometric shortcut that releases a stored credential bundle
//!   only after a fresh platform challenge
//! - Pluggable key-value persistence with an in-memory fallback
//!
//! # Integration Contract
//!
//! The two components never call each other. The login screen checks
//! [`LockoutTracker::check_status`] before submitting credentials (including
//! credentials released by [`BiometricGate::authenticate`]), records failures
//! with [`LockoutTracker::record_failed_attempt`], and pairs every successful
//! login with [`LockoutTracker::reset_after_successful_login`].

pub mod biometric;
pub mod clock;
pub mod config;
pub mod error;
pub mod lockout;
pub mod seal;
pub mod store;

pub use biometric::{
    BiometricAuthenticator, BiometricGate, BiometricPrompt, ChallengeOutcome, CredentialBundle,
    UnavailableBiometrics, BIOMETRIC_CREDENTIALS_KEY, BIOMETRIC_ENABLED_KEY,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::LatchkeyConfig;
pub use error::{Error, Result};
pub use lockout::{
    format_remaining, format_remaining_millis, FailedAttemptOutcome, LockoutPolicy,
    LockoutStatus, LockoutTracker, LOCKOUT_DURATION, MAX_FAILED_ATTEMPTS,
};
pub use seal::{CredentialSealer, DeviceKey};
pub use store::{open_secure_store, open_store, FileStore, KeyValueStore, MemoryStore, StoreKind};
