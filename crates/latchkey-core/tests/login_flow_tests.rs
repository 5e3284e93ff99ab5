//! Integration tests for the login-screen flow

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use latchkey_core::{
    format_remaining_millis, open_store, BiometricAuthenticator, BiometricGate, BiometricPrompt,
    ChallengeOutcome, CredentialBundle, CredentialSealer, DeviceKey, FileStore, KeyValueStore,
    LockoutPolicy, LockoutStatus, LockoutTracker, ManualClock, MemoryStore, Result, StoreKind,
};

/// Platform capability that always verifies the user
struct AlwaysVerified;

#[async_trait]
impl BiometricAuthenticator for AlwaysVerified {
    async fn has_hardware(&self) -> Result<bool> {
        Ok(true)
    }

    async fn is_enrolled(&self) -> Result<bool> {
        Ok(true)
    }

    async fn challenge(&self, _prompt: &BiometricPrompt) -> Result<ChallengeOutcome> {
        Ok(ChallengeOutcome::Success)
    }
}

fn tracker_with_clock() -> (LockoutTracker, Arc<ManualClock>) {
    let start = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
    let clock = Arc::new(ManualClock::new(start));
    let tracker = LockoutTracker::with_policy(
        Arc::new(MemoryStore::new()),
        LockoutPolicy::default(),
        clock.clone(),
    );
    (tracker, clock)
}

fn unlocked(attempts_remaining: u32) -> LockoutStatus {
    LockoutStatus {
        is_locked: false,
        time_remaining: Duration::ZERO,
        attempts_remaining,
    }
}

#[tokio::test]
async fn test_unknown_identity_is_unlocked() {
    let (tracker, _) = tracker_with_clock();
    assert_eq!(tracker.check_status("nobody@example.com").await, unlocked(5));
}

#[tokio::test]
async fn test_four_failures_leave_one_attempt() {
    let (tracker, _) = tracker_with_clock();
    for _ in 0..4 {
        tracker.record_failed_attempt("ada@example.com").await;
    }
    assert_eq!(tracker.check_status("ada@example.com").await, unlocked(1));
}

#[tokio::test]
async fn test_five_failures_lock() {
    let (tracker, _) = tracker_with_clock();
    for _ in 0..5 {
        tracker.record_failed_attempt("ada@example.com").await;
    }

    let status = tracker.check_status("ada@example.com").await;
    assert!(status.is_locked);
    assert_eq!(status.attempts_remaining, 0);
    assert!(status.time_remaining > Duration::ZERO);
    assert!(status.time_remaining <= Duration::from_secs(300));
    assert_eq!(
        format_remaining_millis(status.time_remaining.as_millis() as u64),
        "5 minutes and 0 seconds"
    );
}

#[tokio::test]
async fn test_lockout_expires_lazily_and_fully() {
    let (tracker, clock) = tracker_with_clock();
    for _ in 0..5 {
        tracker.record_failed_attempt("ada@example.com").await;
    }

    clock.advance(Duration::from_secs(301));
    assert_eq!(tracker.check_status("ada@example.com").await, unlocked(5));

    // The record is gone: one new failure starts from zero
    let outcome = tracker.record_failed_attempt("ada@example.com").await;
    assert!(!outcome.is_locked);
    assert_eq!(outcome.attempts_remaining, 4);
}

#[tokio::test]
async fn test_reset_unlocks_immediately() {
    let (tracker, _) = tracker_with_clock();
    for _ in 0..5 {
        tracker.record_failed_attempt("ada@example.com").await;
    }
    assert!(tracker.check_status("ada@example.com").await.is_locked);

    tracker.reset("ada@example.com").await;
    assert_eq!(tracker.check_status("ada@example.com").await, unlocked(5));
}

#[tokio::test]
async fn test_successful_login_clears_counter() {
    let (tracker, _) = tracker_with_clock();
    for _ in 0..3 {
        tracker.record_failed_attempt("ada@example.com").await;
    }
    tracker
        .reset_after_successful_login("ada@example.com")
        .await;
    assert_eq!(tracker.check_status("ada@example.com").await, unlocked(5));
}

#[tokio::test]
async fn test_identities_are_independent() {
    let (tracker, _) = tracker_with_clock();
    tracker.record_failed_attempt("bob@example.com").await;
    let before = tracker.check_status("bob@example.com").await;

    for _ in 0..5 {
        tracker.record_failed_attempt("ada@example.com").await;
    }

    assert!(tracker.check_status("ada@example.com").await.is_locked);
    assert_eq!(tracker.check_status("bob@example.com").await, before);
}

#[tokio::test]
async fn test_countdown_polling() {
    let (tracker, clock) = tracker_with_clock();
    for _ in 0..5 {
        tracker.record_failed_attempt("ada@example.com").await;
    }

    let mut rendered = Vec::new();
    loop {
        let status = tracker.check_status("ada@example.com").await;
        if !status.is_locked {
            break;
        }
        rendered.push(format_remaining_millis(status.time_remaining.as_millis() as u64));
        clock.advance(Duration::from_secs(1));
    }

    assert_eq!(rendered.len(), 300);
    assert_eq!(rendered.first().unwrap(), "5 minutes and 0 seconds");
    assert_eq!(rendered[1], "4 minutes and 59 seconds");
    assert_eq!(rendered.last().unwrap(), "1 second");
}

#[tokio::test]
async fn test_lockout_survives_restart() {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("state.json");

    {
        let store = open_store(&path).await;
        assert_eq!(store.kind(), StoreKind::Durable);
        let tracker = LockoutTracker::new(store);
        for _ in 0..5 {
            tracker.record_failed_attempt("ada@example.com").await;
        }
    }

    let tracker = LockoutTracker::new(Arc::new(FileStore::open(&path).await.unwrap()));
    assert!(tracker.check_status("ada@example.com").await.is_locked);
}

#[tokio::test]
async fn test_biometric_login_round_trip() {
    let temp_dir = tempfile::tempdir().unwrap();
    let key = DeviceKey::load_or_create(&temp_dir.path().join("device.key")).unwrap();
    let store: Arc<dyn KeyValueStore> =
        Arc::new(FileStore::open(temp_dir.path().join("secure.json")).await.unwrap());

    let gate = BiometricGate::new(
        Some(Arc::new(AlwaysVerified)),
        Some(store.clone()),
        CredentialSealer::new(*key),
        BiometricPrompt::default(),
    );

    assert!(gate.enable("ada@example.com", "hunter2").await);
    assert_eq!(
        gate.authenticate().await,
        Some(CredentialBundle::new("ada@example.com", "hunter2"))
    );

    assert!(gate.disable().await);
    assert_eq!(gate.authenticate().await, None);
}

#[tokio::test]
async fn test_unavailable_biometrics_never_panic() {
    let gate = BiometricGate::unavailable();
    assert!(!gate.is_available().await);
    assert!(!gate.is_enabled().await);
    assert!(!gate.enable("ada@example.com", "hunter2").await);
    assert_eq!(gate.authenticate().await, None);
}

#[tokio::test]
async fn test_caller_checks_lockout_before_biometric_login() {
    let (tracker, _) = tracker_with_clock();
    let gate = BiometricGate::new(
        Some(Arc::new(AlwaysVerified)),
        Some(Arc::new(MemoryStore::new())),
        CredentialSealer::new([3u8; 32]),
        BiometricPrompt::default(),
    );
    assert!(gate.enable("ada@example.com", "hunter2").await);

    for _ in 0..5 {
        tracker.record_failed_attempt("ada@example.com").await;
    }

    // The gate still releases credentials; refusing them is the caller's job
    let bundle = gate.authenticate().await.unwrap();
    assert!(tracker.check_status(&bundle.identity).await.is_locked);
}
