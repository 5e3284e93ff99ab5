//! Per-identity failed-attempt tracking with timed lockout
//!
//! Each identity (typically an email address) has at most two persisted
//! fields:
//!
//! - `failed_attempts_<identity>` - consecutive failures since the last reset
//! - `lockout_time_<identity>` - lockout end as Unix epoch milliseconds,
//!   present only while locked
//!
//! # State Machine
//!
//! - `Unlocked(n)` --failure, n+1 < max--> `Unlocked(n+1)`
//! - `Unlocked(n)` --failure, n+1 >= max--> `Locked(now + duration)`
//! - `Locked(until)` --read at/after `until`, or reset--> `Unlocked(0)`
//!
//! Expiry is lazy: nothing runs in the background, the record is cleared on
//! the first status read after the end instant. A countdown display polls
//! [`LockoutTracker::check_status`] itself.
//!
//! # Failure Policy
//!
//! Storage errors never reach the caller. Reads fail open (unlocked, full
//! attempts), failure recording under-counts by one. This is a client-local,
//! defeatable control; it must not lock out a legitimate user because of a
//! storage glitch.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::store::KeyValueStore;

/// Failures allowed before the identity is locked
pub const MAX_FAILED_ATTEMPTS: u32 = 5;

/// How long a lockout lasts
pub const LOCKOUT_DURATION: Duration = Duration::from_secs(5 * 60);

/// Storage key for an identity's failure counter
pub fn failed_attempts_key(identity: &str) -> String {
    format!("failed_attempts_{}", identity)
}

/// Storage key for an identity's lockout end instant
pub fn lockout_time_key(identity: &str) -> String {
    format!("lockout_time_{}", identity)
}

/// Lockout policy
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockoutPolicy {
    /// Failures that trigger a lockout
    pub max_failed_attempts: u32,
    /// Lockout length in seconds
    pub lockout_duration_secs: u64,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            max_failed_attempts: MAX_FAILED_ATTEMPTS,
            lockout_duration_secs: LOCKOUT_DURATION.as_secs(),
        }
    }
}

impl LockoutPolicy {
    /// Create a strict policy (fewer attempts, longer lockout)
    pub fn strict() -> Self {
        Self {
            max_failed_attempts: 3,
            lockout_duration_secs: 15 * 60,
        }
    }

    /// Create a lenient policy (more attempts, short lockout)
    pub fn lenient() -> Self {
        Self {
            max_failed_attempts: 10,
            lockout_duration_secs: 60,
        }
    }

    /// Lockout length
    pub fn lockout_duration(&self) -> Duration {
        Duration::from_secs(self.lockout_duration_secs)
    }

    /// Attempts left after `failed_attempts` failures
    pub fn attempts_remaining(&self, failed_attempts: u32) -> u32 {
        self.max_failed_attempts.saturating_sub(failed_attempts)
    }

    /// Whether `failed_attempts` failures should lock the identity
    pub fn should_lock(&self, failed_attempts: u32) -> bool {
        failed_attempts >= self.max_failed_attempts
    }

    /// Reject policies that could never unlock or never lock
    pub fn validate(&self) -> Result<()> {
        if self.max_failed_attempts == 0 {
            return Err(Error::Config(
                "max_failed_attempts must be at least 1".to_string(),
            ));
        }
        if self.lockout_duration_secs == 0 {
            return Err(Error::Config(
                "lockout_duration_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Result of a status query
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LockoutStatus {
    /// Whether login attempts are currently refused
    pub is_locked: bool,
    /// Time until the lockout ends (zero when unlocked)
    pub time_remaining: Duration,
    /// Failures allowed before the next lockout (zero when locked)
    pub attempts_remaining: u32,
}

impl LockoutStatus {
    fn unlocked(attempts_remaining: u32) -> Self {
        Self {
            is_locked: false,
            time_remaining: Duration::ZERO,
            attempts_remaining,
        }
    }

    fn locked(time_remaining: Duration) -> Self {
        Self {
            is_locked: true,
            time_remaining,
            attempts_remaining: 0,
        }
    }
}

/// Result of recording a failed attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FailedAttemptOutcome {
    /// Failures allowed before lockout
    pub attempts_remaining: u32,
    /// Whether this failure locked the identity
    pub is_locked: bool,
    /// When the lockout ends, if locked
    pub lockout_end_time: Option<DateTime<Utc>>,
}

/// Tracks failed login attempts and lockouts for any number of identities
pub struct LockoutTracker {
    /// Persistence for the per-identity fields
    store: Arc<dyn KeyValueStore>,
    /// Wall-clock source
    clock: Arc<dyn Clock>,
    /// Thresholds
    policy: LockoutPolicy,
    /// Serializes the counter read-modify-write within this process
    record_guard: Mutex<()>,
}

impl LockoutTracker {
    /// Create a tracker with the default policy and the system clock
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_policy(store, LockoutPolicy::default(), Arc::new(SystemClock))
    }

    /// Create a tracker with a custom policy and clock
    pub fn with_policy(
        store: Arc<dyn KeyValueStore>,
        policy: LockoutPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            clock,
            policy,
            record_guard: Mutex::new(()),
        }
    }

    /// The active policy
    pub fn policy(&self) -> &LockoutPolicy {
        &self.policy
    }

    /// Current lockout state for `identity`
    ///
    /// Clears an elapsed lockout as a side effect. Safe to poll repeatedly.
    /// Fails open: a storage error reports the identity as unlocked with all
    /// attempts remaining.
    pub async fn check_status(&self, identity: &str) -> LockoutStatus {
        match self.load_status(identity).await {
            Ok(status) => status,
            Err(e) => {
                error!(identity, error = %e, "Error checking account lockout");
                LockoutStatus::unlocked(self.policy.max_failed_attempts)
            }
        }
    }

    /// Record one failed login for `identity`
    ///
    /// This is the only operation that can lock an identity. On a storage
    /// error the failure is not counted and the caller sees one attempt used.
    pub async fn record_failed_attempt(&self, identity: &str) -> FailedAttemptOutcome {
        let _guard = self.record_guard.lock().await;

        match self.increment(identity).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(identity, error = %e, "Error recording failed attempt");
                FailedAttemptOutcome {
                    attempts_remaining: self.policy.attempts_remaining(1),
                    is_locked: false,
                    lockout_end_time: None,
                }
            }
        }
    }

    /// Clear all lockout state for `identity`
    ///
    /// Used for explicit "unlock my account" recovery. A missing record is
    /// not an error.
    pub async fn reset(&self, identity: &str) {
        match self.clear(identity).await {
            Ok(()) => info!(identity, "Lockout reset"),
            Err(e) => error!(identity, error = %e, "Error resetting lockout"),
        }
    }

    /// Clear the failure counter after a login the caller has verified
    ///
    /// # Caller Contract
    ///
    /// The tracker has no notion of success. Call this only after the
    /// authentication service accepted the credentials.
    pub async fn reset_after_successful_login(&self, identity: &str) {
        match self.clear(identity).await {
            Ok(()) => debug!(identity, "Failed attempts cleared after login"),
            Err(e) => error!(identity, error = %e, "Error resetting failed attempts"),
        }
    }

    async fn load_status(&self, identity: &str) -> Result<LockoutStatus> {
        let lockout_key = lockout_time_key(identity);

        let Some(raw) = self.store.get(&lockout_key).await? else {
            let attempts = self.read_attempts(identity).await?;
            return Ok(LockoutStatus::unlocked(
                self.policy.attempts_remaining(attempts),
            ));
        };

        let Some(lockout_end) = parse_instant(&raw) else {
            // An unreadable timer must not keep the identity locked
            warn!(identity, value = %raw, "Discarding corrupted lockout timestamp");
            self.clear(identity).await?;
            return Ok(LockoutStatus::unlocked(self.policy.max_failed_attempts));
        };

        let now = self.clock.now();
        if now >= lockout_end {
            debug!(identity, "Lockout expired");
            self.clear(identity).await?;
            return Ok(LockoutStatus::unlocked(self.policy.max_failed_attempts));
        }

        let remaining = (lockout_end - now).to_std().unwrap_or(Duration::ZERO);
        let max = self.policy.lockout_duration();
        if remaining > max {
            // Clock moved backwards or the value was tampered with
            warn!(identity, "Lockout end beyond policy duration, clamping");
            self.store
                .set(&lockout_key, &format_instant(add(now, max)))
                .await?;
            return Ok(LockoutStatus::locked(max));
        }

        Ok(LockoutStatus::locked(remaining))
    }

    async fn increment(&self, identity: &str) -> Result<FailedAttemptOutcome> {
        // An elapsed lockout nobody polled still counts as unlocked with no failures
        if let Some(raw) = self.store.get(&lockout_time_key(identity)).await? {
            match parse_instant(&raw) {
                Some(lockout_end) if self.clock.now() < lockout_end => {}
                Some(_) => {
                    debug!(identity, "Lockout expired");
                    self.clear(identity).await?;
                }
                None => {
                    warn!(identity, value = %raw, "Discarding corrupted lockout timestamp");
                    self.clear(identity).await?;
                }
            }
        }

        let failed_attempts = self.read_attempts(identity).await?.saturating_add(1);
        self.store
            .set(&failed_attempts_key(identity), &failed_attempts.to_string())
            .await?;

        if self.policy.should_lock(failed_attempts) {
            let lockout_end = whole_millis(add(self.clock.now(), self.policy.lockout_duration()));
            self.store
                .set(&lockout_time_key(identity), &format_instant(lockout_end))
                .await?;

            warn!(identity, failed_attempts, until = %lockout_end, "Account locked out");
            return Ok(FailedAttemptOutcome {
                attempts_remaining: 0,
                is_locked: true,
                lockout_end_time: Some(lockout_end),
            });
        }

        Ok(FailedAttemptOutcome {
            attempts_remaining: self.policy.attempts_remaining(failed_attempts),
            is_locked: false,
            lockout_end_time: None,
        })
    }

    async fn read_attempts(&self, identity: &str) -> Result<u32> {
        let key = failed_attempts_key(identity);
        match self.store.get(&key).await? {
            None => Ok(0),
            Some(raw) => Ok(raw.trim().parse().unwrap_or_else(|_| {
                warn!(identity, value = %raw, "Ignoring corrupted failed-attempt counter");
                0
            })),
        }
    }

    async fn clear(&self, identity: &str) -> Result<()> {
        self.store.remove(&failed_attempts_key(identity)).await?;
        self.store.remove(&lockout_time_key(identity)).await?;
        Ok(())
    }
}

fn add(instant: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(by)
        .ok()
        .and_then(|delta| instant.checked_add_signed(delta))
        .unwrap_or(instant)
}

/// Drop sub-millisecond precision so the value matches what is persisted
fn whole_millis(instant: DateTime<Utc>) -> DateTime<Utc> {
    parse_instant(&format_instant(instant)).unwrap_or(instant)
}

fn format_instant(instant: DateTime<Utc>) -> String {
    instant.timestamp_millis().to_string()
}

fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    let millis: i64 = raw.trim().parse().ok()?;
    Utc.timestamp_millis_opt(millis).single()
}

/// Render a remaining lockout time for display
///
/// Floors to whole seconds so a countdown never shows more time than is
/// actually left. `"2 minutes and 5 seconds"`, `"1 second"`, `"0 seconds"`.
pub fn format_remaining(remaining: Duration) -> String {
    let total_secs = remaining.as_secs();
    let minutes = total_secs / 60;
    let seconds = total_secs % 60;

    if minutes > 0 {
        format!("{} and {}", plural(minutes, "minute"), plural(seconds, "second"))
    } else {
        plural(seconds, "second")
    }
}

/// [`format_remaining`] for a millisecond count
pub fn format_remaining_millis(milliseconds: u64) -> String {
    format_remaining(Duration::from_millis(milliseconds))
}

fn plural(count: u64, unit: &str) -> String {
    if count == 1 {
        format!("{} {}", count, unit)
    } else {
        format!("{} {}s", count, unit)
    }
}
