//! Degraded-mode tracking around the accessibility provider.
//!
//! `NORMAL -> DEGRADED(reason) -> NORMAL`. Entering happens on permission or
//! availability failures; leaving requires a successful probe through
//! [`RecoveryManager::attempt_recovery`]. Once the attempt budget is spent
//! the manager stays degraded until [`RecoveryManager::reset`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{
    sync::Mutex,
    time::{Duration, Instant},
};

use crate::config::DetectionConfig;
use crate::error::ProviderError;

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryPolicy {
    pub max_recovery_attempts: u32,
    #[serde(with = "duration_ms")]
    pub permission_check_interval: Duration,
    #[serde(with = "duration_ms")]
    pub base_delay: Duration,
    pub backoff_multiplier: f64,
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self::from_config(&DetectionConfig::default())
    }
}

impl RecoveryPolicy {
    pub fn from_config(config: &DetectionConfig) -> Self {
        Self {
            max_recovery_attempts: config.max_recovery_attempts,
            permission_check_interval: Duration::from_secs(config.permission_check_interval_secs),
            base_delay: Duration::from_millis(config.recovery_base_delay_ms),
            backoff_multiplier: config.recovery_backoff_multiplier,
        }
    }

    /// Delay before the `attempt`-th recovery (1-based):
    /// `base_delay * backoff_multiplier^(attempt - 1)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let factor = self.backoff_multiplier.powi(exponent);
        let millis = self.base_delay.as_millis() as f64 * factor;
        if !millis.is_finite() || millis > u64::MAX as f64 {
            return Duration::from_millis(u64::MAX);
        }
        Duration::from_millis(millis as u64)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DegradedModeState {
    pub enabled: bool,
    pub reason: Option<String>,
    pub error_count: u32,
    pub recovery_attempts: u32,
    pub last_error_time: Option<DateTime<Utc>>,
    pub policy: RecoveryPolicy,
    #[serde(skip)]
    last_error_at: Option<Instant>,
}

impl DegradedModeState {
    fn new(policy: RecoveryPolicy) -> Self {
        Self {
            enabled: false,
            reason: None,
            error_count: 0,
            recovery_attempts: 0,
            last_error_time: None,
            policy,
            last_error_at: None,
        }
    }

    fn since_last_error(&self) -> Duration {
        self.last_error_at
            .map(|at| at.elapsed())
            .unwrap_or(Duration::MAX)
    }

    fn may_attempt(&self) -> bool {
        if !self.enabled || self.recovery_attempts >= self.policy.max_recovery_attempts {
            return false;
        }
        let wait = self
            .policy
            .permission_check_interval
            .max(self.policy.delay_for_attempt(self.recovery_attempts + 1));
        self.since_last_error() >= wait
    }
}

pub struct RecoveryManager {
    state: Mutex<DegradedModeState>,
}

impl RecoveryManager {
    pub fn new(policy: RecoveryPolicy) -> Self {
        Self {
            state: Mutex::new(DegradedModeState::new(policy)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DegradedModeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_degraded(&self) -> bool {
        self.lock().enabled
    }

    pub fn state(&self) -> DegradedModeState {
        self.lock().clone()
    }

    /// Enters (or stays in) degraded mode.
    pub fn enter_degraded(&self, reason: &str) {
        let mut state = self.lock();
        if !state.enabled {
            log_warn!("entering degraded mode: {}", reason);
            state.enabled = true;
            state.recovery_attempts = 0;
        }
        state.reason = Some(reason.to_string());
        state.error_count = state.error_count.saturating_add(1);
        state.last_error_at = Some(Instant::now());
        state.last_error_time = Some(Utc::now());
    }

    /// Applies a provider failure. Returns `true` when it was fatal and the
    /// manager is now degraded.
    pub fn record_error(&self, err: &ProviderError) -> bool {
        if !err.is_fatal() {
            return false;
        }
        self.enter_degraded(&err.to_string());
        true
    }

    /// Degraded, attempts remain, and the interval/backoff has elapsed since
    /// the last error.
    pub fn should_attempt_recovery(&self) -> bool {
        self.lock().may_attempt()
    }

    /// Time until the next attempt is allowed; `None` when not degraded or
    /// when the attempt budget is exhausted.
    pub fn next_attempt_in(&self) -> Option<Duration> {
        let state = self.lock();
        if !state.enabled || state.recovery_attempts >= state.policy.max_recovery_attempts {
            return None;
        }
        let wait = state
            .policy
            .permission_check_interval
            .max(state.policy.delay_for_attempt(state.recovery_attempts + 1));
        Some(wait.saturating_sub(state.since_last_error()))
    }

    /// Runs `probe` if a recovery attempt is due. The lock is released while
    /// the probe runs since it usually calls into the provider.
    ///
    /// Returns `true` only when the probe succeeded and the manager is back
    /// to normal. When no attempt is due this is a no-op returning `false`.
    pub fn attempt_recovery<F>(&self, probe: F) -> bool
    where
        F: FnOnce() -> bool,
    {
        let attempt = {
            let mut state = self.lock();
            if !state.may_attempt() {
                return false;
            }
            state.recovery_attempts += 1;
            state.recovery_attempts
        };

        let recovered = probe();

        let mut state = self.lock();
        if !state.enabled {
            return recovered;
        }
        if recovered {
            log_info!("recovered from degraded mode after {} attempt(s)", attempt);
            state.enabled = false;
            state.reason = None;
            state.recovery_attempts = 0;
        } else {
            state.error_count = state.error_count.saturating_add(1);
            state.last_error_at = Some(Instant::now());
            state.last_error_time = Some(Utc::now());
            if state.recovery_attempts >= state.policy.max_recovery_attempts {
                log_warn!(
                    "recovery attempts exhausted ({}); staying degraded until reset",
                    state.recovery_attempts
                );
            }
        }
        recovered
    }

    /// External reset back to normal (e.g. the user granted permission).
    pub fn reset(&self) {
        let mut state = self.lock();
        let policy = state.policy.clone();
        *state = DegradedModeState::new(policy);
        log_info!("degraded mode reset");
    }
}
