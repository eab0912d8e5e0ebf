//! Gate configuration.

use std::time::Duration;

use crate::types::MfaMethod;

// Email OTP delivery failures are common; the email method gets a larger
// attempt budget than the stronger factors.
const DEFAULT_EMAIL_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BLOCK_STEP_MINUTES: i64 = 15;
const DEFAULT_BLOCK_CAP_MINUTES: i64 = 24 * 60;
const DEFAULT_STORE_TIMEOUT_MILLIS: u64 = 2_000;
const DEFAULT_STORE_FAULT_WAIT_MINUTES: i64 = 5;

const ENV_EMAIL_MAX_ATTEMPTS: &str = "AUTHGATE_EMAIL_MAX_ATTEMPTS";
const ENV_MAX_ATTEMPTS: &str = "AUTHGATE_MAX_ATTEMPTS";
const ENV_STORE_TIMEOUT_MILLIS: &str = "AUTHGATE_STORE_TIMEOUT_MS";

/// Attempt budgets, lockout escalation, and store deadlines.
#[derive(Clone, Debug)]
pub struct GuardConfig {
    email_max_attempts: u32,
    default_max_attempts: u32,
    block_step_minutes: i64,
    block_cap_minutes: i64,
    store_timeout: Duration,
    store_fault_wait_minutes: i64,
}

impl GuardConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            email_max_attempts: DEFAULT_EMAIL_MAX_ATTEMPTS,
            default_max_attempts: DEFAULT_MAX_ATTEMPTS,
            block_step_minutes: DEFAULT_BLOCK_STEP_MINUTES,
            block_cap_minutes: DEFAULT_BLOCK_CAP_MINUTES,
            store_timeout: Duration::from_millis(DEFAULT_STORE_TIMEOUT_MILLIS),
            store_fault_wait_minutes: DEFAULT_STORE_FAULT_WAIT_MINUTES,
        }
    }

    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset or unparsable.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::new();
        if let Some(value) = parse_u32_env(ENV_EMAIL_MAX_ATTEMPTS) {
            config.email_max_attempts = value;
        }
        if let Some(value) = parse_u32_env(ENV_MAX_ATTEMPTS) {
            config.default_max_attempts = value;
        }
        if let Some(value) = parse_u64_env(ENV_STORE_TIMEOUT_MILLIS) {
            config.store_timeout = Duration::from_millis(value);
        }
        config
    }

    #[must_use]
    pub fn with_email_max_attempts(mut self, attempts: u32) -> Self {
        self.email_max_attempts = attempts;
        self
    }

    #[must_use]
    pub fn with_default_max_attempts(mut self, attempts: u32) -> Self {
        self.default_max_attempts = attempts;
        self
    }

    #[must_use]
    pub fn with_block_step_minutes(mut self, minutes: i64) -> Self {
        self.block_step_minutes = minutes;
        self
    }

    #[must_use]
    pub fn with_block_cap_minutes(mut self, minutes: i64) -> Self {
        self.block_cap_minutes = minutes;
        self
    }

    #[must_use]
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_store_fault_wait_minutes(mut self, minutes: i64) -> Self {
        self.store_fault_wait_minutes = minutes;
        self
    }

    /// Attempt budget for one MFA method within a lockout window.
    #[must_use]
    pub fn max_attempts(&self, method: MfaMethod) -> u32 {
        match method {
            MfaMethod::Email => self.email_max_attempts,
            _ => self.default_max_attempts,
        }
    }

    /// Escalating block duration after exhausting the budget: grows with the
    /// accumulated attempt count, capped at a day.
    #[must_use]
    pub fn block_minutes_for(&self, attempt_count: i32) -> i64 {
        let attempts = i64::from(attempt_count.max(1));
        attempts
            .saturating_mul(self.block_step_minutes)
            .min(self.block_cap_minutes)
    }

    #[must_use]
    pub fn store_timeout(&self) -> Duration {
        self.store_timeout
    }

    #[must_use]
    pub fn store_fault_wait_minutes(&self) -> i64 {
        self.store_fault_wait_minutes
    }
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_u32_env(key: &str) -> Option<u32> {
    std::env::var(key).ok().and_then(|value| value.trim().parse().ok())
}

fn parse_u64_env(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|value| value.trim().parse().ok())
}
