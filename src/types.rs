//! Shared context and decision types for the abuse-prevention gate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The second factor being exercised by a sensitive auth action.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MfaMethod {
    Email,
    Totp,
    Sms,
    BackupCode,
}

impl MfaMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Totp => "totp",
            Self::Sms => "sms",
            Self::BackupCode => "backup_code",
        }
    }

    #[must_use]
    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim() {
            "email" => Some(Self::Email),
            "totp" => Some(Self::Totp),
            "sms" => Some(Self::Sms),
            "backup_code" => Some(Self::BackupCode),
            _ => None,
        }
    }
}

/// Immutable per-request input for the gate.
///
/// Optional identity attributes default to absent; empty strings are
/// normalized to absent at construction so they can never match a blacklist
/// entry keyed on the empty string.
#[derive(Clone, Debug)]
pub struct RateLimitContext {
    user_id: Uuid,
    method: MfaMethod,
    session_token: Option<String>,
    recipient: Option<String>,
    ip_address: Option<String>,
    user_agent: Option<String>,
}

impl RateLimitContext {
    #[must_use]
    pub fn new(user_id: Uuid, method: MfaMethod) -> Self {
        Self {
            user_id,
            method,
            session_token: None,
            recipient: None,
            ip_address: None,
            user_agent: None,
        }
    }

    #[must_use]
    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = non_empty(token.into());
        self
    }

    #[must_use]
    pub fn with_recipient(mut self, recipient: impl Into<String>) -> Self {
        self.recipient = non_empty(recipient.into());
        self
    }

    #[must_use]
    pub fn with_ip_address(mut self, ip_address: impl Into<String>) -> Self {
        self.ip_address = non_empty(ip_address.into());
        self
    }

    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = non_empty(user_agent.into());
        self
    }

    #[must_use]
    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    #[must_use]
    pub fn method(&self) -> MfaMethod {
        self.method
    }

    #[must_use]
    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref()
    }

    #[must_use]
    pub fn recipient(&self) -> Option<&str> {
        self.recipient.as_deref()
    }

    #[must_use]
    pub fn ip_address(&self) -> Option<&str> {
        self.ip_address.as_deref()
    }

    #[must_use]
    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

/// The gate's decision for one attempt.
///
/// Denials carry a coarse wait estimate and a permanence flag; they never
/// reveal which signal (account, IP, user agent) produced them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub remaining_attempts: u32,
    pub is_permanently_blocked: bool,
    pub next_attempt_wait_minutes: Option<i64>,
    pub blocked_until: Option<DateTime<Utc>>,
}

impl RateLimitResult {
    #[must_use]
    pub fn allowed(remaining_attempts: u32) -> Self {
        Self {
            allowed: true,
            remaining_attempts,
            is_permanently_blocked: false,
            next_attempt_wait_minutes: None,
            blocked_until: None,
        }
    }

    #[must_use]
    pub fn denied(wait_minutes: i64, blocked_until: Option<DateTime<Utc>>) -> Self {
        Self {
            allowed: false,
            remaining_attempts: 0,
            is_permanently_blocked: false,
            next_attempt_wait_minutes: Some(wait_minutes),
            blocked_until,
        }
    }

    #[must_use]
    pub fn permanently_denied() -> Self {
        Self {
            allowed: false,
            remaining_attempts: 0,
            is_permanently_blocked: true,
            next_attempt_wait_minutes: None,
            blocked_until: None,
        }
    }
}

/// Whole minutes until `until`, rounded up, never less than one.
///
/// A deadline less than a minute away (or already past but still in force)
/// reports as "retry in a minute" rather than zero.
pub(crate) fn minutes_until_ceil(now: DateTime<Utc>, until: DateTime<Utc>) -> i64 {
    let seconds = (until - now).num_seconds();
    if seconds <= 0 {
        return 1;
    }
    (seconds + 59) / 60
}
