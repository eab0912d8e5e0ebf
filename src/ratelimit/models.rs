//! Per (user, method) attempt counter records.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::types::MfaMethod;

/// Attempt counter for one (user, MFA method) pair.
///
/// (user_id, method) is the natural key; at most one record exists per pair.
/// The count only moves up through atomic reservation and only returns to
/// zero through an explicit reset on successful verification.
#[derive(Clone, Debug)]
pub struct OtpRateLimitRecord {
    pub user_id: Uuid,
    pub method: MfaMethod,
    pub attempt_count: i32,
    pub last_attempt_at: DateTime<Utc>,
    pub blocked_until: Option<DateTime<Utc>>,
}

impl OtpRateLimitRecord {
    /// Whether an escalating block is still in force at `now`.
    #[must_use]
    pub fn is_blocked_at(&self, now: DateTime<Utc>) -> bool {
        self.blocked_until.is_some_and(|until| until > now)
    }
}
