//! Identity blacklist checks for sensitive auth actions.
//!
//! Flow Overview:
//! 1) Collect the context's identity attributes (account, recipient email,
//!    IP, user agent); absent attributes are skipped, never wildcarded.
//! 2) Look up an active entry per attribute.
//! 3) Apply precedence: any permanent match wins outright; among temporary
//!    matches the latest expiry determines the reported wait.
//!
//! The gate is read-only. Expired temporary entries are non-matches even
//! before the sweep task deactivates them.

pub mod models;
pub mod repo;
pub mod sweep;

use std::sync::Arc;

use chrono::{DateTime, Utc};

use self::models::{BanDuration, ListKind};
use self::repo::BlacklistStore;
use crate::error::StoreError;
use crate::types::{minutes_until_ceil, RateLimitContext, RateLimitResult};

/// Decides whether any identity attribute in a context is actively banned.
#[derive(Clone)]
pub struct BlacklistGate {
    store: Arc<dyn BlacklistStore>,
}

impl BlacklistGate {
    #[must_use]
    pub fn new(store: Arc<dyn BlacklistStore>) -> Self {
        Self { store }
    }

    /// Returns the denial for the most restrictive matching entry, or `None`
    /// when the context is clean.
    ///
    /// # Errors
    /// Returns `StoreError` on lookup failure; the guard fails closed on it.
    pub async fn check(
        &self,
        ctx: &RateLimitContext,
    ) -> Result<Option<RateLimitResult>, StoreError> {
        let now = Utc::now();
        let user_value = ctx.user_id().to_string();

        let mut lookups: Vec<(ListKind, &str)> = vec![(ListKind::User, user_value.as_str())];
        if let Some(recipient) = ctx.recipient() {
            lookups.push((ListKind::Email, recipient));
        }
        if let Some(ip) = ctx.ip_address() {
            lookups.push((ListKind::IpAddress, ip));
        }
        if let Some(agent) = ctx.user_agent() {
            lookups.push((ListKind::UserAgent, agent));
        }

        let mut latest_temporary: Option<DateTime<Utc>> = None;
        for (kind, value) in lookups {
            // The context normalizes empty attributes away, but entries are
            // admin-supplied; an empty key must never ban everyone.
            if value.is_empty() {
                continue;
            }
            let Some(entry) = self.store.find_active_entry(kind, value).await? else {
                continue;
            };
            if !entry.is_match_at(now) {
                continue;
            }
            match entry.duration {
                BanDuration::Permanent => {
                    tracing::warn!(
                        user_id = %ctx.user_id(),
                        kind = kind.as_str(),
                        "permanent blacklist match"
                    );
                    return Ok(Some(RateLimitResult::permanently_denied()));
                }
                BanDuration::Temporary => {
                    let expires = entry.expires_at.unwrap_or(now);
                    if latest_temporary.map_or(true, |current| expires > current) {
                        latest_temporary = Some(expires);
                    }
                }
            }
        }

        Ok(latest_temporary.map(|until| {
            tracing::warn!(user_id = %ctx.user_id(), "temporary blacklist match");
            RateLimitResult::denied(minutes_until_ceil(now, until), Some(until))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBlacklistStore;
    use crate::types::MfaMethod;
    use anyhow::Result;
    use chrono::Duration;
    use super::models::{ListReason, NewBlacklistEntry};
    use uuid::Uuid;

    fn gate_with(store: MemoryBlacklistStore) -> BlacklistGate {
        BlacklistGate::new(Arc::new(store))
    }

    fn ctx() -> RateLimitContext {
        RateLimitContext::new(Uuid::new_v4(), MfaMethod::Totp)
            .with_ip_address("203.0.113.5")
            .with_user_agent("curl/8.0")
            .with_recipient("user@example.com")
    }

    #[tokio::test]
    async fn clean_context_passes() -> Result<()> {
        let gate = gate_with(MemoryBlacklistStore::new());
        assert_eq!(gate.check(&ctx()).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn temporary_ip_ban_reports_wait() -> Result<()> {
        let store = MemoryBlacklistStore::new();
        store
            .create_entry(NewBlacklistEntry::temporary(
                ListKind::IpAddress,
                "203.0.113.5",
                ListReason::CredentialStuffing,
                Utc::now() + Duration::minutes(10),
            ))
            .await?;

        let gate = gate_with(store);
        let denial = gate.check(&ctx()).await?.expect("should match");
        assert!(!denial.allowed);
        assert!(!denial.is_permanently_blocked);
        assert_eq!(denial.remaining_attempts, 0);
        assert_eq!(denial.next_attempt_wait_minutes, Some(10));
        Ok(())
    }

    #[tokio::test]
    async fn permanent_match_wins_over_temporary() -> Result<()> {
        let store = MemoryBlacklistStore::new();
        store
            .create_entry(NewBlacklistEntry::temporary(
                ListKind::IpAddress,
                "203.0.113.5",
                ListReason::CredentialStuffing,
                Utc::now() + Duration::hours(6),
            ))
            .await?;
        // The permanent entry sits on a later lookup key; order must not
        // matter.
        store
            .create_entry(NewBlacklistEntry::permanent(
                ListKind::UserAgent,
                "curl/8.0",
                ListReason::PolicyViolation,
            ))
            .await?;

        let gate = gate_with(store);
        let denial = gate.check(&ctx()).await?.expect("should match");
        assert!(denial.is_permanently_blocked);
        assert_eq!(denial.next_attempt_wait_minutes, None);
        Ok(())
    }

    #[tokio::test]
    async fn latest_expiry_wins_among_temporaries() -> Result<()> {
        let store = MemoryBlacklistStore::new();
        store
            .create_entry(NewBlacklistEntry::temporary(
                ListKind::IpAddress,
                "203.0.113.5",
                ListReason::CredentialStuffing,
                Utc::now() + Duration::minutes(10),
            ))
            .await?;
        store
            .create_entry(NewBlacklistEntry::temporary(
                ListKind::Email,
                "user@example.com",
                ListReason::SpamComplaint,
                Utc::now() + Duration::minutes(30),
            ))
            .await?;

        let gate = gate_with(store);
        let denial = gate.check(&ctx()).await?.expect("should match");
        assert_eq!(denial.next_attempt_wait_minutes, Some(30));
        Ok(())
    }

    #[tokio::test]
    async fn expired_but_unswept_entry_is_not_a_match() -> Result<()> {
        let store = MemoryBlacklistStore::new();
        store
            .create_entry(NewBlacklistEntry::temporary(
                ListKind::IpAddress,
                "203.0.113.5",
                ListReason::CredentialStuffing,
                Utc::now() - Duration::minutes(1),
            ))
            .await?;

        let gate = gate_with(store);
        assert_eq!(gate.check(&ctx()).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn empty_valued_entry_never_matches_absent_attributes() -> Result<()> {
        let store = MemoryBlacklistStore::new();
        // An accidental "deny everyone" entry keyed on the empty string.
        store
            .create_entry(NewBlacklistEntry::permanent(
                ListKind::IpAddress,
                "",
                ListReason::ManualReview,
            ))
            .await?;

        let gate = gate_with(store);
        let bare = RateLimitContext::new(Uuid::new_v4(), MfaMethod::Totp);
        assert_eq!(gate.check(&bare).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn deactivated_entry_is_not_a_match() -> Result<()> {
        let store = MemoryBlacklistStore::new();
        store
            .create_entry(NewBlacklistEntry::permanent(
                ListKind::Email,
                "user@example.com",
                ListReason::FraudSuspected,
            ))
            .await?;
        assert!(
            store
                .deactivate_entry(ListKind::Email, "user@example.com")
                .await?
        );

        let gate = gate_with(store);
        assert_eq!(gate.check(&ctx()).await?, None);
        Ok(())
    }
}
