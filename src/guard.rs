//! Single entry point combining the blacklist gate and the rate limiter.
//!
//! Flow Overview:
//! 1) Blacklist check: a banned identity short-circuits everything and is
//!    reported as a ban, never as "rate limited".
//! 2) Rate-limit check: remaining budget, or an escalating lockout.
//! 3) Atomic reservation of the attempt slot; a lost race is converted into
//!    the same lockout the next evaluate would compute.
//!
//! Ordering is a policy requirement, not an optimization. Every store
//! interaction runs under a short deadline, and any infrastructure fault is
//! logged then collapsed into a generic short-wait denial: the caller cannot
//! tell a fault from a policy denial, and a fault can never produce "allowed".

use std::future::Future;
use std::sync::Arc;

use tracing::{error, warn};
use uuid::Uuid;

use crate::blacklist::repo::BlacklistStore;
use crate::blacklist::BlacklistGate;
use crate::config::GuardConfig;
use crate::error::StoreError;
use crate::ratelimit::repo::RateLimitStore;
use crate::ratelimit::RateLimiter;
use crate::types::{MfaMethod, RateLimitContext, RateLimitResult};

/// Decides, for every sensitive auth action, whether the attempt may proceed.
///
/// OTP send, TOTP verify, and recovery flows call [`evaluate`] before doing
/// any work, and [`reset`] once a verification succeeds.
///
/// [`evaluate`]: AuthAttemptGuard::evaluate
/// [`reset`]: AuthAttemptGuard::reset
#[derive(Clone)]
pub struct AuthAttemptGuard {
    blacklist: BlacklistGate,
    limiter: RateLimiter,
    config: GuardConfig,
}

impl AuthAttemptGuard {
    #[must_use]
    pub fn new(
        blacklist_store: Arc<dyn BlacklistStore>,
        rate_limit_store: Arc<dyn RateLimitStore>,
        config: GuardConfig,
    ) -> Self {
        Self {
            blacklist: BlacklistGate::new(blacklist_store),
            limiter: RateLimiter::new(rate_limit_store, config.clone()),
            config,
        }
    }

    /// Evaluate one attempt: blacklist, then rate limit, then reservation.
    ///
    /// Infallible from the caller's perspective; store faults fail closed as
    /// a short-wait denial.
    pub async fn evaluate(&self, ctx: &RateLimitContext) -> RateLimitResult {
        match self.try_evaluate(ctx).await {
            Ok(result) => result,
            Err(err) => {
                error!(
                    user_id = %ctx.user_id(),
                    method = ctx.method().as_str(),
                    error = %err,
                    "store fault during attempt evaluation, failing closed"
                );
                RateLimitResult::denied(self.config.store_fault_wait_minutes(), None)
            }
        }
    }

    async fn try_evaluate(&self, ctx: &RateLimitContext) -> Result<RateLimitResult, StoreError> {
        let deadline = self.config.store_timeout();

        if let Some(denial) = with_deadline(deadline, self.blacklist.check(ctx)).await? {
            return Ok(denial);
        }

        let evaluation = with_deadline(deadline, self.limiter.evaluate_full(ctx)).await?;
        if !evaluation.result.allowed {
            return Ok(evaluation.result);
        }

        // The reservation runs as its own task: if the caller's request is
        // cancelled mid-flight the write still lands, otherwise abandoned
        // reservations would undercount attempts.
        let limiter = self.limiter.clone();
        let reserve_ctx = ctx.clone();
        let reservation =
            tokio::spawn(async move { limiter.reserve(&reserve_ctx).await });
        let count = match tokio::time::timeout(deadline, reservation).await {
            Err(_elapsed) => return Err(StoreError::Timeout),
            Ok(Err(join_err)) => {
                return Err(StoreError::Unavailable(anyhow::anyhow!(
                    "reservation task failed: {join_err}"
                )))
            }
            Ok(Ok(count)) => count?,
        };

        if count > evaluation.admit_ceiling {
            // A concurrent request took the last slot between our check and
            // the increment. Deny this one exactly as the next evaluate
            // would, with the block persisted now.
            warn!(
                user_id = %ctx.user_id(),
                method = ctx.method().as_str(),
                count,
                ceiling = evaluation.admit_ceiling,
                "reservation lost the last attempt slot"
            );
            return with_deadline(deadline, self.limiter.apply_block(ctx, count)).await;
        }

        Ok(RateLimitResult::allowed(evaluation.result.remaining_attempts))
    }

    /// Clear the rate-limit counter after a successful verification.
    ///
    /// # Errors
    /// Returns `StoreError` when the record cannot be cleared; callers should
    /// log and continue, a stale counter only errs toward caution.
    pub async fn reset(&self, user_id: Uuid, method: MfaMethod) -> Result<(), StoreError> {
        self.limiter.reset(user_id, method).await
    }
}

async fn with_deadline<T>(
    deadline: std::time::Duration,
    fut: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, StoreError> {
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_elapsed) => Err(StoreError::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blacklist::models::{
        BlacklistEntry, ListKind, ListReason, NewBlacklistEntry,
    };
    use crate::memory::{MemoryBlacklistStore, MemoryRateLimitStore};
    use crate::ratelimit::models::OtpRateLimitRecord;
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration as ChronoDuration, Utc};

    fn guard() -> (
        Arc<MemoryBlacklistStore>,
        Arc<MemoryRateLimitStore>,
        AuthAttemptGuard,
    ) {
        let blacklist = Arc::new(MemoryBlacklistStore::new());
        let limits = Arc::new(MemoryRateLimitStore::new());
        let guard = AuthAttemptGuard::new(blacklist.clone(), limits.clone(), GuardConfig::new());
        (blacklist, limits, guard)
    }

    fn ctx(method: MfaMethod) -> RateLimitContext {
        RateLimitContext::new(Uuid::new_v4(), method)
            .with_ip_address("203.0.113.5")
            .with_user_agent("integration-suite/1.0")
            .with_recipient("user@example.com")
    }

    #[tokio::test]
    async fn clean_context_is_allowed_and_counted() -> Result<()> {
        let (_blacklist, limits, guard) = guard();
        let ctx = ctx(MfaMethod::Email);

        let decision = guard.evaluate(&ctx).await;
        assert!(decision.allowed);
        assert_eq!(decision.remaining_attempts, 5);

        let record = limits
            .get_record(ctx.user_id(), ctx.method())
            .await?
            .expect("reservation recorded");
        assert_eq!(record.attempt_count, 1);
        Ok(())
    }

    #[tokio::test]
    async fn blacklist_denial_takes_precedence_over_rate_limit() -> Result<()> {
        let (blacklist, limits, guard) = guard();
        let ctx = ctx(MfaMethod::Totp);

        // Rate limit would allow; the ban must win and be reported as a ban.
        blacklist
            .create_entry(NewBlacklistEntry::permanent(
                ListKind::IpAddress,
                "203.0.113.5",
                ListReason::CredentialStuffing,
            ))
            .await?;

        let decision = guard.evaluate(&ctx).await;
        assert!(!decision.allowed);
        assert!(decision.is_permanently_blocked);

        // A blacklisted attempt consumes nothing.
        assert!(limits.get_record(ctx.user_id(), ctx.method()).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn permanent_ban_wins_even_when_rate_limited() -> Result<()> {
        let (blacklist, limits, guard) = guard();
        let ctx = ctx(MfaMethod::Totp);

        blacklist
            .create_entry(NewBlacklistEntry::permanent(
                ListKind::Email,
                "user@example.com",
                ListReason::FraudSuspected,
            ))
            .await?;
        limits
            .put_record(OtpRateLimitRecord {
                user_id: ctx.user_id(),
                method: ctx.method(),
                attempt_count: 99,
                last_attempt_at: Utc::now(),
                blocked_until: Some(Utc::now() + ChronoDuration::hours(12)),
            })
            .await;

        let decision = guard.evaluate(&ctx).await;
        assert!(decision.is_permanently_blocked);
        assert_eq!(decision.next_attempt_wait_minutes, None);
        Ok(())
    }

    #[tokio::test]
    async fn sixth_email_attempt_is_blocked_for_75_minutes() {
        let (_blacklist, _limits, guard) = guard();
        let ctx = ctx(MfaMethod::Email);

        for attempt in 1..=5 {
            let decision = guard.evaluate(&ctx).await;
            assert!(decision.allowed, "attempt {attempt} should pass");
        }

        let denied = guard.evaluate(&ctx).await;
        assert!(!denied.allowed);
        assert!(!denied.is_permanently_blocked);
        assert_eq!(denied.next_attempt_wait_minutes, Some(75));
    }

    #[tokio::test]
    async fn expired_unswept_ip_ban_falls_through_to_rate_limiter() -> Result<()> {
        let (blacklist, _limits, guard) = guard();
        let ctx = ctx(MfaMethod::Totp);

        blacklist
            .create_entry(NewBlacklistEntry::temporary(
                ListKind::IpAddress,
                "203.0.113.5",
                ListReason::CredentialStuffing,
                Utc::now() - ChronoDuration::minutes(1),
            ))
            .await?;

        let decision = guard.evaluate(&ctx).await;
        assert!(decision.allowed);
        assert_eq!(decision.remaining_attempts, 3);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_requests_cannot_overrun_the_budget() -> Result<()> {
        let (_blacklist, limits, guard) = guard();
        let ctx = ctx(MfaMethod::Totp);

        // One slot left out of three.
        limits
            .put_record(OtpRateLimitRecord {
                user_id: ctx.user_id(),
                method: ctx.method(),
                attempt_count: 2,
                last_attempt_at: Utc::now(),
                blocked_until: None,
            })
            .await;

        let first = {
            let guard = guard.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move { guard.evaluate(&ctx).await })
        };
        let second = {
            let guard = guard.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move { guard.evaluate(&ctx).await })
        };

        let outcomes = [first.await?, second.await?];
        let admitted = outcomes.iter().filter(|decision| decision.allowed).count();
        assert_eq!(admitted, 1, "exactly one request may take the last slot");
        Ok(())
    }

    #[tokio::test]
    async fn reset_restores_the_full_budget() -> Result<()> {
        let (_blacklist, _limits, guard) = guard();
        let ctx = ctx(MfaMethod::Sms);

        for _ in 0..3 {
            guard.evaluate(&ctx).await;
        }
        assert!(!guard.evaluate(&ctx).await.allowed);

        guard.reset(ctx.user_id(), ctx.method()).await?;
        let decision = guard.evaluate(&ctx).await;
        assert!(decision.allowed);
        assert_eq!(decision.remaining_attempts, 3);
        Ok(())
    }

    struct FailingBlacklistStore;

    #[async_trait]
    impl BlacklistStore for FailingBlacklistStore {
        async fn find_active_entry(
            &self,
            _kind: ListKind,
            _value: &str,
        ) -> Result<Option<BlacklistEntry>, StoreError> {
            Err(StoreError::Unavailable(anyhow::anyhow!(
                "connection refused"
            )))
        }

        async fn create_entry(&self, _entry: NewBlacklistEntry) -> Result<Uuid, StoreError> {
            Err(StoreError::Unavailable(anyhow::anyhow!(
                "connection refused"
            )))
        }

        async fn deactivate_entry(
            &self,
            _kind: ListKind,
            _value: &str,
        ) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable(anyhow::anyhow!(
                "connection refused"
            )))
        }

        async fn sweep_expired(&self, _now: DateTime<Utc>) -> Result<u64, StoreError> {
            Err(StoreError::Unavailable(anyhow::anyhow!(
                "connection refused"
            )))
        }
    }

    struct StalledBlacklistStore;

    #[async_trait]
    impl BlacklistStore for StalledBlacklistStore {
        async fn find_active_entry(
            &self,
            _kind: ListKind,
            _value: &str,
        ) -> Result<Option<BlacklistEntry>, StoreError> {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            Ok(None)
        }

        async fn create_entry(&self, _entry: NewBlacklistEntry) -> Result<Uuid, StoreError> {
            Ok(Uuid::new_v4())
        }

        async fn deactivate_entry(
            &self,
            _kind: ListKind,
            _value: &str,
        ) -> Result<bool, StoreError> {
            Ok(false)
        }

        async fn sweep_expired(&self, _now: DateTime<Utc>) -> Result<u64, StoreError> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn store_fault_fails_closed() {
        let limits = Arc::new(MemoryRateLimitStore::new());
        let guard = AuthAttemptGuard::new(
            Arc::new(FailingBlacklistStore),
            limits,
            GuardConfig::new().with_store_fault_wait_minutes(5),
        );

        let decision = guard.evaluate(&ctx(MfaMethod::Email)).await;
        assert!(!decision.allowed);
        assert!(!decision.is_permanently_blocked);
        assert_eq!(decision.next_attempt_wait_minutes, Some(5));
    }

    #[tokio::test]
    async fn stalled_store_fails_closed_within_the_deadline() {
        let limits = Arc::new(MemoryRateLimitStore::new());
        let guard = AuthAttemptGuard::new(
            Arc::new(StalledBlacklistStore),
            limits,
            GuardConfig::new()
                .with_store_timeout(std::time::Duration::from_millis(50))
                .with_store_fault_wait_minutes(5),
        );

        let started = std::time::Instant::now();
        let decision = guard.evaluate(&ctx(MfaMethod::Email)).await;
        assert!(!decision.allowed);
        assert_eq!(decision.next_attempt_wait_minutes, Some(5));
        assert!(started.elapsed() < std::time::Duration::from_secs(10));
    }
}
