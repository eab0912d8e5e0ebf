//! Per-method OTP/MFA rate limiting with escalating lockout.
//!
//! Flow Overview:
//! 1) `evaluate` loads the (user, method) counter record and decides whether
//!    an attempt may proceed, persisting an escalating block when the budget
//!    is exhausted.
//! 2) `reserve` atomically increments the counter once both gates have
//!    allowed the attempt; the guard compares the returned count against the
//!    admit ceiling to detect lost races.
//! 3) `reset` clears the counter when the caller's verification succeeds.
//!
//! The count never decays by time alone. Serving out a block re-admits a
//! single attempt while the accumulated count stands, so every further
//! exhaustion blocks for longer (attempts x 15 minutes, capped at 24 hours).

pub mod models;
pub mod repo;

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::warn;
use uuid::Uuid;

use self::repo::RateLimitStore;
use crate::config::GuardConfig;
use crate::error::StoreError;
use crate::types::{minutes_until_ceil, MfaMethod, RateLimitContext, RateLimitResult};

/// An `evaluate` decision plus the reservation bound that goes with it.
#[derive(Clone, Debug)]
pub(crate) struct Evaluation {
    pub(crate) result: RateLimitResult,
    /// Highest post-increment count an immediate reservation may observe
    /// without having lost a race. Only meaningful when `result.allowed`.
    pub(crate) admit_ceiling: i32,
}

/// Enforces the attempt budget for one (user, method) pair.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    config: GuardConfig,
}

impl RateLimiter {
    #[must_use]
    pub fn new(store: Arc<dyn RateLimitStore>, config: GuardConfig) -> Self {
        Self { store, config }
    }

    /// Decide whether an attempt may proceed, without consuming a slot.
    ///
    /// Exhaustion persists `blocked_until` before denying; the recorded block
    /// is what subsequent calls report until it elapses. An elapsed block
    /// re-admits exactly one attempt; spending it without a successful
    /// verification triggers the next, longer block.
    ///
    /// # Errors
    /// Returns `StoreError` on lookup or block-persist failure.
    pub async fn evaluate(&self, ctx: &RateLimitContext) -> Result<RateLimitResult, StoreError> {
        Ok(self.evaluate_full(ctx).await?.result)
    }

    pub(crate) async fn evaluate_full(
        &self,
        ctx: &RateLimitContext,
    ) -> Result<Evaluation, StoreError> {
        let now = Utc::now();
        let max = self.config.max_attempts(ctx.method());

        let Some(record) = self.store.get_record(ctx.user_id(), ctx.method()).await? else {
            return Ok(Evaluation {
                result: RateLimitResult::allowed(max),
                admit_ceiling: i32::try_from(max).unwrap_or(i32::MAX),
            });
        };

        if let Some(blocked_until) = record.blocked_until {
            if blocked_until > now {
                return Ok(Evaluation {
                    result: RateLimitResult::denied(
                        minutes_until_ceil(now, blocked_until),
                        Some(blocked_until),
                    ),
                    admit_ceiling: 0,
                });
            }
            // The block has been served. One probe attempt is re-admitted;
            // the counter keeps accumulating so the next exhaustion blocks
            // for longer. `last_attempt_at` past the block deadline means the
            // probe was already spent.
            if record.last_attempt_at <= blocked_until {
                return Ok(Evaluation {
                    result: RateLimitResult::allowed(1),
                    admit_ceiling: record.attempt_count.saturating_add(1),
                });
            }
            let denial = self.apply_block(ctx, record.attempt_count).await?;
            return Ok(Evaluation {
                result: denial,
                admit_ceiling: 0,
            });
        }

        let used = u32::try_from(record.attempt_count).unwrap_or(0);
        let remaining = max.saturating_sub(used);
        if remaining == 0 {
            let denial = self.apply_block(ctx, record.attempt_count).await?;
            return Ok(Evaluation {
                result: denial,
                admit_ceiling: 0,
            });
        }

        Ok(Evaluation {
            result: RateLimitResult::allowed(remaining),
            admit_ceiling: i32::try_from(max).unwrap_or(i32::MAX),
        })
    }

    /// Atomically consume one attempt slot, returning the post-increment
    /// count.
    ///
    /// Must only be called after `evaluate` (and the blacklist gate) allowed
    /// the attempt. Two concurrent reservations are both counted; the caller
    /// judges the returned count against the evaluation's admit ceiling.
    ///
    /// # Errors
    /// Returns `StoreError` when the increment cannot be persisted.
    pub async fn reserve(&self, ctx: &RateLimitContext) -> Result<i32, StoreError> {
        self.store
            .atomic_increment(ctx.user_id(), ctx.method())
            .await
    }

    /// Clear the counter after a successful verification.
    ///
    /// # Errors
    /// Returns `StoreError` when the record cannot be cleared.
    pub async fn reset(&self, user_id: Uuid, method: MfaMethod) -> Result<(), StoreError> {
        self.store.reset(user_id, method).await
    }

    /// Persist an escalating block for the accumulated attempt count and
    /// return the matching denial.
    pub(crate) async fn apply_block(
        &self,
        ctx: &RateLimitContext,
        attempt_count: i32,
    ) -> Result<RateLimitResult, StoreError> {
        let now = Utc::now();
        let block_minutes = self.config.block_minutes_for(attempt_count);
        let blocked_until = now + Duration::minutes(block_minutes);
        self.store
            .set_blocked_until(ctx.user_id(), ctx.method(), blocked_until)
            .await?;
        warn!(
            user_id = %ctx.user_id(),
            method = ctx.method().as_str(),
            attempt_count,
            block_minutes,
            "attempt budget exhausted, escalating block recorded"
        );
        Ok(RateLimitResult::denied(block_minutes, Some(blocked_until)))
    }
}
