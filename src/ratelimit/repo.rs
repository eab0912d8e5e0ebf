//! Storage for rate-limit counter records.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::models::OtpRateLimitRecord;
use crate::error::StoreError;
use crate::types::MfaMethod;

/// Keyed lookup and mutation of one counter record per (user, method) pair.
///
/// `atomic_increment` is the concurrency boundary: the decide-and-act step of
/// a reservation happens inside the store in a single statement, and callers
/// judge the returned post-increment count. A read-modify-write pair here
/// would re-open the over-admission race.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    async fn get_record(
        &self,
        user_id: Uuid,
        method: MfaMethod,
    ) -> Result<Option<OtpRateLimitRecord>, StoreError>;

    /// Upsert-and-increment the attempt count, returning the new count.
    /// Creates the record with a count of one when absent.
    async fn atomic_increment(&self, user_id: Uuid, method: MfaMethod)
        -> Result<i32, StoreError>;

    async fn set_blocked_until(
        &self,
        user_id: Uuid,
        method: MfaMethod,
        until: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Clear the record; invoked by verification flows on success.
    async fn reset(&self, user_id: Uuid, method: MfaMethod) -> Result<(), StoreError>;
}

/// Postgres-backed rate-limit store.
#[derive(Clone, Debug)]
pub struct PgRateLimitStore {
    pool: PgPool,
}

impl PgRateLimitStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RateLimitStore for PgRateLimitStore {
    async fn get_record(
        &self,
        user_id: Uuid,
        method: MfaMethod,
    ) -> Result<Option<OtpRateLimitRecord>, StoreError> {
        let query = r"
            SELECT attempt_count, last_attempt_at, blocked_until
            FROM otp_rate_limits
            WHERE user_id = $1
              AND mfa_method = $2
            LIMIT 1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(user_id)
            .bind(method.as_str())
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to load rate-limit record")?;

        Ok(row.map(|row| OtpRateLimitRecord {
            user_id,
            method,
            attempt_count: row.get("attempt_count"),
            last_attempt_at: row.get("last_attempt_at"),
            blocked_until: row.get("blocked_until"),
        }))
    }

    async fn atomic_increment(
        &self,
        user_id: Uuid,
        method: MfaMethod,
    ) -> Result<i32, StoreError> {
        let query = r"
            INSERT INTO otp_rate_limits
                (user_id, mfa_method, attempt_count, last_attempt_at)
            VALUES ($1, $2, 1, NOW())
            ON CONFLICT (user_id, mfa_method) DO UPDATE
            SET attempt_count = otp_rate_limits.attempt_count + 1,
                last_attempt_at = NOW()
            RETURNING attempt_count
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(user_id)
            .bind(method.as_str())
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("failed to reserve rate-limit attempt")?;

        Ok(row.get("attempt_count"))
    }

    async fn set_blocked_until(
        &self,
        user_id: Uuid,
        method: MfaMethod,
        until: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let query = r"
            INSERT INTO otp_rate_limits
                (user_id, mfa_method, attempt_count, last_attempt_at, blocked_until)
            VALUES ($1, $2, 0, NOW(), $3)
            ON CONFLICT (user_id, mfa_method) DO UPDATE
            SET blocked_until = $3
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(user_id)
            .bind(method.as_str())
            .bind(until)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to persist rate-limit block")?;

        Ok(())
    }

    async fn reset(&self, user_id: Uuid, method: MfaMethod) -> Result<(), StoreError> {
        let query = r"
            DELETE FROM otp_rate_limits
            WHERE user_id = $1
              AND mfa_method = $2
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(user_id)
            .bind(method.as_str())
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to reset rate-limit record")?;

        Ok(())
    }
}
