//! Storage for blacklist entries.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::models::{BanDuration, BlacklistEntry, ListKind, ListReason, NewBlacklistEntry};
use crate::error::StoreError;

/// Keyed lookup and lifecycle of ban records.
///
/// The gate only ever calls `find_active_entry`; creation and deactivation
/// belong to the admin subsystem, and `sweep_expired` to the maintenance task.
#[async_trait]
pub trait BlacklistStore: Send + Sync {
    async fn find_active_entry(
        &self,
        kind: ListKind,
        value: &str,
    ) -> Result<Option<BlacklistEntry>, StoreError>;

    /// Create an entry, or re-arm an existing one for the same (kind, value).
    async fn create_entry(&self, entry: NewBlacklistEntry) -> Result<Uuid, StoreError>;

    /// Returns `true` when an active entry was deactivated.
    async fn deactivate_entry(&self, kind: ListKind, value: &str) -> Result<bool, StoreError>;

    /// Flip `is_active` off for temporary entries past their expiry.
    /// Returns the number of entries deactivated.
    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// Postgres-backed blacklist store.
#[derive(Clone, Debug)]
pub struct PgBlacklistStore {
    pool: PgPool,
}

impl PgBlacklistStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BlacklistStore for PgBlacklistStore {
    async fn find_active_entry(
        &self,
        kind: ListKind,
        value: &str,
    ) -> Result<Option<BlacklistEntry>, StoreError> {
        let query = r"
            SELECT id, kind::text AS kind, value, reason::text AS reason,
                   duration::text AS duration, expires_at, is_active,
                   description, metadata, created_at
            FROM blacklist_entries
            WHERE kind = $1
              AND value = $2
              AND is_active = TRUE
            LIMIT 1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(kind.as_str())
            .bind(value)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to look up blacklist entry")?;

        Ok(row.map(|row| {
            let reason_text: String = row.get("reason");
            let duration_text: String = row.get("duration");
            let metadata: Option<serde_json::Value> = row.get("metadata");
            BlacklistEntry {
                id: row.get("id"),
                kind,
                value: row.get("value"),
                reason: ListReason::from_str(&reason_text).unwrap_or(ListReason::ManualReview),
                // Unknown duration text is read as permanent, the more
                // restrictive interpretation.
                duration: BanDuration::from_str(&duration_text).unwrap_or(BanDuration::Permanent),
                expires_at: row.get("expires_at"),
                is_active: row.get("is_active"),
                description: row.get("description"),
                metadata: metadata.unwrap_or(serde_json::Value::Null),
                created_at: row.get("created_at"),
            }
        }))
    }

    async fn create_entry(&self, entry: NewBlacklistEntry) -> Result<Uuid, StoreError> {
        let query = r"
            INSERT INTO blacklist_entries
                (id, kind, value, reason, duration, expires_at, description, metadata, is_active)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, TRUE)
            ON CONFLICT (kind, value) DO UPDATE
            SET reason = $4,
                duration = $5,
                expires_at = $6,
                description = $7,
                metadata = $8,
                is_active = TRUE,
                updated_at = NOW()
            RETURNING id
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(Uuid::new_v4())
            .bind(entry.kind.as_str())
            .bind(&entry.value)
            .bind(entry.reason.as_str())
            .bind(entry.duration.as_str())
            .bind(entry.expires_at)
            .bind(&entry.description)
            .bind(&entry.metadata)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("failed to insert blacklist entry")?;

        Ok(row.get("id"))
    }

    async fn deactivate_entry(&self, kind: ListKind, value: &str) -> Result<bool, StoreError> {
        let query = r"
            UPDATE blacklist_entries
            SET is_active = FALSE,
                updated_at = NOW()
            WHERE kind = $1
              AND value = $2
              AND is_active = TRUE
            RETURNING id
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(kind.as_str())
            .bind(value)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to deactivate blacklist entry")?;

        Ok(row.is_some())
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let query = r"
            UPDATE blacklist_entries
            SET is_active = FALSE,
                updated_at = NOW()
            WHERE is_active = TRUE
              AND duration = 'temporary'
              AND expires_at IS NOT NULL
              AND expires_at <= $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(now)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to sweep expired blacklist entries")?;

        Ok(result.rows_affected())
    }
}
