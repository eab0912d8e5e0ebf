//! In-process store implementations.
//!
//! Back the gate with plain maps behind an async mutex: every unit test runs
//! against these, and a single-node deployment can embed them when a shared
//! database is not warranted. Increments happen under the lock, so the
//! reservation step is atomic by construction.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::blacklist::models::{BanDuration, BlacklistEntry, ListKind, NewBlacklistEntry};
use crate::blacklist::repo::BlacklistStore;
use crate::error::StoreError;
use crate::ratelimit::models::OtpRateLimitRecord;
use crate::ratelimit::repo::RateLimitStore;
use crate::types::MfaMethod;

/// Map-backed blacklist store.
#[derive(Debug, Default)]
pub struct MemoryBlacklistStore {
    entries: Mutex<HashMap<(ListKind, String), BlacklistEntry>>,
}

impl MemoryBlacklistStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlacklistStore for MemoryBlacklistStore {
    async fn find_active_entry(
        &self,
        kind: ListKind,
        value: &str,
    ) -> Result<Option<BlacklistEntry>, StoreError> {
        let entries = self.entries.lock().await;
        Ok(entries
            .get(&(kind, value.to_string()))
            .filter(|entry| entry.is_active)
            .cloned())
    }

    async fn create_entry(&self, entry: NewBlacklistEntry) -> Result<Uuid, StoreError> {
        let mut entries = self.entries.lock().await;
        let key = (entry.kind, entry.value.clone());
        // Re-arming an existing (kind, value) keeps its id, like the
        // database upsert.
        let id = entries.get(&key).map_or_else(Uuid::new_v4, |existing| existing.id);
        entries.insert(
            key,
            BlacklistEntry {
                id,
                kind: entry.kind,
                value: entry.value,
                reason: entry.reason,
                duration: entry.duration,
                expires_at: entry.expires_at,
                is_active: true,
                description: entry.description,
                metadata: entry.metadata,
                created_at: Utc::now(),
            },
        );
        Ok(id)
    }

    async fn deactivate_entry(&self, kind: ListKind, value: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().await;
        match entries.get_mut(&(kind, value.to_string())) {
            Some(entry) if entry.is_active => {
                entry.is_active = false;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut entries = self.entries.lock().await;
        let mut swept = 0;
        for entry in entries.values_mut() {
            if entry.is_active
                && entry.duration == BanDuration::Temporary
                && entry.expires_at.is_some_and(|expires| expires <= now)
            {
                entry.is_active = false;
                swept += 1;
            }
        }
        Ok(swept)
    }
}

/// Map-backed rate-limit store.
#[derive(Debug, Default)]
pub struct MemoryRateLimitStore {
    records: Mutex<HashMap<(Uuid, MfaMethod), OtpRateLimitRecord>>,
}

impl MemoryRateLimitStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a record verbatim; test scaffolding for simulating elapsed
    /// windows without waiting on wall-clock time.
    pub async fn put_record(&self, record: OtpRateLimitRecord) {
        let mut records = self.records.lock().await;
        records.insert((record.user_id, record.method), record);
    }
}

#[async_trait]
impl RateLimitStore for MemoryRateLimitStore {
    async fn get_record(
        &self,
        user_id: Uuid,
        method: MfaMethod,
    ) -> Result<Option<OtpRateLimitRecord>, StoreError> {
        let records = self.records.lock().await;
        Ok(records.get(&(user_id, method)).cloned())
    }

    async fn atomic_increment(
        &self,
        user_id: Uuid,
        method: MfaMethod,
    ) -> Result<i32, StoreError> {
        let mut records = self.records.lock().await;
        let record = records
            .entry((user_id, method))
            .and_modify(|record| {
                record.attempt_count = record.attempt_count.saturating_add(1);
                record.last_attempt_at = Utc::now();
            })
            .or_insert_with(|| OtpRateLimitRecord {
                user_id,
                method,
                attempt_count: 1,
                last_attempt_at: Utc::now(),
                blocked_until: None,
            });
        Ok(record.attempt_count)
    }

    async fn set_blocked_until(
        &self,
        user_id: Uuid,
        method: MfaMethod,
        until: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        records
            .entry((user_id, method))
            .and_modify(|record| record.blocked_until = Some(until))
            .or_insert_with(|| OtpRateLimitRecord {
                user_id,
                method,
                attempt_count: 0,
                last_attempt_at: Utc::now(),
                blocked_until: Some(until),
            });
        Ok(())
    }

    async fn reset(&self, user_id: Uuid, method: MfaMethod) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        records.remove(&(user_id, method));
        Ok(())
    }
}
