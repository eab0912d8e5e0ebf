//! Identity-class ban records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which identity attribute an entry bans.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListKind {
    Email,
    IpAddress,
    UserAgent,
    Phone,
    User,
}

impl ListKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::IpAddress => "ip_address",
            Self::UserAgent => "user_agent",
            Self::Phone => "phone",
            Self::User => "user",
        }
    }

    #[must_use]
    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim() {
            "email" => Some(Self::Email),
            "ip_address" => Some(Self::IpAddress),
            "user_agent" => Some(Self::UserAgent),
            "phone" => Some(Self::Phone),
            "user" => Some(Self::User),
            _ => None,
        }
    }
}

/// Why the entry was created.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListReason {
    CredentialStuffing,
    SpamComplaint,
    FraudSuspected,
    PolicyViolation,
    ManualReview,
}

impl ListReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CredentialStuffing => "credential_stuffing",
            Self::SpamComplaint => "spam_complaint",
            Self::FraudSuspected => "fraud_suspected",
            Self::PolicyViolation => "policy_violation",
            Self::ManualReview => "manual_review",
        }
    }

    #[must_use]
    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim() {
            "credential_stuffing" => Some(Self::CredentialStuffing),
            "spam_complaint" => Some(Self::SpamComplaint),
            "fraud_suspected" => Some(Self::FraudSuspected),
            "policy_violation" => Some(Self::PolicyViolation),
            "manual_review" => Some(Self::ManualReview),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BanDuration {
    Temporary,
    Permanent,
}

impl BanDuration {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Temporary => "temporary",
            Self::Permanent => "permanent",
        }
    }

    #[must_use]
    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim() {
            "temporary" => Some(Self::Temporary),
            "permanent" => Some(Self::Permanent),
            _ => None,
        }
    }
}

/// An administratively created ban on one identity attribute.
///
/// Entries are owned by the admin subsystem; the gate only reads them.
/// Temporary entries require `expires_at`; a permanent entry ignores it.
#[derive(Clone, Debug)]
pub struct BlacklistEntry {
    pub id: Uuid,
    pub kind: ListKind,
    pub value: String,
    pub reason: ListReason,
    pub duration: BanDuration,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub description: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl BlacklistEntry {
    /// Whether the entry is in force at `now`.
    ///
    /// A temporary entry past `expires_at` does not match even while a sweep
    /// has yet to flip `is_active`; the gate never depends on sweep timing.
    #[must_use]
    pub fn is_match_at(&self, now: DateTime<Utc>) -> bool {
        if !self.is_active {
            return false;
        }
        match self.duration {
            BanDuration::Permanent => true,
            BanDuration::Temporary => self.expires_at.is_some_and(|expires| expires > now),
        }
    }
}

/// Input for creating (or re-arming) a blacklist entry.
#[derive(Clone, Debug)]
pub struct NewBlacklistEntry {
    pub kind: ListKind,
    pub value: String,
    pub reason: ListReason,
    pub duration: BanDuration,
    pub expires_at: Option<DateTime<Utc>>,
    pub description: Option<String>,
    pub metadata: serde_json::Value,
}

impl NewBlacklistEntry {
    #[must_use]
    pub fn permanent(kind: ListKind, value: impl Into<String>, reason: ListReason) -> Self {
        Self {
            kind,
            value: value.into(),
            reason,
            duration: BanDuration::Permanent,
            expires_at: None,
            description: None,
            metadata: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub fn temporary(
        kind: ListKind,
        value: impl Into<String>,
        reason: ListReason,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            value: value.into(),
            reason,
            duration: BanDuration::Temporary,
            expires_at: Some(expires_at),
            description: None,
            metadata: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}
