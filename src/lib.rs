//! # Authgate (Authentication Abuse Prevention)
//!
//! `authgate` decides, for every sensitive authentication action in the
//! platform (sending an OTP, verifying a TOTP code, initiating account
//! recovery), whether the action may proceed. Two controls combine into one
//! decision:
//!
//! - **Identity blacklist**: administratively created bans on an account,
//!   email, IP address, or user agent. Permanent bans win over temporary
//!   ones; temporary bans expire lazily on lookup, never waiting for the
//!   background sweep.
//! - **Per-method rate limiting**: an attempt budget per (user, MFA method)
//!   pair (5 for email OTP, 3 for the stronger factors) with an escalating
//!   lockout of attempts x 15 minutes, capped at 24 hours. The counter only
//!   resets on successful verification, so repeated abuse gets progressively
//!   costlier.
//!
//! ## Usage
//!
//! Callers hold one [`AuthAttemptGuard`] and invoke
//! [`evaluate`](AuthAttemptGuard::evaluate) before doing any work; the result
//! is either an admission with the remaining budget, or a denial carrying a
//! coarse wait estimate and a permanence flag. On successful verification the
//! flow invokes [`reset`](AuthAttemptGuard::reset).
//!
//! ## Security boundaries
//!
//! - The blacklist check strictly precedes the rate-limit check; a banned
//!   identity is never told "rate limited".
//! - Attempt reservation is a single atomic store operation; concurrent
//!   requests cannot admit more attempts than the budget allows.
//! - Store failures fail closed: the caller sees an ordinary short-wait
//!   denial, the logs see the fault.
//! - Denials never reveal which signal (account, IP, user agent) fired.

pub mod blacklist;
pub mod config;
pub mod error;
pub mod guard;
pub mod memory;
pub mod ratelimit;
pub mod types;

pub use blacklist::models::{BanDuration, BlacklistEntry, ListKind, ListReason, NewBlacklistEntry};
pub use blacklist::repo::{BlacklistStore, PgBlacklistStore};
pub use blacklist::BlacklistGate;
pub use config::GuardConfig;
pub use error::StoreError;
pub use guard::AuthAttemptGuard;
pub use ratelimit::models::OtpRateLimitRecord;
pub use ratelimit::repo::{PgRateLimitStore, RateLimitStore};
pub use ratelimit::RateLimiter;
pub use types::{MfaMethod, RateLimitContext, RateLimitResult};
