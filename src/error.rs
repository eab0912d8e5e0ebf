//! Error taxonomy for the gate.
//!
//! Policy denials and permanent blocks are ordinary `RateLimitResult` values,
//! not errors. The only error path is infrastructure failure while talking to
//! a store; `AuthAttemptGuard` logs it and collapses it into a fail-closed
//! denial before the caller sees anything.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(#[from] anyhow::Error),
    #[error("store operation timed out")]
    Timeout,
}
