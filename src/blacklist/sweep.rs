//! Periodic deactivation of expired temporary blacklist entries.
//!
//! Housekeeping only: the gate applies lazy expiry on every lookup, so
//! decisions never depend on the sweep having run. The sweep keeps the
//! active set small for the admin views.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::interval;
use tracing::{debug, error, info};

use super::repo::BlacklistStore;

/// Spawn the detached sweep loop. Returns the task handle so a host can
/// abort it on shutdown.
pub fn spawn_sweeper(
    store: Arc<dyn BlacklistStore>,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(every);
        loop {
            tick.tick().await;
            match store.sweep_expired(Utc::now()).await {
                Ok(0) => debug!("no expired blacklist entries"),
                Ok(count) => info!(count, "deactivated expired blacklist entries"),
                Err(err) => error!(error = %err, "blacklist sweep failed"),
            }
        }
    })
}
