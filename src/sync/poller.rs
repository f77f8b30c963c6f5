//! Background sync poller.
//!
//! Runs passes on the configured interval after a startup delay, and can
//! be woken early through a shared `Notify`. Pass failures are logged and
//! never end the loop; while sync is disabled or unconfigured the loop
//! just rechecks periodically.

use std::sync::Arc;

use tokio::sync::Notify;

use crate::error::SyncError;
use crate::sync::SyncEngine;

const STARTUP_DELAY_SECS: u64 = 60;
const DISABLED_RECHECK_SECS: u64 = 300;

pub async fn run_sync_poller(engine: Arc<SyncEngine>, wake: Arc<Notify>) {
    tokio::time::sleep(std::time::Duration::from_secs(STARTUP_DELAY_SECS)).await;

    loop {
        let settings = engine.settings().snapshot();

        if !settings.enabled || settings.api_key.is_none() {
            tokio::select! {
                _ = tokio::time::sleep(std::time::Duration::from_secs(DISABLED_RECHECK_SECS)) => {},
                _ = wake.notified() => {
                    log::info!("Sync poller: woken by sync signal (disabled path)");
                },
            }
            continue;
        }

        log::info!("Sync poller: starting pass");
        match engine.run_pass().await {
            Ok(report) => log::info!("Sync poller: {}", report.summary()),
            Err(SyncError::PassInProgress) => {
                log::debug!("Sync poller: a pass is already running")
            }
            Err(e) => log::warn!("Sync poller: pass failed: {}", e),
        }

        // Sleep until next poll or manual wake
        tokio::select! {
            _ = tokio::time::sleep(std::time::Duration::from_secs(
                settings.poll_interval_minutes * 60,
            )) => {},
            _ = wake.notified() => {
                log::info!("Sync poller: woken by manual sync signal");
            },
        }
    }
}
