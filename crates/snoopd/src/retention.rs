//! Periodic retention: trims excess stored requests and rotates the log file
//! (spec §4.7 "A retention task runs on a schedule").

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use snoopd_store::Store;
use tracing::{debug, warn};

pub struct RetentionTask {
    pub store: Arc<Store>,
    pub log_file: PathBuf,
    pub max_stored_requests: u64,
    pub max_log_size: u64,
    pub poll_interval_ms: u64,
}

impl RetentionTask {
    pub async fn run(self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(Duration::from_millis(self.poll_interval_ms.max(100)));
        loop {
            tokio::select! {
                _ = interval.tick() => self.tick().await,
                _ = shutdown.changed() => break,
            }
        }
    }

    async fn tick(&self) {
        match self.store.trim(self.max_stored_requests).await {
            Ok(deleted) if deleted > 0 => debug!(deleted, "trimmed excess stored requests"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "retention trim failed"),
        }

        match snoopd_common::logging::rotate_if_needed(&self.log_file, self.max_log_size) {
            Ok(true) => debug!("rotated log file"),
            Ok(false) => {}
            Err(e) => warn!(error = %e, "log rotation check failed"),
        }
    }
}
