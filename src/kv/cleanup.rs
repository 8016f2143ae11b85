//! Scheduled reclamation of expired entries.

use std::time::Duration;

use tracing::{error, info};

use super::Kv;

/// Interval between cleanup runs.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60); // 1 hour

/// Run one cleanup pass over the cache and the store.
pub async fn run_cleanup(cache: &Kv, store: &Kv) {
    match cache.cleanup_expired().await {
        Ok(count) if count > 0 => info!("Cleaned up {} expired cache entries", count),
        Ok(_) => {}
        Err(e) => error!("Failed to clean up cache entries: {}", e),
    }

    match store.cleanup_expired().await {
        Ok(count) if count > 0 => info!("Cleaned up {} expired store entries", count),
        Ok(_) => {}
        Err(e) => error!("Failed to clean up store entries: {}", e),
    }
}

/// Spawn a background task that runs cleanup periodically.
/// Returns a handle that can be used to abort the task.
pub fn spawn_cleanup_scheduler(cache: Kv, store: Kv) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CLEANUP_INTERVAL);

        loop {
            interval.tick().await;
            run_cleanup(&cache, &store).await;
        }
    })
}
