use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;
use crate::store::WalStore;

const REAP_INTERVAL: Duration = Duration::from_secs(5);
const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that periodically cancels PENDING bookings whose payment
/// window has lapsed.
pub async fn run_reaper(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(REAP_INTERVAL);
    loop {
        interval.tick().await;
        reap_once(&engine).await;
    }
}

/// One expiry sweep. Returns how many bookings were cancelled.
pub async fn reap_once(engine: &Engine) -> usize {
    let stale = match engine.stale_pending().await {
        Ok(stale) => stale,
        Err(e) => {
            tracing::error!("reaper scan failed: {e}");
            return 0;
        }
    };

    let mut expired = 0;
    for booking in stale {
        match engine.expire_unpaid(booking.id).await {
            Ok(_) => {
                info!("expired unpaid booking {}", booking.id);
                expired += 1;
            }
            Err(e) => {
                // Paid or cancelled since the scan
                tracing::debug!("reaper skip {}: {e}", booking.id);
            }
        }
    }
    expired
}

/// Background task that rewrites the WAL once enough appends pile up.
pub async fn run_compactor(store: Arc<WalStore>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACT_CHECK_INTERVAL);
    loop {
        interval.tick().await;
        let appends = store.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match store.compact().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => tracing::error!("WAL compaction failed: {e}"),
        }
    }
}
