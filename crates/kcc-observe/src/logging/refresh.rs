use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::logging::timezone::refresh_local_offset;

/// Default period between local offset refreshes.
pub const OFFSET_REFRESH_PERIOD: Duration = Duration::from_secs(3600);

/// Refresh the local offset every `period` until `lifetime` is cancelled.
pub fn spawn_offset_refresh(lifetime: CancellationToken, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = lifetime.cancelled() => break,
                _ = ticker.tick() => {
                    refresh_local_offset();
                }
            }
        }
        debug!("local offset refresh stopped");
    })
}
