use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::error::Result;
use crate::ledger::Ledger;

/// Compact once more than `threshold` events were appended since the last
/// rewrite. Returns whether a compaction ran.
pub async fn compact_if_due(ledger: &Ledger, threshold: u64) -> Result<bool> {
    let appends = ledger.appends_since_compact().await?;
    if appends <= threshold {
        return Ok(false);
    }
    ledger.compact().await?;
    info!(appends, "compaction threshold reached");
    Ok(true)
}

/// Background task that periodically rewrites the WAL.
pub async fn run_compactor(ledger: Arc<Ledger>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.tick().await;
    loop {
        interval.tick().await;
        if let Err(e) = compact_if_due(&ledger, threshold).await {
            tracing::warn!("compaction skipped: {e}");
        }
    }
}
