use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::IntervalStream;
use tokio_util::sync::CancellationToken;

use crate::cnf::LIVE_QUERY_GC_INTERVAL_SECS;
use crate::live::LiveQueryRegistry;

/// The default interval between garbage collection runs
pub fn default_gc_interval() -> Duration {
	Duration::from_secs(*LIVE_QUERY_GC_INTERVAL_SECS)
}

/// Spawns a background task which periodically removes stale live
/// queries, until the canceller is triggered.
pub fn spawn_gc(
	registry: Arc<LiveQueryRegistry>,
	delay: Duration,
	canceller: CancellationToken,
) -> JoinHandle<()> {
	tokio::spawn(async move {
		// Log the interval frequency
		trace!("Removing stale live queries every {delay:?}");
		// Create a new time-based interval ticket
		let mut ticker = interval_ticker(delay).await;
		// Loop continuously until the task is cancelled
		loop {
			tokio::select! {
				biased;
				// Check if this has shutdown
				_ = canceller.cancelled() => break,
				// Receive a notification on the channel
				Some(_) = ticker.next() => {
					if let Err(e) = registry.run_gc().await {
						error!("Error removing stale live queries: {e}");
					}
				}
			}
		}
		trace!("Background task exited: Removing stale live queries");
	})
}

async fn interval_ticker(interval: Duration) -> IntervalStream {
	// Create a new interval timer
	let mut interval = tokio::time::interval(interval);
	// Don't bombard the storage if we miss some ticks
	interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
	interval.tick().await;
	IntervalStream::new(interval)
}
