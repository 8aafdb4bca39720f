/// Liveness prober
///
/// Every `interval` sends a ping frame to each registered channel. A channel that
/// does not answer with `received` inside the ack timeout is asked to terminate.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::metrics;
use crate::websocket::{CloseReason, ConnectionRegistry, PushFrame};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub probed: usize,
    pub failed: usize,
}

pub struct LivenessProber {
    registry: ConnectionRegistry,
    interval: Duration,
    ack_timeout: Duration,
}

impl LivenessProber {
    pub fn new(registry: ConnectionRegistry, interval: Duration, ack_timeout: Duration) -> Self {
        Self {
            registry,
            interval,
            ack_timeout,
        }
    }

    /// Sweep forever, until `shutdown` fires
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick completes immediately
        ticker.tick().await;

        tracing::info!(interval_secs = self.interval.as_secs(), "liveness prober started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let report = self.sweep().await;
                    if report.failed > 0 {
                        tracing::info!(
                            probed = report.probed,
                            failed = report.failed,
                            "liveness sweep found dead channels"
                        );
                    } else {
                        tracing::debug!(probed = report.probed, "liveness sweep complete");
                    }
                }
            }
        }

        tracing::info!("liveness prober stopped");
    }

    /// Probe every registered channel once, concurrently
    pub async fn sweep(&self) -> SweepReport {
        let frame = PushFrame::ping();
        let failed = AtomicUsize::new(0);

        let probed = self
            .registry
            .for_each(|entry| {
                let frame = &frame;
                let failed = &failed;
                async move {
                    if let Err(e) = entry.exchange(frame, self.ack_timeout).await {
                        tracing::warn!(
                            channel_id = %entry.id,
                            subject = %entry.owner.subject,
                            error = %e,
                            "liveness probe failed"
                        );
                        metrics::record_probe_failure();
                        failed.fetch_add(1, Ordering::Relaxed);
                        entry.terminate(CloseReason::LivenessFailure);
                    }
                }
            })
            .await;

        SweepReport {
            probed,
            failed: failed.load(Ordering::Relaxed),
        }
    }
}
