use std::sync::Arc;
use std::time::Duration;

use health::HealthHandle;
use metrics::{counter, gauge};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::sinks::WindowSink;
use crate::window::WindowCounter;

/// Drains the window counter on a fixed cadence and hands each count to the
/// sink. One instance runs for the lifetime of the process.
pub struct WindowPublisher {
    counter: Arc<WindowCounter>,
    sink: Arc<dyn WindowSink + Send + Sync>,
    interval: Duration,
    liveness: HealthHandle,
}

impl WindowPublisher {
    pub fn new(
        counter: Arc<WindowCounter>,
        sink: Arc<dyn WindowSink + Send + Sync>,
        interval: Duration,
        liveness: HealthHandle,
    ) -> Self {
        Self {
            counter,
            sink,
            interval,
            liveness,
        }
    }

    /// Runs until `shutdown` is cancelled. The ticker is not reset by slow or
    /// failed publishes, so one bad cycle never shifts the next one.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.liveness.report_healthy();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("window publisher stopping");
                    return;
                }
                _ = ticker.tick() => {}
            }

            self.liveness.report_healthy();
            self.publish_window().await;
        }
    }

    /// Drains the current window and publishes its count. Errors are logged
    /// and dropped: the count of a failed cycle is lost.
    pub async fn publish_window(&self) -> u64 {
        let count = self.counter.drain();
        info!("unique requests in the last window: {}", count);
        gauge!("accept_window_unique_events").set(count as f64);

        match self.sink.publish(count).await {
            Ok(()) => {
                counter!("accept_window_publish_total", "outcome" => "ok").increment(1);
            }
            Err(err) => {
                counter!("accept_window_publish_total", "outcome" => "error").increment(1);
                error!("failed to publish window count {}: {}", count, err);
            }
        }
        count
    }
}
