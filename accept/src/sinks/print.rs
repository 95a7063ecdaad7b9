use async_trait::async_trait;

use metrics::counter;
use tracing::info;

use crate::api::PublishError;
use crate::sinks::WindowSink;

pub struct PrintSink {}

#[async_trait]
impl WindowSink for PrintSink {
    async fn publish(&self, count: u64) -> Result<(), PublishError> {
        info!("window count: {}", count);
        counter!("accept_window_counts_printed_total").increment(1);

        Ok(())
    }
}
