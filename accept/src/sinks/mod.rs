use async_trait::async_trait;

use crate::api::PublishError;

pub mod kafka;
pub mod print;

/// Destination of the per-window unique event counts.
#[async_trait]
pub trait WindowSink {
    async fn publish(&self, count: u64) -> Result<(), PublishError>;
}
