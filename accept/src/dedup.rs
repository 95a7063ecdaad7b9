use std::sync::Arc;
use std::time::Duration;

use tracing::instrument;

use crate::redis::{Client, CustomRedisError};
use crate::EventId;

// Stored value is never read back, only the key's presence matters
const SENTINEL: &str = "1";

/// Guards against counting the same event identifier twice within the
/// retention window, across every instance sharing the store.
pub struct DedupGate {
    client: Arc<dyn Client + Send + Sync>,
    key_prefix: String,
    ttl: Duration,
}

impl DedupGate {
    pub fn new(client: Arc<dyn Client + Send + Sync>, key_prefix: String, ttl: Duration) -> Self {
        Self {
            client,
            key_prefix,
            ttl,
        }
    }

    pub fn key(&self, id: EventId) -> String {
        format!("{}{}", self.key_prefix, id)
    }

    /// Returns `Ok(true)` the first time `id` is seen within the TTL and
    /// `Ok(false)` for every later sighting. Store failures are returned as
    /// is; callers must treat them as "not unique".
    #[instrument(skip(self))]
    pub async fn accept(&self, id: EventId) -> Result<bool, CustomRedisError> {
        self.client
            .set_nx_ex(self.key(id), SENTINEL.to_string(), self.ttl.as_secs())
            .await
    }
}
