use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use thiserror::Error;
use tokio::time::{timeout, Instant};

#[derive(Error, Debug)]
pub enum CustomRedisError {
    #[error("Timeout error")]
    Timeout,
    #[error(transparent)]
    Redis(#[from] redis::RedisError),
}

/// A simple redis wrapper
/// Only exposes the single atomic command the dedup gate relies on, so that
/// failures can be injected in tests and the store swapped out later.
#[async_trait]
pub trait Client {
    /// `SET k v EX seconds NX`: returns true if the key was set, false if it
    /// already existed.
    async fn set_nx_ex(&self, k: String, v: String, seconds: u64)
        -> Result<bool, CustomRedisError>;
}

pub struct RedisClient {
    connection: ConnectionManager,
    timeout: Duration,
}

impl RedisClient {
    /// Connects eagerly so that a bad URL fails startup. The connection
    /// manager reconnects on its own afterwards.
    pub async fn new(addr: String, timeout: Duration) -> Result<RedisClient, CustomRedisError> {
        let client = redis::Client::open(addr)?;
        let connection = ConnectionManager::new(client).await?;

        Ok(RedisClient {
            connection,
            timeout,
        })
    }
}

#[async_trait]
impl Client for RedisClient {
    async fn set_nx_ex(
        &self,
        k: String,
        v: String,
        seconds: u64,
    ) -> Result<bool, CustomRedisError> {
        let mut conn = self.connection.clone();

        let mut cmd = redis::cmd("SET");
        cmd.arg(&k).arg(&v).arg("EX").arg(seconds).arg("NX");
        let results = cmd.query_async::<_, Option<String>>(&mut conn);

        match timeout(self.timeout, results).await {
            Err(_) => Err(CustomRedisError::Timeout),
            Ok(Err(err)) => Err(err.into()),
            Ok(Ok(Some(_))) => Ok(true), // Key was set
            Ok(Ok(None)) => Ok(false),   // Key already existed
        }
    }
}

/// In-memory stand-in with the same set-if-absent and expiry semantics.
/// Expiry follows tokio's clock, so paused-time tests can move past a TTL.
#[derive(Clone, Default)]
pub struct MockRedisClient {
    keys: Arc<Mutex<HashMap<String, (String, Instant)>>>,
    unavailable: Arc<AtomicBool>,
}

impl MockRedisClient {
    pub fn new() -> MockRedisClient {
        Self::default()
    }

    /// Makes every following command fail, as if the store was down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Value currently held for `key`, ignoring expired entries.
    pub fn get(&self, key: &str) -> Option<String> {
        let keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
        keys.get(key)
            .filter(|(_, expires_at)| *expires_at > Instant::now())
            .map(|(value, _)| value.clone())
    }
}

#[async_trait]
impl Client for MockRedisClient {
    async fn set_nx_ex(
        &self,
        k: String,
        v: String,
        seconds: u64,
    ) -> Result<bool, CustomRedisError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CustomRedisError::Redis(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "mock store unavailable",
            ))));
        }

        let now = Instant::now();
        let mut keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((_, expires_at)) = keys.get(&k) {
            if *expires_at > now {
                return Ok(false);
            }
        }
        keys.insert(k, (v, now + Duration::from_secs(seconds)));
        Ok(true)
    }
}
