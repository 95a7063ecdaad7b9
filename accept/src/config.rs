use std::net::SocketAddr;

use anyhow::bail;
use envconfig::Envconfig;
use tracing::Level;

use crate::callback::CallbackCountPolicy;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(default = "127.0.0.1:8080")]
    pub address: SocketAddr,

    #[envconfig(default = "redis://localhost:6379/")]
    pub redis_url: String,

    #[envconfig(default = "100")]
    pub redis_timeout_ms: u64,

    #[envconfig(default = "request:")]
    pub dedup_key_prefix: String,

    #[envconfig(default = "60")]
    pub dedup_ttl_secs: u64,

    // Independent of the dedup TTL on purpose, see DESIGN.md
    #[envconfig(default = "60")]
    pub window_interval_secs: u64,

    #[envconfig(default = "false")]
    pub print_sink: bool,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    #[envconfig(default = "5000")]
    pub callback_timeout_ms: u64,

    #[envconfig(default = "256")]
    pub callback_max_concurrency: usize,

    #[envconfig(default = "live")]
    pub callback_count_policy: CallbackCountPolicy,

    #[envconfig(default = "5000")]
    pub shutdown_grace_ms: u64,

    // Used for integration tests
    #[envconfig(default = "true")]
    pub export_prometheus: bool,

    pub otel_url: Option<String>,

    #[envconfig(default = "1.0")]
    pub otel_sampling_rate: f64,

    #[envconfig(default = "accept")]
    pub otel_service_name: String,

    #[envconfig(default = "info")]
    pub log_level: Level,
}

impl Config {
    /// Rejects values envconfig parses fine but the service cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.window_interval_secs == 0 {
            bail!("WINDOW_INTERVAL_SECS must be greater than zero");
        }
        if self.dedup_ttl_secs == 0 {
            bail!("DEDUP_TTL_SECS must be greater than zero");
        }
        if self.callback_max_concurrency == 0 {
            bail!("CALLBACK_MAX_CONCURRENCY must be greater than zero");
        }
        if self.redis_timeout_ms == 0 {
            bail!("REDIS_TIMEOUT_MS must be greater than zero");
        }
        Ok(())
    }
}

#[derive(Envconfig, Clone)]
pub struct KafkaConfig {
    #[envconfig(default = "20")]
    pub kafka_producer_linger_ms: u32, // Maximum time between producer batches during low traffic
    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32, // Time before we stop retrying producing a message: 20 seconds
    #[envconfig(default = "none")]
    pub kafka_compression_codec: String, // none, gzip, snappy, lz4, zstd
    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,
    #[envconfig(default = "unique_requests")]
    pub kafka_topic: String,
    #[envconfig(default = "false")]
    pub kafka_tls: bool,
}
