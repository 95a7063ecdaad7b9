pub mod accept;
pub mod api;
pub mod callback;
pub mod config;
pub mod dedup;
pub mod prometheus;
pub mod publisher;
pub mod redis;
pub mod router;
pub mod server;
pub mod sinks;
pub mod window;

/// Caller-supplied identifier of one logical event.
pub type EventId = i64;
