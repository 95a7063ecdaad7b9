use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use reqwest::{header, Url};
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::api::CallbackPayload;
use crate::window::WindowCounter;

/// Which count a callback reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackCountPolicy {
    /// Live cardinality of the current window, including the triggering
    /// event. Non-decreasing within a window and unrelated to what the
    /// publisher will eventually report for it.
    Live,
    /// Count of the last drained window, 0 before the first drain.
    LastWindow,
}

impl CallbackCountPolicy {
    pub fn resolve(&self, counter: &WindowCounter) -> u64 {
        match self {
            CallbackCountPolicy::Live => counter.snapshot_count(),
            CallbackCountPolicy::LastWindow => counter.last_drained().unwrap_or(0),
        }
    }
}

impl FromStr for CallbackCountPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_ref() {
            "live" => Ok(CallbackCountPolicy::Live),
            "last_window" => Ok(CallbackCountPolicy::LastWindow),
            _ => Err(format!("Unknown callback count policy: {s}")),
        }
    }
}

/// Fire-and-forget delivery of window counts to caller-supplied endpoints.
///
/// At most `max_concurrency` deliveries are in flight; beyond that new
/// callbacks are dropped rather than queued, so a slow endpoint cannot grow
/// memory without bound or hold up an accept response.
pub struct CallbackNotifier {
    client: reqwest::Client,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    policy: CallbackCountPolicy,
}

impl CallbackNotifier {
    pub fn new(
        request_timeout: Duration,
        max_concurrency: usize,
        policy: CallbackCountPolicy,
    ) -> anyhow::Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent("accept callback notifier")
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            client,
            permits: Arc::new(Semaphore::new(max_concurrency)),
            tracker: TaskTracker::new(),
            policy,
        })
    }

    pub fn policy(&self) -> CallbackCountPolicy {
        self.policy
    }

    /// Schedules one POST of `{"count": count}` to `endpoint` and returns
    /// immediately. Returns false if the callback was dropped.
    pub fn notify(&self, endpoint: Url, count: u64) -> bool {
        let permit = match self.permits.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                counter!("accept_callbacks_total", "outcome" => "dropped").increment(1);
                warn!("callback to {} dropped, too many in flight", endpoint);
                return false;
            }
        };

        let client = self.client.clone();
        self.tracker.spawn(async move {
            deliver(client, endpoint, CallbackPayload { count }).await;
            drop(permit);
        });
        true
    }

    /// Stops accepting callbacks and waits up to `grace` for the ones in
    /// flight. Returns false if some were still running at the deadline.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.tracker.close();
        match tokio::time::timeout(grace, self.tracker.wait()).await {
            Ok(()) => true,
            Err(_) => {
                warn!(
                    "{} callbacks still in flight after shutdown grace period",
                    self.tracker.len()
                );
                false
            }
        }
    }
}

async fn deliver(client: reqwest::Client, endpoint: Url, payload: CallbackPayload) {
    match client.post(endpoint.clone()).json(&payload).send().await {
        Ok(response) => {
            counter!("accept_callbacks_total", "outcome" => "delivered").increment(1);
            info!("endpoint {} response status: {}", endpoint, response.status());
        }
        Err(err) => {
            counter!("accept_callbacks_total", "outcome" => "failed").increment(1);
            error!("failed to send request to endpoint {}: {}", endpoint, err);
        }
    }
}
