use std::sync::Arc;

use axum::extract::{Query, State};
use metrics::counter;
use reqwest::Url;
use tracing::{instrument, warn};

use crate::api::{AcceptError, AcceptQuery};
use crate::callback::CallbackNotifier;
use crate::dedup::DedupGate;
use crate::window::WindowCounter;
use crate::{router, EventId};

/// Orchestrates one incoming event: dedup, record, then optionally notify.
pub struct AcceptService {
    gate: DedupGate,
    counter: Arc<WindowCounter>,
    notifier: CallbackNotifier,
}

impl AcceptService {
    pub fn new(gate: DedupGate, counter: Arc<WindowCounter>, notifier: CallbackNotifier) -> Self {
        Self {
            gate,
            counter,
            notifier,
        }
    }

    pub fn counter(&self) -> &WindowCounter {
        &self.counter
    }

    pub fn notifier(&self) -> &CallbackNotifier {
        &self.notifier
    }

    /// Counts `id` if the dedup gate lets it through. The callback, if any, is
    /// scheduled before returning but never awaited.
    pub async fn accept(&self, id: EventId, endpoint: Option<Url>) -> Result<(), AcceptError> {
        match self.gate.accept(id).await {
            Ok(true) => {}
            Ok(false) => return Err(AcceptError::Duplicate),
            Err(err) => {
                warn!("dedup store unavailable, rejecting event {}: {}", id, err);
                return Err(AcceptError::StoreUnavailable);
            }
        }

        self.counter.record(id);

        if let Some(endpoint) = endpoint {
            let count = self.notifier.policy().resolve(&self.counter);
            self.notifier.notify(endpoint, count);
        }

        Ok(())
    }
}

/// Validates the raw query. Nothing here touches the store.
pub fn parse_query(query: AcceptQuery) -> Result<(EventId, Option<Url>), AcceptError> {
    let id = match query.id.as_deref() {
        None | Some("") => return Err(AcceptError::MissingId),
        Some(raw) => raw.parse::<EventId>().map_err(|_| AcceptError::InvalidId)?,
    };

    let endpoint = match query.endpoint.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(Url::parse(raw).map_err(|e| AcceptError::InvalidEndpoint(e.to_string()))?),
    };

    Ok((id, endpoint))
}

#[instrument(skip_all, fields(id, endpoint))]
pub async fn accept(
    state: State<router::State>,
    meta: Query<AcceptQuery>,
) -> Result<&'static str, AcceptError> {
    counter!("accept_events_received_total").increment(1);

    let Query(query) = meta;
    let result = async {
        let (id, endpoint) = parse_query(query)?;
        tracing::Span::current().record("id", id);
        if let Some(endpoint) = &endpoint {
            tracing::Span::current().record("endpoint", endpoint.as_str());
        }
        state.service.accept(id, endpoint).await
    }
    .await;

    match result {
        Ok(()) => {
            counter!("accept_events_accepted_total").increment(1);
            Ok("ok")
        }
        Err(err) => {
            counter!("accept_events_rejected_total", "cause" => err.cause()).increment(1);
            Err(err)
        }
    }
}
