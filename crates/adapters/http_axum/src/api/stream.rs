//! Server-Sent Events (SSE) stream of rule events.

use std::collections::HashSet;
use std::convert::Infallible;

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use serde::Deserialize;
use tokio_stream::{Stream, StreamExt};

use hubwatch_domain::event::EventKind;

use crate::error::ApiError;
use crate::state::AppState;

/// Query string of the stream endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    /// Comma-separated event kinds to forward (all when absent).
    #[serde(default)]
    pub kinds: Option<String>,
}

fn parse_kinds(raw: Option<&str>) -> Result<Option<HashSet<EventKind>>, ApiError> {
    let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return Ok(None);
    };
    raw.split(',')
        .map(str::trim)
        .filter(|kind| !kind.is_empty())
        .map(|kind| {
            kind.parse::<EventKind>()
                .map_err(|err| ApiError::BadRequest(err.to_string()))
        })
        .collect::<Result<HashSet<_>, _>>()
        .map(Some)
}

/// `GET /api/stream`: SSE stream of rule events.
///
/// Registers a bus subscription and sends JSON-encoded events as SSE `data:`
/// frames. The stream ends when the client disconnects (which drops the
/// subscription) or when the bus drops this listener for falling behind.
///
/// # Errors
///
/// Returns a `400` when `kinds` names an unknown event kind.
pub async fn stream(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let kinds = parse_kinds(query.kinds.as_deref())?;
    let subscription = state.bus.subscribe();
    tracing::debug!(subscriber = %subscription.id(), "stream listener connected");

    let events = subscription.filter_map(move |event| {
        if let Some(kinds) = &kinds
            && !kinds.contains(&event.kind)
        {
            return None;
        }
        match serde_json::to_string(&event) {
            Ok(json) => Some(Ok(Event::default().data(json))),
            Err(err) => {
                tracing::warn!(%err, "failed to serialize rule event for SSE stream");
                None
            }
        }
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
