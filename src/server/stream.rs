//! The long-lived SSE event stream.
//!
//! `GET /streams/events?intent_id=&agent_id=&event_types=&from_sequence=&mode=`
//! replays the durable log from `from_sequence` (intent-scoped streams)
//! and then follows live fan-out, gap-free and duplicate-free. Lag
//! markers surface as `lag` events.

use std::collections::HashSet;
use std::convert::Infallible;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use serde::Deserialize;
use tokio_stream::StreamExt;
use uuid::Uuid;

use crate::errors::CoreError;
use crate::events::{BackpressureMode, EventFilter, StreamFrame, open_stream};
use crate::model::EventType;
use crate::server::{AppState, identify};

#[derive(Deserialize)]
pub struct StreamQuery {
    #[serde(default)]
    pub intent_id: Option<Uuid>,
    #[serde(default)]
    pub agent_id: Option<String>,
    /// Comma-separated event type names.
    #[serde(default)]
    pub event_types: Option<String>,
    #[serde(default)]
    pub from_sequence: Option<i64>,
    /// Backpressure mode name: drop_oldest (default), block, disconnect.
    #[serde(default)]
    pub mode: Option<String>,
}

pub async fn stream_events(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<StreamQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, CoreError> {
    let _ = identify(&state, &headers)?;

    let event_types = query
        .event_types
        .as_deref()
        .map(parse_event_types)
        .transpose()?;
    if query.from_sequence.is_some() && query.intent_id.is_none() {
        return Err(CoreError::validation(
            "from_sequence requires an intent_id filter".to_string(),
        ));
    }
    let mode = query
        .mode
        .as_deref()
        .map(str::parse::<BackpressureMode>)
        .transpose()
        .map_err(CoreError::Validation)?
        .unwrap_or_default();
    let filter = EventFilter {
        intent_id: query.intent_id,
        event_types,
        agent_id: query.agent_id,
    };
    let frames = open_stream(
        state.engine.store().clone(),
        state.engine.broker().clone(),
        filter,
        mode,
        query.from_sequence,
        state.engine.config().replay_page_size,
    );
    let sse = frames.map(|frame| Ok(render(frame)));
    Ok(Sse::new(sse).keep_alive(KeepAlive::default()))
}

fn parse_event_types(raw: &str) -> Result<HashSet<EventType>, CoreError> {
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| {
            name.parse::<EventType>()
                .map_err(CoreError::Validation)
        })
        .collect()
}

fn render(frame: StreamFrame) -> Event {
    match &frame {
        StreamFrame::Event(event) => {
            let base = Event::default()
                .event(event.event_type.as_str())
                .id(event.sequence.to_string());
            match serde_json::to_string(event) {
                Ok(data) => base.data(data),
                Err(_) => base.data("{}"),
            }
        }
        StreamFrame::Lag { dropped } => Event::default()
            .event("lag")
            .data(format!("{{\"dropped\":{dropped}}}")),
    }
}
