//! Replay-then-live stream assembly.
//!
//! A stream opened with `from_sequence = N` first drains the durable log
//! from `N`, then switches to live fan-out. The subscription is registered
//! before the log is read and live events at or below the last delivered
//! sequence are skipped, so the hand-off is gap-free and duplicate-free.

use std::collections::HashMap;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;
use uuid::Uuid;

use crate::events::{BackpressureMode, EventBroker, EventFilter};
use crate::model::IntentEvent;
use crate::storage::Store;

/// One frame on a subscriber stream: either a committed event or a lag
/// marker carrying the count evicted since the previous delivery.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamFrame {
    Event(IntentEvent),
    Lag { dropped: u64 },
}

/// Open a frame stream over `broker`, replaying the durable log first when
/// `from_sequence` names a starting point (requires an intent filter).
///
/// The pump task ends when the receiver is dropped, the subscription is
/// closed (disconnect backpressure or broker shutdown), or a storage
/// error interrupts replay.
pub fn open_stream(
    store: Store,
    broker: std::sync::Arc<EventBroker>,
    filter: EventFilter,
    mode: BackpressureMode,
    from_sequence: Option<i64>,
    page_size: u64,
) -> ReceiverStream<StreamFrame> {
    let (tx, rx) = mpsc::channel::<StreamFrame>(64);
    let subscription = broker.subscribe(filter.clone(), mode);
    tokio::spawn(async move {
        // Highest sequence delivered (or skipped as filtered) per intent.
        let mut delivered: HashMap<Uuid, i64> = HashMap::new();

        if let (Some(intent_id), Some(from)) = (filter.intent_id, from_sequence)
            && !catch_up(
                &store, &filter, &tx, &mut delivered, intent_id, from, page_size,
            )
            .await
        {
            broker.unsubscribe(subscription.id);
            return;
        }

        loop {
            let drained = subscription.drain();
            if drained.dropped > 0
                && tx
                    .send(StreamFrame::Lag {
                        dropped: drained.dropped,
                    })
                    .await
                    .is_err()
            {
                break;
            }
            if drained.desynced {
                // The queue overflowed under `block`; the log is
                // authoritative, so re-read it instead of trusting the
                // partial queue.
                if let Some(intent_id) = filter.intent_id {
                    let from = delivered.get(&intent_id).copied().unwrap_or(0) + 1;
                    if !catch_up(
                        &store, &filter, &tx, &mut delivered, intent_id, from, page_size,
                    )
                    .await
                    {
                        break;
                    }
                } else if tx.send(StreamFrame::Lag { dropped: 0 }).await.is_err() {
                    break;
                }
            } else {
                let mut send_failed = false;
                for event in drained.events {
                    let seen = delivered.get(&event.intent_id).copied().unwrap_or(0);
                    if event.sequence <= seen {
                        continue;
                    }
                    delivered.insert(event.intent_id, event.sequence);
                    if tx.send(StreamFrame::Event(event)).await.is_err() {
                        send_failed = true;
                        break;
                    }
                }
                if send_failed {
                    break;
                }
            }
            if drained.closed {
                break;
            }
            tokio::select! {
                _ = subscription.notify.notified() => {}
                _ = tx.closed() => break,
            }
        }
        broker.unsubscribe(subscription.id);
    });
    ReceiverStream::new(rx)
}

/// Page the durable log from `from` and deliver matching events. Returns
/// false when the stream should end (receiver gone or storage error).
async fn catch_up(
    store: &Store,
    filter: &EventFilter,
    tx: &mpsc::Sender<StreamFrame>,
    delivered: &mut HashMap<Uuid, i64>,
    intent_id: Uuid,
    from: i64,
    page_size: u64,
) -> bool {
    let mut cursor = from.max(1);
    loop {
        let page = match store.events_page(intent_id, cursor, page_size.max(1)).await {
            Ok(page) => page,
            Err(e) => {
                warn!(%intent_id, error = %e, "stream replay aborted");
                return false;
            }
        };
        if page.is_empty() {
            return true;
        }
        for event in page {
            cursor = event.sequence + 1;
            let seen = delivered.get(&event.intent_id).copied().unwrap_or(0);
            if event.sequence <= seen {
                continue;
            }
            delivered.insert(event.intent_id, event.sequence);
            if !filter.matches(&event) {
                continue;
            }
            if tx.send(StreamFrame::Event(event)).await.is_err() {
                return false;
            }
        }
    }
}
