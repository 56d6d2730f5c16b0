//! In-process event broker.
//!
//! Every live subscription owns a bounded queue. Publication never blocks
//! the mutating path: when a queue is full the configured backpressure
//! mode decides between evicting the oldest entry (with a lag marker on
//! next delivery), flagging the subscription for log re-sync, or closing
//! the stream. The durable log remains authoritative either way.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use uuid::Uuid;

use crate::model::{EventType, IntentEvent};

/// What to do when a subscriber's queue is full.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackpressureMode {
    /// Evict the head, enqueue the new event, surface a lag marker with
    /// the evicted count on next delivery. Default for dashboards.
    DropOldest,
    /// Discard the live event and flag the subscription desynced; the
    /// stream re-reads the durable log before resuming. Nothing is lost
    /// from the log. Default for durable processors.
    Block,
    /// Close the stream when the queue would overflow.
    Disconnect,
}

impl Default for BackpressureMode {
    fn default() -> Self {
        BackpressureMode::DropOldest
    }
}

impl fmt::Display for BackpressureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackpressureMode::DropOldest => "drop_oldest",
            BackpressureMode::Block => "block",
            BackpressureMode::Disconnect => "disconnect",
        };
        write!(f, "{name}")
    }
}

impl FromStr for BackpressureMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "drop_oldest" => Ok(BackpressureMode::DropOldest),
            "block" => Ok(BackpressureMode::Block),
            "disconnect" => Ok(BackpressureMode::Disconnect),
            other => Err(format!("unknown backpressure mode: {other}")),
        }
    }
}

/// Subscription filter. All set fields must match.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub intent_id: Option<Uuid>,
    pub event_types: Option<HashSet<EventType>>,
    /// "Assigned to me": matches events acted by this agent or whose
    /// payload addresses it via `assign_to` / `agent_id`.
    pub agent_id: Option<String>,
}

impl EventFilter {
    pub fn matches(&self, event: &IntentEvent) -> bool {
        if let Some(intent_id) = self.intent_id
            && event.intent_id != intent_id
        {
            return false;
        }
        if let Some(types) = &self.event_types
            && !types.contains(&event.event_type)
        {
            return false;
        }
        if let Some(agent_id) = &self.agent_id {
            let addressed = event.actor_agent_id == *agent_id
                || event
                    .payload
                    .get("assign_to")
                    .and_then(|v| v.as_str())
                    .is_some_and(|v| v == agent_id)
                || event
                    .payload
                    .get("agent_id")
                    .and_then(|v| v.as_str())
                    .is_some_and(|v| v == agent_id);
            if !addressed {
                return false;
            }
        }
        true
    }
}

#[derive(Default)]
struct QueueState {
    buf: VecDeque<IntentEvent>,
    dropped: u64,
    desynced: bool,
    closed: bool,
}

/// Everything pending on a subscription at drain time.
#[derive(Debug, Default)]
pub struct Drained {
    pub events: Vec<IntentEvent>,
    pub dropped: u64,
    pub desynced: bool,
    pub closed: bool,
}

pub struct Subscription {
    pub id: Uuid,
    pub filter: EventFilter,
    pub mode: BackpressureMode,
    capacity: usize,
    state: Mutex<QueueState>,
    pub notify: Notify,
}

impl Subscription {
    fn offer(&self, event: &IntentEvent) {
        let mut state = self.state.lock().expect("subscription queue poisoned");
        if state.closed {
            return;
        }
        if state.buf.len() >= self.capacity {
            match self.mode {
                BackpressureMode::DropOldest => {
                    state.buf.pop_front();
                    state.dropped += 1;
                    state.buf.push_back(event.clone());
                }
                BackpressureMode::Block => {
                    state.desynced = true;
                }
                BackpressureMode::Disconnect => {
                    state.closed = true;
                }
            }
        } else {
            state.buf.push_back(event.clone());
        }
        drop(state);
        self.notify.notify_one();
    }

    /// Take everything pending, resetting the lag and desync markers.
    pub fn drain(&self) -> Drained {
        let mut state = self.state.lock().expect("subscription queue poisoned");
        Drained {
            events: state.buf.drain(..).collect(),
            dropped: std::mem::take(&mut state.dropped),
            desynced: std::mem::take(&mut state.desynced),
            closed: state.closed,
        }
    }

    pub fn close(&self) {
        let mut state = self.state.lock().expect("subscription queue poisoned");
        state.closed = true;
        drop(state);
        self.notify.notify_one();
    }

    #[cfg(test)]
    fn queued(&self) -> usize {
        self.state.lock().expect("subscription queue poisoned").buf.len()
    }
}

/// Registry of live subscriptions. Owned by the server lifecycle and
/// passed to components explicitly so tests can build isolated instances.
pub struct EventBroker {
    subscriptions: DashMap<Uuid, Arc<Subscription>>,
    capacity: usize,
}

impl EventBroker {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscriptions: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn subscribe(&self, filter: EventFilter, mode: BackpressureMode) -> Arc<Subscription> {
        let subscription = Arc::new(Subscription {
            id: Uuid::new_v4(),
            filter,
            mode,
            capacity: self.capacity,
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        });
        self.subscriptions
            .insert(subscription.id, subscription.clone());
        subscription
    }

    pub fn unsubscribe(&self, id: Uuid) {
        if let Some((_, subscription)) = self.subscriptions.remove(&id) {
            subscription.close();
        }
    }

    /// Offer one committed event to every matching subscription.
    pub fn publish(&self, event: &IntentEvent) {
        for entry in self.subscriptions.iter() {
            if entry.filter.matches(event) {
                entry.offer(event);
            }
        }
    }

    pub fn publish_all(&self, events: &[IntentEvent]) {
        for event in events {
            self.publish(event);
        }
    }

    /// Close every stream; clients reconnect with their last acked
    /// sequence after restart.
    pub fn close_all(&self) {
        for entry in self.subscriptions.iter() {
            entry.close();
        }
        self.subscriptions.clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.len()
    }
}
