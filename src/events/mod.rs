//! Event fan-out: the in-process broker with per-subscriber bounded
//! queues, and the replay-then-live stream assembly used by the SSE
//! surface and the engine's own background workers.

mod broker;
mod stream;

pub use broker::{BackpressureMode, Drained, EventBroker, EventFilter, Subscription};
pub use stream::{StreamFrame, open_stream};
