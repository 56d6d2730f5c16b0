//! OpenIntent is a coordination engine for heterogeneous agents — human
//! operators, language-model agents, automated workers — cooperating on
//! long-running units of work called intents.
//!
//! The crate provides:
//! - the intent lifecycle and state machine with optimistic concurrency,
//! - an append-only per-intent event log with live fan-out and replay,
//! - scope-exclusive, TTL-bounded work leases,
//! - portfolio / graph aggregation with dependency-ordered readiness,
//! - policy-driven retry and failure accounting,
//! - a grant-validated broker for external tool execution,
//! - an HTTP surface (JSON + SSE) over all of the above.
pub mod auth;
pub mod config;
pub mod engine;
pub mod errors;
pub mod events;
pub mod model;
pub mod server;
pub mod storage;
pub mod tools;
