//! sea-orm entity definitions, one module per table.
//!
//! Columns hold SQLite-native types only: ids as TEXT uuids, enums as
//! their wire names, JSON documents as canonical TEXT. Conversion to and
//! from domain types happens in the storage operations, not here.

pub mod attachments;
pub mod costs;
pub mod credentials;
pub mod events;
pub mod failures;
pub mod grants;
pub mod idempotency_keys;
pub mod intents;
pub mod leases;
pub mod portfolio_members;
pub mod portfolios;
