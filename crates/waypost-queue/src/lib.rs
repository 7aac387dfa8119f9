//! Embedded store-and-forward queue for the edge agent.
//!
//! One SQLite file holds the not-yet-acknowledged readings and the durable
//! per-UTC-day cost counters. Every mutation is one transaction; the file
//! survives abrupt process termination, and a corrupt file is backed up and
//! replaced rather than crashing the agent.

mod cost_ledger;
mod store;

pub use store::SqliteQueue;
