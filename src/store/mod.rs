//! State Storage Module
//!
//! Every workflow and step lives in an in-memory store whose entries
//! expire after a fixed time-to-live. Nothing survives a restart.
//!
//! - [`expiring`]: the TTL-based key-value store

pub mod expiring;

pub use expiring::{ExpiringStore, StoreEntry};
