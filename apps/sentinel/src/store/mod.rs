/// Shared store layer
///
/// This module owns the registry data model and the key-value store client
/// the sentinel shares with the presentation layer. Keys follow the
/// `station:{id}` / `target:{id}` layout with JSON record values.
pub mod client;
pub mod models;

pub use client::{RedisStore, StatusStore, StoreError, UpdateOutcome};
pub use models::{Station, StatusUpdate, Target, TargetStatus};
