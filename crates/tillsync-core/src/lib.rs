//! tillsync-core - Core library for Tillsync
//!
//! Durable offline operation queue, conflict detection and resolution,
//! and the sync orchestrator used by all Tillsync interfaces (API, CLI).

pub mod checksum;
pub mod db;
pub mod error;
pub mod models;
pub mod retry;
pub mod service;
pub mod sync;
#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, Result};
pub use models::{OperationKind, OperationPayload, QueueId, QueueItem, QueueStatus};
pub use service::OfflineQueueService;
