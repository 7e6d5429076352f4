//! Database layer for Tillsync

mod connection;
mod migrations;
mod queue_repository;
mod session_repository;

pub use connection::Database;
pub use queue_repository::{LibSqlQueueRepository, QueueRepository, QueueStats};
pub use session_repository::{LibSqlSessionRepository, SessionRepository};
