//! Sync session log model
//!
//! One record per execution of the sync process; written once on start,
//! finalized once on completion, immutable afterward.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;
use crate::models::queue_item::OperationKind;

/// Identifier for one sync session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// What started the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Manual,
    Automatic,
    Scheduled,
    Startup,
}

impl TriggerKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Automatic => "automatic",
            Self::Scheduled => "scheduled",
            Self::Startup => "startup",
        }
    }
}

impl FromStr for TriggerKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(Self::Manual),
            "automatic" => Ok(Self::Automatic),
            "scheduled" => Ok(Self::Scheduled),
            "startup" => Ok(Self::Startup),
            _ => Err(Error::Validation(format!("unknown trigger kind: {s}"))),
        }
    }
}

/// Sync direction; the queue currently only uploads device-originated work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    Upload,
}

impl SyncDirection {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Upload => "upload",
        }
    }
}

impl FromStr for SyncDirection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upload" => Ok(Self::Upload),
            _ => Err(Error::Database(format!("unknown sync direction: {s}"))),
        }
    }
}

/// Terminal session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Session in progress (only ever observed mid-run)
    Running,
    /// Every processed item synced
    Completed,
    /// A mix of outcomes; some items failed or conflicted
    Partial,
    /// The session could not run at all
    Failed,
    /// Aborted between items; partial counts preserved
    Cancelled,
}

impl SessionStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Partial => "partial",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl FromStr for SessionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "partial" => Ok(Self::Partial),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(Error::Database(format!("unknown session status: {s}"))),
        }
    }
}

/// Aggregate outcome counts for one session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCounts {
    /// Due items found when the session started
    pub queued: u32,
    /// Items actually claimed and driven through an attempt
    pub processed: u32,
    pub synced: u32,
    pub failed: u32,
    pub conflicts: u32,
    /// Items another run claimed first, or left behind on cancellation
    pub skipped: u32,
    /// Processed items broken down by operation kind
    pub by_kind: BTreeMap<OperationKind, u32>,
}

impl SessionCounts {
    pub(crate) fn record_kind(&mut self, kind: OperationKind) {
        *self.by_kind.entry(kind).or_insert(0) += 1;
    }
}

/// One execution of the sync process over a batch of due queue items
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSession {
    pub id: SessionId,
    pub device_id: String,
    pub direction: SyncDirection,
    pub trigger: TriggerKind,
    pub status: SessionStatus,
    pub started_at: i64,
    pub completed_at: Option<i64>,
    pub counts: SessionCounts,
    pub error: Option<String>,
}

impl SyncSession {
    /// Open a new running session record
    #[must_use]
    pub fn start(device_id: impl Into<String>, trigger: TriggerKind) -> Self {
        Self {
            id: SessionId::new(),
            device_id: device_id.into(),
            direction: SyncDirection::Upload,
            trigger,
            status: SessionStatus::Running,
            started_at: chrono::Utc::now().timestamp_millis(),
            completed_at: None,
            counts: SessionCounts::default(),
            error: None,
        }
    }

    /// Wall-clock duration, once the session has completed
    #[must_use]
    pub fn duration_ms(&self) -> Option<i64> {
        self.completed_at
            .map(|completed| completed - self.started_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_is_running() {
        let session = SyncSession::start("till-1", TriggerKind::Manual);
        assert_eq!(session.status, SessionStatus::Running);
        assert!(session.completed_at.is_none());
        assert!(session.duration_ms().is_none());
    }

    #[test]
    fn test_duration_after_completion() {
        let mut session = SyncSession::start("till-1", TriggerKind::Scheduled);
        session.completed_at = Some(session.started_at + 1250);
        assert_eq!(session.duration_ms(), Some(1250));
    }

    #[test]
    fn test_counts_by_kind() {
        let mut counts = SessionCounts::default();
        counts.record_kind(OperationKind::Sale);
        counts.record_kind(OperationKind::Sale);
        counts.record_kind(OperationKind::Payment);
        assert_eq!(counts.by_kind[&OperationKind::Sale], 2);
        assert_eq!(counts.by_kind[&OperationKind::Payment], 1);
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            SessionStatus::Running,
            SessionStatus::Completed,
            SessionStatus::Partial,
            SessionStatus::Failed,
            SessionStatus::Cancelled,
        ] {
            let parsed: SessionStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }
}
