//! Queue item model: one offline-originated operation awaiting synchronization

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::checksum;
use crate::error::{Error, Result};
use crate::models::payload::OperationPayload;

/// Default bound on replay attempts before an item is surfaced as a
/// terminal failure
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Client-generated identifier for a queued operation, using UUID v7
/// (time-sortable); distinct from any server-assigned identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueId(Uuid);

impl QueueId {
    /// Create a new unique queue ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for QueueId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Which domain collaborator applies a queued operation
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Sale,
    Payment,
    Receipt,
    InventoryUpdate,
    Other,
}

impl OperationKind {
    /// All kinds, in dispatch order
    pub const ALL: [Self; 5] = [
        Self::Sale,
        Self::Payment,
        Self::Receipt,
        Self::InventoryUpdate,
        Self::Other,
    ];

    /// Stable identifier used in storage and route paths
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sale => "sale",
            Self::Payment => "payment",
            Self::Receipt => "receipt",
            Self::InventoryUpdate => "inventory_update",
            Self::Other => "other",
        }
    }

    /// Priority assigned when the caller does not choose one.
    /// Payments preempt routine operations within a batch.
    #[must_use]
    pub const fn default_priority(self) -> i32 {
        match self {
            Self::Payment => 8,
            Self::Sale => 5,
            Self::Receipt | Self::InventoryUpdate | Self::Other => 3,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "sale" => Ok(Self::Sale),
            "payment" => Ok(Self::Payment),
            "receipt" => Ok(Self::Receipt),
            "inventory_update" => Ok(Self::InventoryUpdate),
            "other" => Ok(Self::Other),
            _ => Err(Error::Validation(format!("unrecognized operation kind: {s}"))),
        }
    }
}

/// Queue item lifecycle status
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    /// Awaiting synchronization (initial state)
    Pending,
    /// Claimed by an in-flight orchestrator run
    Syncing,
    /// Applied on the server; terminal success
    Synced,
    /// Last attempt failed; retryable until attempts reach the bound
    Failed,
    /// Flagged unsafe to replay; requires resolution
    Conflict,
    /// Discarded by an explicit resolution; terminal
    Skipped,
}

impl QueueStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Failed => "failed",
            Self::Conflict => "conflict",
            Self::Skipped => "skipped",
        }
    }

    /// Terminal states are never picked up by a sync run again
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Synced | Self::Skipped)
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "syncing" => Ok(Self::Syncing),
            "synced" => Ok(Self::Synced),
            "failed" => Ok(Self::Failed),
            "conflict" => Ok(Self::Conflict),
            "skipped" => Ok(Self::Skipped),
            _ => Err(Error::Database(format!("unknown queue status: {s}"))),
        }
    }
}

/// Why replay of a queued operation was judged unsafe
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// An equivalent operation already exists on the server (same natural key)
    Duplicate,
    /// A dependent entity exists but with materially different state
    DataMismatch,
    /// Payload checksum mismatch; the queued content is untrustworthy
    Integrity,
    /// A business rule that could not be validated offline fails
    Validation,
}

impl ConflictKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Duplicate => "duplicate",
            Self::DataMismatch => "data_mismatch",
            Self::Integrity => "integrity",
            Self::Validation => "validation",
        }
    }
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictKind {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "duplicate" => Ok(Self::Duplicate),
            "data_mismatch" => Ok(Self::DataMismatch),
            "integrity" => Ok(Self::Integrity),
            "validation" => Ok(Self::Validation),
            _ => Err(Error::Database(format!("unknown conflict kind: {s}"))),
        }
    }
}

/// Operator-chosen disposition for a flagged conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// Force-apply the offline version; the offline record is authoritative
    KeepOffline,
    /// Discard the offline operation in favor of server state
    KeepOnline,
    /// Kind-specific reconciliation via the collaborator's merge hook
    Merge,
    /// Dispose of the item without replay
    Skip,
}

impl ResolutionStrategy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::KeepOffline => "keep_offline",
            Self::KeepOnline => "keep_online",
            Self::Merge => "merge",
            Self::Skip => "skip",
        }
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResolutionStrategy {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "keep_offline" => Ok(Self::KeepOffline),
            "keep_online" => Ok(Self::KeepOnline),
            "merge" => Ok(Self::Merge),
            "skip" => Ok(Self::Skip),
            _ => Err(Error::Validation(format!(
                "unknown resolution strategy: {s}"
            ))),
        }
    }
}

/// Input to `QueueRepository::enqueue`
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub device_id: String,
    pub payload: OperationPayload,
    /// When the operation actually occurred on the device (Unix ms);
    /// may precede the enqueue time arbitrarily
    pub offline_timestamp: i64,
    pub actor: String,
    /// Higher values are serviced first within a batch
    pub priority: i32,
    pub max_attempts: u32,
}

/// One offline-originated operation awaiting or having undergone
/// synchronization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: QueueId,
    pub device_id: String,
    pub kind: OperationKind,
    pub payload: OperationPayload,
    /// Hash of the payload computed at enqueue time; must match a fresh
    /// computation before the item is ever applied
    pub content_checksum: String,
    /// When the operation occurred on the device (Unix ms)
    pub offline_timestamp: i64,
    pub enqueued_by: String,
    pub priority: i32,
    pub status: QueueStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub last_attempt_at: Option<i64>,
    /// Retry gate: the item is not due again before this time (Unix ms)
    pub not_before: Option<i64>,
    pub last_error: Option<String>,
    /// Durable server-assigned identifier, recorded on success
    pub server_id: Option<String>,
    /// Server-side business reference (e.g. an invoice number)
    pub server_reference: Option<String>,
    pub conflict_kind: Option<ConflictKind>,
    pub conflict_details: Option<serde_json::Value>,
    pub resolution_strategy: Option<ResolutionStrategy>,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<i64>,
    pub resolution_reason: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl QueueItem {
    /// Build a pending item from an enqueue request, computing the
    /// content checksum over the payload as persisted
    pub fn from_request(request: EnqueueRequest) -> Result<Self> {
        let now = chrono::Utc::now().timestamp_millis();
        let content_checksum = checksum::compute(&request.payload)?;
        Ok(Self {
            id: QueueId::new(),
            device_id: request.device_id,
            kind: request.payload.kind(),
            payload: request.payload,
            content_checksum,
            offline_timestamp: request.offline_timestamp,
            enqueued_by: request.actor,
            priority: request.priority,
            status: QueueStatus::Pending,
            attempts: 0,
            max_attempts: request.max_attempts,
            last_attempt_at: None,
            not_before: None,
            last_error: None,
            server_id: None,
            server_reference: None,
            conflict_kind: None,
            conflict_details: None,
            resolution_strategy: None,
            resolved_by: None,
            resolved_at: None,
            resolution_reason: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Whether this item has burned through its retry budget
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}
