//! Domain collaborator contract
//!
//! The orchestrator never implements domain semantics (VAT, kitchen
//! routing, receipt rendering, ...). It applies payloads through these
//! ports, one collaborator per operation kind, wired explicitly at
//! construction time. Idempotency is NOT assumed of `apply`; the
//! orchestrator guards replays with natural-key duplicate detection
//! before ever calling it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::models::{OperationKind, OperationPayload, QueueItem};

/// Durable server identity returned by a successful apply
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplyOutcome {
    /// Server-assigned identifier of the created entity
    pub server_id: String,
    /// Server-side business reference (e.g. an invoice number)
    pub server_reference: String,
}

/// Why a collaborator could not complete an operation
#[derive(Debug, Error)]
pub enum ApplyError {
    /// Recoverable: DB busy, downstream timeout. Retried per the
    /// orchestrator's backoff policy.
    #[error("transient: {0}")]
    Transient(String),

    /// A business rule that could not be checked offline fails; the item
    /// becomes a `validation` conflict
    #[error("validation: {0}")]
    Validation(String),

    /// The collaborator has no merge semantics for this operation kind
    #[error("merge is not supported for this operation kind")]
    MergeUnsupported,
}

/// One mismatched field between the offline assumption and server state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldMismatch {
    pub field: String,
    pub offline: String,
    pub server: String,
}

/// What a collaborator reports about server state for a payload that is
/// about to be replayed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollaboratorVerdict {
    /// Replay is safe
    Clear,
    /// An equivalent operation already exists under the same natural key
    Duplicate {
        server_id: String,
        server_reference: String,
    },
    /// A dependent entity exists but its state no longer matches what the
    /// offline device assumed
    DataMismatch {
        server_id: String,
        server_reference: String,
        mismatches: Vec<FieldMismatch>,
    },
    /// A business rule fails (e.g. a referenced entity no longer exists)
    Validation { rule: String, detail: String },
}

/// Port each domain subsystem implements for its operation kind
#[async_trait]
pub trait OperationApplier: Send + Sync {
    /// Inspect server state for the payload: duplicates under its natural
    /// key, dependent-entity drift, rules that were unverifiable offline.
    /// Runs before any write.
    async fn check(&self, payload: &OperationPayload) -> Result<CollaboratorVerdict, ApplyError>;

    /// Apply the payload against authoritative state, transactionally,
    /// and return the server identity it was recorded under
    async fn apply(&self, payload: &OperationPayload) -> Result<ApplyOutcome, ApplyError>;

    /// Kind-specific reconciliation of a flagged conflict. Collaborators
    /// without merge semantics keep the default.
    async fn merge(
        &self,
        payload: &OperationPayload,
        conflict_details: &serde_json::Value,
    ) -> Result<ApplyOutcome, ApplyError> {
        let _ = (payload, conflict_details);
        Err(ApplyError::MergeUnsupported)
    }
}

/// Maps each operation kind to the collaborator that applies it.
/// Constructed once and handed to the orchestrator; no dynamic lookups
/// at apply time.
#[derive(Clone, Default)]
pub struct CollaboratorRegistry {
    appliers: HashMap<OperationKind, Arc<dyn OperationApplier>>,
}

impl CollaboratorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the collaborator for an operation kind
    #[must_use]
    pub fn register(mut self, kind: OperationKind, applier: Arc<dyn OperationApplier>) -> Self {
        self.appliers.insert(kind, applier);
        self
    }

    /// Register one collaborator for every operation kind
    #[must_use]
    pub fn register_all(mut self, applier: &Arc<dyn OperationApplier>) -> Self {
        for kind in OperationKind::ALL {
            self.appliers.insert(kind, Arc::clone(applier));
        }
        self
    }

    #[must_use]
    pub fn get(&self, kind: OperationKind) -> Option<&Arc<dyn OperationApplier>> {
        self.appliers.get(&kind)
    }

    /// Kinds with no registered collaborator
    #[must_use]
    pub fn missing_kinds(&self) -> Vec<OperationKind> {
        OperationKind::ALL
            .into_iter()
            .filter(|kind| !self.appliers.contains_key(kind))
            .collect()
    }
}

/// Side-channel port for cross-cutting concerns (notifications, audit
/// feeds). Called after an item reaches an outcome; never on the apply
/// path itself.
pub trait SyncEventSink: Send + Sync {
    fn item_synced(&self, item: &QueueItem);
    fn item_failed(&self, item: &QueueItem, error: &str);
    fn item_conflicted(&self, item: &QueueItem);
}

/// Default sink: structured log events only
pub struct LogEventSink;

impl SyncEventSink for LogEventSink {
    fn item_synced(&self, item: &QueueItem) {
        tracing::info!(
            queue_id = %item.id,
            kind = %item.kind,
            server_reference = item.server_reference.as_deref().unwrap_or(""),
            "Offline operation applied"
        );
    }

    fn item_failed(&self, item: &QueueItem, error: &str) {
        tracing::warn!(
            queue_id = %item.id,
            kind = %item.kind,
            attempts = item.attempts,
            error,
            "Offline operation failed"
        );
    }

    fn item_conflicted(&self, item: &QueueItem) {
        tracing::warn!(
            queue_id = %item.id,
            kind = %item.kind,
            conflict = item.conflict_kind.map(|k| k.as_str()).unwrap_or("unknown"),
            "Offline operation conflicted"
        );
    }
}
