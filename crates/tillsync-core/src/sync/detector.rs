//! Conflict detection
//!
//! Decides, for an operation about to be replayed, whether the server's
//! current state makes replay unsafe, and classifies why. Runs before any
//! write, so detection and the eventual apply see a consistent view.

use serde_json::json;

use crate::error::{Error, Result};
use crate::models::{ConflictKind, QueueItem};
use crate::sync::collaborators::{ApplyError, CollaboratorRegistry, CollaboratorVerdict};

/// Outcome of a detection pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictDecision {
    /// `None` means replay is safe
    pub kind: Option<ConflictKind>,
    /// Structured explanation: the conflicting server entity's identity
    /// and the specific mismatched fields, enough to resolve without
    /// re-querying
    pub details: serde_json::Value,
}

impl ConflictDecision {
    /// Replay is safe
    #[must_use]
    pub fn clear() -> Self {
        Self {
            kind: None,
            details: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub const fn has_conflict(&self) -> bool {
        self.kind.is_some()
    }
}

/// Classifies whether replaying a queued operation is safe
pub struct ConflictDetector {
    registry: CollaboratorRegistry,
}

impl ConflictDetector {
    #[must_use]
    pub const fn new(registry: CollaboratorRegistry) -> Self {
        Self { registry }
    }

    /// Inspect server state for the item. Transient collaborator failures
    /// propagate as `Error::TransientApply` so the caller can schedule a
    /// retry instead of flagging a conflict that may not exist.
    pub async fn inspect(&self, item: &QueueItem) -> Result<ConflictDecision> {
        let Some(applier) = self.registry.get(item.kind) else {
            return Ok(ConflictDecision {
                kind: Some(ConflictKind::Validation),
                details: json!({
                    "rule": "collaborator_registered",
                    "detail": format!("no collaborator registered for kind {}", item.kind),
                    "natural_key": item.payload.natural_key(),
                }),
            });
        };

        let verdict = match applier.check(&item.payload).await {
            Ok(verdict) => verdict,
            Err(ApplyError::Transient(message)) => {
                return Err(Error::TransientApply(message));
            }
            Err(ApplyError::Validation(message)) => CollaboratorVerdict::Validation {
                rule: "collaborator_check".to_string(),
                detail: message,
            },
            Err(ApplyError::MergeUnsupported) => CollaboratorVerdict::Validation {
                rule: "collaborator_check".to_string(),
                detail: ApplyError::MergeUnsupported.to_string(),
            },
        };

        Ok(match verdict {
            CollaboratorVerdict::Clear => ConflictDecision::clear(),
            CollaboratorVerdict::Duplicate {
                server_id,
                server_reference,
            } => ConflictDecision {
                kind: Some(ConflictKind::Duplicate),
                details: json!({
                    "server_id": server_id,
                    "server_reference": server_reference,
                    "natural_key": item.payload.natural_key(),
                }),
            },
            CollaboratorVerdict::DataMismatch {
                server_id,
                server_reference,
                mismatches,
            } => ConflictDecision {
                kind: Some(ConflictKind::DataMismatch),
                details: json!({
                    "server_id": server_id,
                    "server_reference": server_reference,
                    "dependency_key": item.payload.dependency_key(),
                    "mismatched_fields": mismatches,
                }),
            },
            CollaboratorVerdict::Validation { rule, detail } => ConflictDecision {
                kind: Some(ConflictKind::Validation),
                details: json!({
                    "rule": rule,
                    "detail": detail,
                    "natural_key": item.payload.natural_key(),
                }),
            },
        })
    }
}
