//! In-process collaborator backed by an in-memory ledger
//!
//! Default wiring for the binaries when no domain services are linked,
//! and the fixture the sync tests run against. It honors the full
//! collaborator contract: natural-key duplicate reporting, dependency
//! checks for payments and receipts, transactional-looking apply with
//! server identity assignment, and fault injection for exercising the
//! retry path.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::OperationPayload;
use crate::sync::collaborators::{
    ApplyError, ApplyOutcome, CollaboratorVerdict, FieldMismatch, OperationApplier,
};

#[derive(Default)]
struct LedgerState {
    /// natural key -> server identity of the applied operation
    applied: HashMap<String, ApplyOutcome>,
    /// natural keys of entities voided on the server side
    voided: HashSet<String>,
    /// dependency keys the server knows about without a queued origin
    seeded: HashSet<String>,
    /// remaining apply calls that fail with a transient error
    fail_next: u32,
    next_serial: u64,
}

/// See module docs
pub struct InMemoryApplier {
    reference_prefix: String,
    state: Mutex<LedgerState>,
}

impl InMemoryApplier {
    #[must_use]
    pub fn new(reference_prefix: impl Into<String>) -> Self {
        Self {
            reference_prefix: reference_prefix.into(),
            state: Mutex::new(LedgerState::default()),
        }
    }

    /// Mark a server-side entity as voided; payments and receipts against
    /// it will report a data mismatch
    pub fn void(&self, natural_key: &str) {
        let mut state = self.state.lock().expect("ledger lock");
        state.voided.insert(natural_key.to_string());
    }

    /// Teach the ledger about a dependency that exists on the server
    /// without having gone through this queue
    pub fn seed_dependency(&self, natural_key: &str) {
        let mut state = self.state.lock().expect("ledger lock");
        state.seeded.insert(natural_key.to_string());
    }

    /// Make the next `n` apply calls fail transiently
    pub fn fail_next_applies(&self, n: u32) {
        let mut state = self.state.lock().expect("ledger lock");
        state.fail_next = n;
    }

    /// Number of operations recorded on the ledger
    pub fn applied_count(&self) -> usize {
        self.state.lock().expect("ledger lock").applied.len()
    }

    /// Server identity recorded for a natural key, if any
    pub fn outcome_for(&self, natural_key: &str) -> Option<ApplyOutcome> {
        self.state
            .lock()
            .expect("ledger lock")
            .applied
            .get(natural_key)
            .cloned()
    }

    fn dependency_known(state: &LedgerState, key: &str) -> bool {
        state.applied.contains_key(key) || state.seeded.contains(key)
    }
}

#[async_trait]
impl OperationApplier for InMemoryApplier {
    async fn check(&self, payload: &OperationPayload) -> Result<CollaboratorVerdict, ApplyError> {
        let state = self.state.lock().expect("ledger lock");

        if let Some(existing) = state.applied.get(payload.natural_key()) {
            return Ok(CollaboratorVerdict::Duplicate {
                server_id: existing.server_id.clone(),
                server_reference: existing.server_reference.clone(),
            });
        }

        if let Some(dependency) = payload.dependency_key() {
            if state.voided.contains(dependency) {
                let identity = state.applied.get(dependency).cloned().unwrap_or_else(|| {
                    ApplyOutcome {
                        server_id: String::new(),
                        server_reference: dependency.to_string(),
                    }
                });
                return Ok(CollaboratorVerdict::DataMismatch {
                    server_id: identity.server_id,
                    server_reference: identity.server_reference,
                    mismatches: vec![FieldMismatch {
                        field: "status".to_string(),
                        offline: "open".to_string(),
                        server: "voided".to_string(),
                    }],
                });
            }

            if !Self::dependency_known(&state, dependency) {
                return Ok(CollaboratorVerdict::Validation {
                    rule: "dependency_exists".to_string(),
                    detail: format!("referenced entity {dependency} does not exist on the server"),
                });
            }
        }

        Ok(CollaboratorVerdict::Clear)
    }

    async fn apply(&self, payload: &OperationPayload) -> Result<ApplyOutcome, ApplyError> {
        let mut state = self.state.lock().expect("ledger lock");

        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(ApplyError::Transient(
                "ledger temporarily unavailable".to_string(),
            ));
        }

        state.next_serial += 1;
        let outcome = ApplyOutcome {
            server_id: Uuid::now_v7().to_string(),
            server_reference: format!("{}-{:04}", self.reference_prefix, state.next_serial),
        };
        state
            .applied
            .insert(payload.natural_key().to_string(), outcome.clone());
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_payment, sample_sale};

    #[tokio::test(flavor = "multi_thread")]
    async fn test_apply_assigns_identity_and_records_key() {
        let ledger = InMemoryApplier::new("S");
        let outcome = ledger.apply(&sample_sale("INV-1")).await.unwrap();
        assert_eq!(outcome.server_reference, "S-0001");
        assert_eq!(ledger.applied_count(), 1);
        assert_eq!(ledger.outcome_for("INV-1"), Some(outcome));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_check_reports_duplicate_after_apply() {
        let ledger = InMemoryApplier::new("S");
        let applied = ledger.apply(&sample_sale("INV-1")).await.unwrap();

        let verdict = ledger.check(&sample_sale("INV-1")).await.unwrap();
        match verdict {
            CollaboratorVerdict::Duplicate { server_id, .. } => {
                assert_eq!(server_id, applied.server_id);
            }
            other => panic!("expected duplicate, got {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_payment_requires_known_sale() {
        let ledger = InMemoryApplier::new("S");

        let verdict = ledger
            .check(&sample_payment("PAY-1", "INV-404"))
            .await
            .unwrap();
        assert!(matches!(verdict, CollaboratorVerdict::Validation { .. }));

        ledger.seed_dependency("INV-404");
        let verdict = ledger
            .check(&sample_payment("PAY-1", "INV-404"))
            .await
            .unwrap();
        assert_eq!(verdict, CollaboratorVerdict::Clear);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_voided_sale_is_a_data_mismatch() {
        let ledger = InMemoryApplier::new("S");
        ledger.apply(&sample_sale("INV-1")).await.unwrap();
        ledger.void("INV-1");

        let verdict = ledger
            .check(&sample_payment("PAY-1", "INV-1"))
            .await
            .unwrap();
        match verdict {
            CollaboratorVerdict::DataMismatch { mismatches, .. } => {
                assert_eq!(mismatches[0].field, "status");
                assert_eq!(mismatches[0].server, "voided");
            }
            other => panic!("expected data mismatch, got {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_fault_injection_is_transient() {
        let ledger = InMemoryApplier::new("S");
        ledger.fail_next_applies(1);

        let first = ledger.apply(&sample_sale("INV-1")).await;
        assert!(matches!(first, Err(ApplyError::Transient(_))));

        let second = ledger.apply(&sample_sale("INV-1")).await;
        assert!(second.is_ok());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_merge_is_unsupported_by_default() {
        let ledger = InMemoryApplier::new("S");
        let result = ledger
            .merge(&sample_sale("INV-1"), &serde_json::Value::Null)
            .await;
        assert!(matches!(result, Err(ApplyError::MergeUnsupported)));
    }
}
