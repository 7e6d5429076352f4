//! Conflict resolution
//!
//! Applies an operator-chosen strategy to a previously flagged conflict,
//! finalizing its disposition. Every resolution is an audited override of
//! automatic safety: who, when, and why are recorded on the item.

use crate::db::{Database, LibSqlQueueRepository, QueueRepository};
use crate::error::{Error, Result};
use crate::models::{QueueId, QueueItem, QueueStatus, ResolutionStrategy};
use crate::sync::collaborators::{ApplyError, CollaboratorRegistry};

/// Applies resolution strategies to conflicted queue items
pub struct ConflictResolver {
    registry: CollaboratorRegistry,
}

impl ConflictResolver {
    #[must_use]
    pub const fn new(registry: CollaboratorRegistry) -> Self {
        Self { registry }
    }

    /// Finalize a conflicted item with the given strategy.
    ///
    /// - `keep_offline`: force-apply the offline version; the item ends
    ///   `synced` with the fresh server identity.
    /// - `keep_online` / `skip`: discard the offline operation; the item
    ///   ends `skipped`.
    /// - `merge`: delegate to the collaborator's merge hook; rejected for
    ///   kinds without merge semantics.
    pub async fn apply_resolution(
        &self,
        db: &Database,
        id: &QueueId,
        strategy: ResolutionStrategy,
        actor: &str,
        reason: &str,
    ) -> Result<QueueItem> {
        let queue = LibSqlQueueRepository::new(db.connection());

        let item = queue
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        if item.status != QueueStatus::Conflict {
            return Err(Error::Validation(format!(
                "item {id} is not awaiting conflict resolution (status: {})",
                item.status
            )));
        }

        match strategy {
            ResolutionStrategy::KeepOffline => {
                let applier = self.applier_for(&item)?;
                let outcome = applier.apply(&item.payload).await.map_err(map_apply_error)?;
                queue
                    .record_resolution(
                        id,
                        strategy,
                        QueueStatus::Synced,
                        actor,
                        reason,
                        Some((&outcome.server_id, &outcome.server_reference)),
                    )
                    .await?;
            }
            ResolutionStrategy::Merge => {
                let applier = self.applier_for(&item)?;
                let details = item
                    .conflict_details
                    .clone()
                    .unwrap_or(serde_json::Value::Null);
                let outcome = applier
                    .merge(&item.payload, &details)
                    .await
                    .map_err(map_apply_error)?;
                queue
                    .record_resolution(
                        id,
                        strategy,
                        QueueStatus::Synced,
                        actor,
                        reason,
                        Some((&outcome.server_id, &outcome.server_reference)),
                    )
                    .await?;
            }
            ResolutionStrategy::KeepOnline | ResolutionStrategy::Skip => {
                queue
                    .record_resolution(id, strategy, QueueStatus::Skipped, actor, reason, None)
                    .await?;
            }
        }

        queue
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    fn applier_for(
        &self,
        item: &QueueItem,
    ) -> Result<&std::sync::Arc<dyn crate::sync::collaborators::OperationApplier>> {
        self.registry.get(item.kind).ok_or_else(|| {
            Error::Validation(format!("no collaborator registered for kind {}", item.kind))
        })
    }
}

fn map_apply_error(error: ApplyError) -> Error {
    match error {
        ApplyError::Transient(message) => Error::TransientApply(message),
        ApplyError::Validation(message) => Error::Validation(message),
        ApplyError::MergeUnsupported => Error::Validation(error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::db::Database;
    use crate::testing::sample_sale;
    use crate::models::{ConflictKind, EnqueueRequest, DEFAULT_MAX_ATTEMPTS};
    use crate::sync::collaborators::OperationApplier;
    use crate::sync::memory::InMemoryApplier;

    struct Fixture {
        db: Database,
        ledger: Arc<InMemoryApplier>,
        resolver: ConflictResolver,
    }

    async fn conflicted_item(fixture: &Fixture) -> QueueId {
        let queue = LibSqlQueueRepository::new(fixture.db.connection());
        let item = queue
            .enqueue(EnqueueRequest {
                device_id: "till-1".to_string(),
                payload: sample_sale("INV-1"),
                offline_timestamp: 1_000,
                actor: "ada".to_string(),
                priority: 5,
                max_attempts: DEFAULT_MAX_ATTEMPTS,
            })
            .await
            .unwrap();
        queue.claim(&item.id).await.unwrap();
        queue
            .mark_conflict(
                &item.id,
                ConflictKind::Duplicate,
                &serde_json::json!({"server_id": "srv-1"}),
            )
            .await
            .unwrap();
        item.id
    }

    async fn setup() -> Fixture {
        let db = Database::open_in_memory().await.unwrap();
        let ledger = Arc::new(InMemoryApplier::new("S"));
        let applier: Arc<dyn OperationApplier> = Arc::clone(&ledger) as Arc<dyn OperationApplier>;
        let registry = CollaboratorRegistry::new().register_all(&applier);
        Fixture {
            db,
            ledger,
            resolver: ConflictResolver::new(registry),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_keep_online_skips_the_item() {
        let fixture = setup().await;
        let id = conflicted_item(&fixture).await;

        let resolved = fixture
            .resolver
            .apply_resolution(
                &fixture.db,
                &id,
                ResolutionStrategy::KeepOnline,
                "manager",
                "server copy wins",
            )
            .await
            .unwrap();

        assert_eq!(resolved.status, QueueStatus::Skipped);
        assert_eq!(
            resolved.resolution_strategy,
            Some(ResolutionStrategy::KeepOnline)
        );
        assert_eq!(resolved.resolved_by.as_deref(), Some("manager"));
        assert_eq!(
            resolved.resolution_reason.as_deref(),
            Some("server copy wins")
        );
        assert_eq!(fixture.ledger.applied_count(), 0, "nothing was replayed");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_keep_offline_force_applies() {
        let fixture = setup().await;
        let id = conflicted_item(&fixture).await;

        let resolved = fixture
            .resolver
            .apply_resolution(
                &fixture.db,
                &id,
                ResolutionStrategy::KeepOffline,
                "manager",
                "the sale really happened",
            )
            .await
            .unwrap();

        assert_eq!(resolved.status, QueueStatus::Synced);
        assert!(resolved.server_id.is_some());
        assert_eq!(
            resolved.server_reference,
            fixture
                .ledger
                .outcome_for("INV-1")
                .map(|outcome| outcome.server_reference)
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_merge_rejected_without_collaborator_support() {
        let fixture = setup().await;
        let id = conflicted_item(&fixture).await;

        let result = fixture
            .resolver
            .apply_resolution(
                &fixture.db,
                &id,
                ResolutionStrategy::Merge,
                "manager",
                "",
            )
            .await;
        assert!(matches!(result, Err(Error::Validation(_))));

        // The item stays conflicted, available for another strategy
        let queue = LibSqlQueueRepository::new(fixture.db.connection());
        let item = queue.get(&id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Conflict);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_resolution_requires_conflict_status() {
        let fixture = setup().await;
        let queue = LibSqlQueueRepository::new(fixture.db.connection());
        let item = queue
            .enqueue(EnqueueRequest {
                device_id: "till-1".to_string(),
                payload: sample_sale("INV-2"),
                offline_timestamp: 1_000,
                actor: "ada".to_string(),
                priority: 5,
                max_attempts: DEFAULT_MAX_ATTEMPTS,
            })
            .await
            .unwrap();

        let result = fixture
            .resolver
            .apply_resolution(
                &fixture.db,
                &item.id,
                ResolutionStrategy::Skip,
                "manager",
                "",
            )
            .await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }
}
