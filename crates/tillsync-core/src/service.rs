//! Shared offline-queue service wrapper used across clients.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::db::{
    Database, LibSqlQueueRepository, LibSqlSessionRepository, QueueRepository, QueueStats,
    SessionRepository,
};
use crate::error::Result;
use crate::models::{
    EnqueueRequest, OperationPayload, QueueId, QueueItem, ResolutionStrategy, SessionId,
    SyncSession, TriggerKind, DEFAULT_MAX_ATTEMPTS,
};
use crate::retry::RetryPolicy;
use crate::sync::{CollaboratorRegistry, ConflictResolver, SyncOptions, SyncOrchestrator};

/// Thread-safe service for queue, session, and resolution operations.
///
/// Holding the database lock for the whole of `run_sync` also serializes
/// in-process sessions; cross-process exclusion comes from the atomic
/// per-item claim in the store.
#[derive(Clone)]
pub struct OfflineQueueService {
    db: Arc<Mutex<Database>>,
    orchestrator: Arc<SyncOrchestrator>,
    resolver: Arc<ConflictResolver>,
    max_attempts: u32,
}

impl OfflineQueueService {
    /// Open a service over a database file, creating parent directories
    /// as needed.
    pub async fn open_path(
        db_path: impl Into<PathBuf>,
        registry: CollaboratorRegistry,
        policy: RetryPolicy,
    ) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::open(&db_path).await?;
        Ok(Self::new(db, registry, policy))
    }

    /// Open an in-memory service (primarily for tests).
    pub async fn open_in_memory(registry: CollaboratorRegistry) -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Ok(Self::new(db, registry, RetryPolicy::default()))
    }

    fn new(db: Database, registry: CollaboratorRegistry, policy: RetryPolicy) -> Self {
        let missing = registry.missing_kinds();
        if !missing.is_empty() {
            tracing::warn!(
                ?missing,
                "Operation kinds without a registered collaborator will conflict on sync"
            );
        }
        Self {
            db: Arc::new(Mutex::new(db)),
            orchestrator: Arc::new(SyncOrchestrator::new(registry.clone(), policy)),
            resolver: Arc::new(ConflictResolver::new(registry)),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Override the per-item attempt bound used for new enqueues.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Validate and enqueue an offline operation.
    pub async fn enqueue(
        &self,
        device_id: impl Into<String>,
        payload: OperationPayload,
        offline_timestamp: i64,
        actor: impl Into<String>,
        priority: Option<i32>,
    ) -> Result<QueueItem> {
        let priority = priority.unwrap_or_else(|| payload.kind().default_priority());
        let db = self.db.lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        repo.enqueue(EnqueueRequest {
            device_id: device_id.into(),
            payload,
            offline_timestamp,
            actor: actor.into(),
            priority,
            max_attempts: self.max_attempts,
        })
        .await
    }

    /// Run one sync session for a device.
    pub async fn run_sync(
        &self,
        device_id: impl Into<String>,
        trigger: TriggerKind,
        batch_limit: Option<usize>,
    ) -> Result<SyncSession> {
        let mut options = SyncOptions::new(device_id, trigger);
        if let Some(limit) = batch_limit {
            options = options.with_batch_limit(limit);
        }
        let db = self.db.lock().await;
        self.orchestrator.run_session(&db, options).await
    }

    /// Fetch one queue item.
    pub async fn get_item(&self, id: &QueueId) -> Result<Option<QueueItem>> {
        let db = self.db.lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        repo.get(id).await
    }

    /// Items not yet terminally disposed, in due order.
    pub async fn list_pending(
        &self,
        device_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<QueueItem>> {
        let db = self.db.lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        repo.list_active(device_id, limit).await
    }

    /// Items awaiting conflict resolution.
    pub async fn list_conflicts(
        &self,
        device_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<QueueItem>> {
        let db = self.db.lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        repo.list_conflicts(device_id, limit).await
    }

    /// Queue counts by status and operation kind.
    pub async fn stats(&self, device_id: Option<&str>) -> Result<QueueStats> {
        let db = self.db.lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        repo.stats(device_id).await
    }

    /// Apply an operator-chosen resolution strategy to a conflict.
    pub async fn resolve_conflict(
        &self,
        id: &QueueId,
        strategy: ResolutionStrategy,
        actor: &str,
        reason: &str,
    ) -> Result<QueueItem> {
        let db = self.db.lock().await;
        self.resolver
            .apply_resolution(&db, id, strategy, actor, reason)
            .await
    }

    /// Operator-initiated reset of a failed or conflicted item.
    pub async fn retry_item(&self, id: &QueueId) -> Result<QueueItem> {
        let db = self.db.lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        repo.reset_for_retry(id).await
    }

    /// Retention purge of synced items. Returns the number deleted.
    pub async fn purge_synced(
        &self,
        older_than_days: u32,
        device_id: Option<&str>,
    ) -> Result<u64> {
        let db = self.db.lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        repo.purge_synced(older_than_days, device_id).await
    }

    /// Fetch one sync session record.
    pub async fn get_session(&self, id: &SessionId) -> Result<Option<SyncSession>> {
        let db = self.db.lock().await;
        let repo = LibSqlSessionRepository::new(db.connection());
        repo.get(id).await
    }

    /// Most recent sessions, newest first.
    pub async fn list_sessions(
        &self,
        device_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SyncSession>> {
        let db = self.db.lock().await;
        let repo = LibSqlSessionRepository::new(db.connection());
        repo.list_recent(device_id, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::testing::sample_sale;
    use crate::models::{QueueStatus, SessionStatus};
    use crate::sync::{InMemoryApplier, OperationApplier};

    async fn service() -> OfflineQueueService {
        let applier: Arc<dyn OperationApplier> = Arc::new(InMemoryApplier::new("S"));
        let registry = CollaboratorRegistry::new().register_all(&applier);
        OfflineQueueService::open_in_memory(registry).await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_enqueue_sync_inspect_round_trip() {
        let service = service().await;

        let item = service
            .enqueue("till-1", sample_sale("INV-1"), 1_000, "ada", None)
            .await
            .unwrap();
        assert_eq!(service.list_pending(Some("till-1"), 10).await.unwrap().len(), 1);

        let session = service
            .run_sync("till-1", TriggerKind::Manual, None)
            .await
            .unwrap();
        assert_eq!(session.status, SessionStatus::Completed);

        let synced = service.get_item(&item.id).await.unwrap().unwrap();
        assert_eq!(synced.status, QueueStatus::Synced);

        let sessions = service.list_sessions(Some("till-1"), 10).await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(
            service.get_session(&session.id).await.unwrap().unwrap().id,
            session.id
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_default_priority_follows_kind() {
        let service = service().await;
        let item = service
            .enqueue("till-1", sample_sale("INV-1"), 1_000, "ada", None)
            .await
            .unwrap();
        assert_eq!(item.priority, 5);

        let urgent = service
            .enqueue("till-1", sample_sale("INV-2"), 1_000, "ada", Some(9))
            .await
            .unwrap();
        assert_eq!(urgent.priority, 9);
    }
}
