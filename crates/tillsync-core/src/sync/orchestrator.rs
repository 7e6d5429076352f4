//! Sync session orchestrator
//!
//! Drives one bounded sync session: recovers stale claims, pulls due
//! items in priority-then-age order, and walks each through
//! claim -> checksum -> conflict check -> apply. One item's failure never
//! aborts the batch; session-level failures (store unreachable) abort and
//! are recorded as a `failed` session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::checksum;
use crate::db::{Database, LibSqlQueueRepository, LibSqlSessionRepository, QueueRepository,
    SessionRepository};
use crate::error::{Error, Result};
use crate::models::{ConflictKind, QueueItem, SessionStatus, SyncSession, TriggerKind};
use crate::retry::RetryPolicy;
use crate::sync::collaborators::{ApplyError, CollaboratorRegistry, LogEventSink, SyncEventSink};
use crate::sync::detector::ConflictDetector;

/// Claims older than this with no committed outcome are treated as
/// crash leftovers
pub const DEFAULT_STALE_CLAIM_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Default bound on items pulled per session
pub const DEFAULT_BATCH_LIMIT: usize = 50;

/// Per-session options
#[derive(Clone)]
pub struct SyncOptions {
    pub device_id: String,
    pub trigger: TriggerKind,
    /// Upper bound on due items pulled this session
    pub batch_limit: usize,
    /// Checked between items; when set, the session stops scheduling
    /// further items and records `cancelled`
    pub cancel: Option<Arc<AtomicBool>>,
}

impl SyncOptions {
    #[must_use]
    pub fn new(device_id: impl Into<String>, trigger: TriggerKind) -> Self {
        Self {
            device_id: device_id.into(),
            trigger,
            batch_limit: DEFAULT_BATCH_LIMIT,
            cancel: None,
        }
    }

    #[must_use]
    pub const fn with_batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = limit;
        self
    }

    #[must_use]
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

enum ItemOutcome {
    Synced,
    Failed,
    Conflict,
}

/// Runs sync sessions against a queue store and a set of collaborators
pub struct SyncOrchestrator {
    registry: CollaboratorRegistry,
    detector: ConflictDetector,
    policy: RetryPolicy,
    events: Arc<dyn SyncEventSink>,
    stale_claim_timeout: Duration,
}

impl SyncOrchestrator {
    /// Construct with an explicit collaborator registry; there are no
    /// dynamic lookups at apply time
    #[must_use]
    pub fn new(registry: CollaboratorRegistry, policy: RetryPolicy) -> Self {
        let detector = ConflictDetector::new(registry.clone());
        Self {
            registry,
            detector,
            policy,
            events: Arc::new(LogEventSink),
            stale_claim_timeout: DEFAULT_STALE_CLAIM_TIMEOUT,
        }
    }

    /// Replace the side-channel event sink
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn SyncEventSink>) -> Self {
        self.events = events;
        self
    }

    #[must_use]
    pub const fn with_stale_claim_timeout(mut self, timeout: Duration) -> Self {
        self.stale_claim_timeout = timeout;
        self
    }

    /// Run one session to completion (or cancellation) and return its
    /// finalized record
    pub async fn run_session(&self, db: &Database, options: SyncOptions) -> Result<SyncSession> {
        let conn = db.connection();
        let queue = LibSqlQueueRepository::new(conn);
        let sessions = LibSqlSessionRepository::new(conn);

        let mut session = SyncSession::start(options.device_id.clone(), options.trigger);
        sessions.create(&session).await?;

        if let Err(error) = self.drive(&queue, &mut session, &options).await {
            session.status = SessionStatus::Failed;
            session.error = Some(error.to_string());
            tracing::error!(session_id = %session.id, %error, "Sync session failed");
        }

        if session.status == SessionStatus::Running {
            session.status = if session.counts.failed == 0 && session.counts.conflicts == 0 {
                SessionStatus::Completed
            } else {
                SessionStatus::Partial
            };
        }
        session.completed_at = Some(chrono::Utc::now().timestamp_millis());
        sessions.finalize(&session).await?;

        Ok(session)
    }

    async fn drive(
        &self,
        queue: &LibSqlQueueRepository<'_>,
        session: &mut SyncSession,
        options: &SyncOptions,
    ) -> Result<()> {
        #[allow(clippy::cast_possible_truncation)]
        let stale_ms = self.stale_claim_timeout.as_millis() as i64;
        queue.recover_stale_syncing(stale_ms, &self.policy).await?;

        let due = queue
            .fetch_due(Some(&options.device_id), options.batch_limit)
            .await?;
        #[allow(clippy::cast_possible_truncation)]
        {
            session.counts.queued = due.len() as u32;
        }

        for item in due {
            if options.is_cancelled() {
                session.status = SessionStatus::Cancelled;
                tracing::info!(
                    session_id = %session.id,
                    processed = session.counts.processed,
                    "Sync session cancelled between items"
                );
                break;
            }

            // Claim-then-process: selection and the transition to
            // `syncing` are one atomic write, so a concurrent run on the
            // same device cannot double-apply this item
            if !queue.claim(&item.id).await? {
                session.counts.skipped += 1;
                continue;
            }

            session.counts.processed += 1;
            session.counts.record_kind(item.kind);

            match self.process_item(queue, &item).await {
                Ok(ItemOutcome::Synced) => session.counts.synced += 1,
                Ok(ItemOutcome::Conflict) => session.counts.conflicts += 1,
                Ok(ItemOutcome::Failed) | Err(_) => session.counts.failed += 1,
            }
        }

        Ok(())
    }

    /// One item's full pass. Returns Err only when even recording the
    /// outcome failed; the caller isolates that as an item failure.
    async fn process_item(
        &self,
        queue: &LibSqlQueueRepository<'_>,
        claimed: &QueueItem,
    ) -> Result<ItemOutcome> {
        let item = queue
            .get(&claimed.id)
            .await?
            .ok_or_else(|| Error::NotFound(claimed.id.to_string()))?;

        // Integrity gate: a payload that fails verification must never
        // reach a collaborator, and is never retried as a normal failure
        if !checksum::verify(&item)? {
            let details = json!({
                "expected_checksum": item.content_checksum,
                "computed_checksum": checksum::compute(&item.payload)?,
                "natural_key": item.payload.natural_key(),
            });
            queue
                .mark_conflict(&item.id, ConflictKind::Integrity, &details)
                .await?;
            self.events.item_conflicted(&item);
            return Ok(ItemOutcome::Conflict);
        }

        let decision = match self.detector.inspect(&item).await {
            Ok(decision) => decision,
            Err(Error::TransientApply(message)) => {
                return self.fail_item(queue, &item, &message).await;
            }
            Err(error) => return Err(error),
        };

        if let Some(kind) = decision.kind {
            queue.mark_conflict(&item.id, kind, &decision.details).await?;
            self.events.item_conflicted(&item);
            return Ok(ItemOutcome::Conflict);
        }

        let Some(applier) = self.registry.get(item.kind) else {
            // inspect() reports unregistered kinds as validation
            // conflicts, so a clear decision guarantees a collaborator
            return Err(Error::Validation(format!(
                "no collaborator registered for kind {}",
                item.kind
            )));
        };

        match applier.apply(&item.payload).await {
            Ok(outcome) => {
                queue
                    .mark_synced(&item.id, &outcome.server_id, &outcome.server_reference)
                    .await?;
                if let Some(synced) = queue.get(&item.id).await? {
                    self.events.item_synced(&synced);
                }
                Ok(ItemOutcome::Synced)
            }
            Err(ApplyError::Transient(message)) => self.fail_item(queue, &item, &message).await,
            Err(error @ (ApplyError::Validation(_) | ApplyError::MergeUnsupported)) => {
                let details = json!({
                    "rule": "collaborator_apply",
                    "detail": error.to_string(),
                    "natural_key": item.payload.natural_key(),
                });
                queue
                    .mark_conflict(&item.id, ConflictKind::Validation, &details)
                    .await?;
                self.events.item_conflicted(&item);
                Ok(ItemOutcome::Conflict)
            }
        }
    }

    async fn fail_item(
        &self,
        queue: &LibSqlQueueRepository<'_>,
        item: &QueueItem,
        message: &str,
    ) -> Result<ItemOutcome> {
        let updated = queue.mark_failed(&item.id, message, &self.policy).await?;
        if updated.is_exhausted() {
            let error = Error::ExhaustedRetries(updated.max_attempts);
            self.events.item_failed(&updated, &error.to_string());
        } else {
            self.events.item_failed(&updated, message);
        }
        Ok(ItemOutcome::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use pretty_assertions::assert_eq;

    use crate::testing::{sample_payment, sample_sale};
    use crate::models::{
        EnqueueRequest, OperationKind, OperationPayload, QueueStatus, ResolutionStrategy,
        DEFAULT_MAX_ATTEMPTS,
    };
    use crate::sync::collaborators::OperationApplier;
    use crate::sync::memory::InMemoryApplier;
    use crate::sync::resolver::ConflictResolver;

    struct Fixture {
        db: Database,
        ledger: Arc<InMemoryApplier>,
        registry: CollaboratorRegistry,
        orchestrator: SyncOrchestrator,
    }

    async fn setup() -> Fixture {
        let db = Database::open_in_memory().await.unwrap();
        let ledger = Arc::new(InMemoryApplier::new("S"));
        let applier: Arc<dyn OperationApplier> = Arc::clone(&ledger) as Arc<dyn OperationApplier>;
        let registry = CollaboratorRegistry::new().register_all(&applier);
        let orchestrator = SyncOrchestrator::new(registry.clone(), RetryPolicy::default());
        Fixture {
            db,
            ledger,
            registry,
            orchestrator,
        }
    }

    async fn enqueue(
        fixture: &Fixture,
        payload: OperationPayload,
        priority: i32,
        offline_timestamp: i64,
    ) -> QueueItem {
        let queue = LibSqlQueueRepository::new(fixture.db.connection());
        queue
            .enqueue(EnqueueRequest {
                device_id: "till-1".to_string(),
                payload,
                offline_timestamp,
                actor: "ada".to_string(),
                priority,
                max_attempts: DEFAULT_MAX_ATTEMPTS,
            })
            .await
            .unwrap()
    }

    async fn get(fixture: &Fixture, id: &crate::models::QueueId) -> QueueItem {
        let queue = LibSqlQueueRepository::new(fixture.db.connection());
        queue.get(id).await.unwrap().unwrap()
    }

    async fn run(fixture: &Fixture) -> SyncSession {
        fixture
            .orchestrator
            .run_session(
                &fixture.db,
                SyncOptions::new("till-1", TriggerKind::Manual),
            )
            .await
            .unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_clean_session_completes() {
        let fixture = setup().await;
        let item = enqueue(&fixture, sample_sale("INV-1"), 5, 1_000).await;

        let session = run(&fixture).await;
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.counts.queued, 1);
        assert_eq!(session.counts.processed, 1);
        assert_eq!(session.counts.synced, 1);
        assert_eq!(session.counts.by_kind[&OperationKind::Sale], 1);
        assert!(session.duration_ms().is_some());

        let synced = get(&fixture, &item.id).await;
        assert_eq!(synced.status, QueueStatus::Synced);
        assert_eq!(synced.server_reference.as_deref(), Some("S-0001"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_duplicate_submission_flags_conflict_with_server_identity() {
        let fixture = setup().await;
        // The same sale enqueued twice, as a flaky client would
        let first = enqueue(&fixture, sample_sale("INV-1"), 5, 1_000).await;
        let second = enqueue(&fixture, sample_sale("INV-1"), 5, 2_000).await;

        let session = run(&fixture).await;
        assert_eq!(session.status, SessionStatus::Partial);
        assert_eq!(session.counts.synced, 1);
        assert_eq!(session.counts.conflicts, 1);

        let applied = get(&fixture, &first.id).await;
        assert_eq!(applied.status, QueueStatus::Synced);

        let conflicted = get(&fixture, &second.id).await;
        assert_eq!(conflicted.status, QueueStatus::Conflict);
        assert_eq!(conflicted.conflict_kind, Some(ConflictKind::Duplicate));
        assert_eq!(
            conflicted.conflict_details.as_ref().unwrap()["server_id"],
            applied.server_id.unwrap().as_str()
        );

        // Exactly one server-side entity exists
        assert_eq!(fixture.ledger.applied_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_replay_after_lost_acknowledgment_is_idempotent() {
        let fixture = setup().await;
        let item = enqueue(&fixture, sample_sale("INV-1"), 5, 1_000).await;
        run(&fixture).await;
        assert_eq!(fixture.ledger.applied_count(), 1);

        // Crash-and-retry: the success acknowledgment was lost and the
        // item is queued again
        fixture
            .db
            .connection()
            .execute(
                "UPDATE queue_items SET status = 'pending', server_id = NULL,
                 server_reference = NULL WHERE id = ?",
                [item.id.as_str()],
            )
            .await
            .unwrap();

        let session = run(&fixture).await;
        assert_eq!(session.counts.conflicts, 1);

        let replayed = get(&fixture, &item.id).await;
        assert_eq!(replayed.conflict_kind, Some(ConflictKind::Duplicate));
        // No second server-side entity was created
        assert_eq!(fixture.ledger.applied_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_tampered_payload_is_an_integrity_conflict() {
        let fixture = setup().await;
        let item = enqueue(&fixture, sample_sale("INV-1"), 5, 1_000).await;

        // Mutate the queued payload without updating its checksum
        fixture
            .db
            .connection()
            .execute(
                "UPDATE queue_items
                 SET payload = replace(payload, '\"total_cents\":600', '\"total_cents\":1')
                 WHERE id = ?",
                [item.id.as_str()],
            )
            .await
            .unwrap();

        let session = run(&fixture).await;
        assert_eq!(session.counts.conflicts, 1);

        let flagged = get(&fixture, &item.id).await;
        assert_eq!(flagged.status, QueueStatus::Conflict);
        assert_eq!(flagged.conflict_kind, Some(ConflictKind::Integrity));
        // The payload never reached the collaborator
        assert_eq!(fixture.ledger.applied_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_transient_failure_retries_after_backoff() {
        let fixture = setup().await;
        let item = enqueue(&fixture, sample_sale("INV-1"), 5, 1_000).await;
        fixture.ledger.fail_next_applies(1);

        let session = run(&fixture).await;
        assert_eq!(session.status, SessionStatus::Partial);
        assert_eq!(session.counts.failed, 1);

        let failed = get(&fixture, &item.id).await;
        assert_eq!(failed.status, QueueStatus::Failed);
        assert_eq!(failed.attempts, 1);
        assert!(failed.not_before.is_some());

        // Not due yet: a session run before the gate passes does nothing
        let waiting = run(&fixture).await;
        assert_eq!(waiting.counts.processed, 0);

        // Open the gate and the item syncs
        fixture
            .db
            .connection()
            .execute(
                "UPDATE queue_items SET not_before = 0 WHERE id = ?",
                [item.id.as_str()],
            )
            .await
            .unwrap();
        let retried = run(&fixture).await;
        assert_eq!(retried.status, SessionStatus::Completed);
        assert_eq!(get(&fixture, &item.id).await.status, QueueStatus::Synced);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_poison_item_exhausts_and_surfaces() {
        let fixture = setup().await;
        let queue = LibSqlQueueRepository::new(fixture.db.connection());
        let item = queue
            .enqueue(EnqueueRequest {
                device_id: "till-1".to_string(),
                payload: sample_sale("INV-1"),
                offline_timestamp: 1_000,
                actor: "ada".to_string(),
                priority: 5,
                max_attempts: 2,
            })
            .await
            .unwrap();
        fixture.ledger.fail_next_applies(10);

        for _ in 0..2 {
            run(&fixture).await;
            fixture
                .db
                .connection()
                .execute(
                    "UPDATE queue_items SET not_before = 0 WHERE id = ?",
                    [item.id.as_str()],
                )
                .await
                .unwrap();
        }

        let exhausted = get(&fixture, &item.id).await;
        assert_eq!(exhausted.status, QueueStatus::Failed);
        assert!(exhausted.is_exhausted());

        // Exhausted items stop consuming batch slots
        let idle = run(&fixture).await;
        assert_eq!(idle.counts.processed, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_payment_against_voided_sale_is_data_mismatch() {
        let fixture = setup().await;
        fixture.ledger.seed_dependency("INV-1");
        fixture.ledger.void("INV-1");
        let item = enqueue(&fixture, sample_payment("PAY-1", "INV-1"), 8, 1_000).await;

        run(&fixture).await;
        let flagged = get(&fixture, &item.id).await;
        assert_eq!(flagged.conflict_kind, Some(ConflictKind::DataMismatch));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_conflict_resolution_round_trip_stays_resolved() {
        let fixture = setup().await;
        enqueue(&fixture, sample_sale("INV-1"), 5, 1_000).await;
        let duplicate = enqueue(&fixture, sample_sale("INV-1"), 5, 2_000).await;
        run(&fixture).await;
        assert_eq!(
            get(&fixture, &duplicate.id).await.conflict_kind,
            Some(ConflictKind::Duplicate)
        );

        let resolver = ConflictResolver::new(fixture.registry.clone());
        resolver
            .apply_resolution(
                &fixture.db,
                &duplicate.id,
                ResolutionStrategy::KeepOnline,
                "manager",
                "first submission won",
            )
            .await
            .unwrap();
        assert_eq!(
            get(&fixture, &duplicate.id).await.status,
            QueueStatus::Skipped
        );

        // A later sync run never re-raises the resolved conflict
        let session = run(&fixture).await;
        assert_eq!(session.counts.queued, 0);
        assert_eq!(
            get(&fixture, &duplicate.id).await.status,
            QueueStatus::Skipped
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_batch_isolates_item_outcomes() {
        let fixture = setup().await;
        // Payment referencing a missing sale conflicts; the sale syncs
        let bad = enqueue(&fixture, sample_payment("PAY-1", "INV-404"), 9, 1_000).await;
        let good = enqueue(&fixture, sample_sale("INV-1"), 5, 2_000).await;

        let session = run(&fixture).await;
        assert_eq!(session.status, SessionStatus::Partial);
        assert_eq!(session.counts.processed, 2);
        assert_eq!(session.counts.synced, 1);
        assert_eq!(session.counts.conflicts, 1);
        assert_eq!(get(&fixture, &bad.id).await.status, QueueStatus::Conflict);
        assert_eq!(get(&fixture, &good.id).await.status, QueueStatus::Synced);
    }

    /// Event sink that cancels the session after the first synced item
    struct CancelAfterFirst {
        flag: Arc<AtomicBool>,
        seen: Mutex<u32>,
    }

    impl SyncEventSink for CancelAfterFirst {
        fn item_synced(&self, _item: &QueueItem) {
            let mut seen = self.seen.lock().unwrap();
            *seen += 1;
            if *seen == 1 {
                self.flag.store(true, Ordering::Relaxed);
            }
        }
        fn item_failed(&self, _item: &QueueItem, _error: &str) {}
        fn item_conflicted(&self, _item: &QueueItem) {}
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cancellation_between_items_keeps_completed_outcomes() {
        let db = Database::open_in_memory().await.unwrap();
        let ledger = Arc::new(InMemoryApplier::new("S"));
        let applier: Arc<dyn OperationApplier> = Arc::clone(&ledger) as Arc<dyn OperationApplier>;
        let registry = CollaboratorRegistry::new().register_all(&applier);

        let flag = Arc::new(AtomicBool::new(false));
        let orchestrator = SyncOrchestrator::new(registry, RetryPolicy::default())
            .with_event_sink(Arc::new(CancelAfterFirst {
                flag: Arc::clone(&flag),
                seen: Mutex::new(0),
            }));

        let queue = LibSqlQueueRepository::new(db.connection());
        let first = queue
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
        let second = queue
            .enqueue(EnqueueRequest {
                device_id: "till-1".to_string(),
                payload: sample_sale("INV-2"),
                offline_timestamp: 2_000,
                actor: "ada".to_string(),
                priority: 5,
                max_attempts: DEFAULT_MAX_ATTEMPTS,
            })
            .await
            .unwrap();

        let session = orchestrator
            .run_session(
                &db,
                SyncOptions::new("till-1", TriggerKind::Manual).with_cancel_flag(flag),
            )
            .await
            .unwrap();

        assert_eq!(session.status, SessionStatus::Cancelled);
        assert_eq!(session.counts.processed, 1);
        assert_eq!(session.counts.synced, 1);

        // The completed outcome is kept; the unprocessed item stays due
        assert_eq!(
            queue.get(&first.id).await.unwrap().unwrap().status,
            QueueStatus::Synced
        );
        assert_eq!(
            queue.get(&second.id).await.unwrap().unwrap().status,
            QueueStatus::Pending
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unreachable_store_records_failed_session() {
        let fixture = setup().await;
        fixture
            .db
            .connection()
            .execute("DROP TABLE queue_items", ())
            .await
            .unwrap();

        let session = run(&fixture).await;
        assert_eq!(session.status, SessionStatus::Failed);
        assert_eq!(session.counts.processed, 0);
        assert!(session.error.is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_payments_preempt_older_sales() {
        let fixture = setup().await;
        enqueue(&fixture, sample_sale("INV-1"), 5, 1_000).await;
        let payment = enqueue(&fixture, sample_payment("PAY-1", "INV-1"), 9, 5_000).await;

        // The payment is serviced first despite being newer; its sale has
        // not synced yet, so the dependency check flags it
        let session = run(&fixture).await;
        assert_eq!(session.counts.processed, 2);
        let flagged = get(&fixture, &payment.id).await;
        assert_eq!(flagged.conflict_kind, Some(ConflictKind::Validation));
    }
}
