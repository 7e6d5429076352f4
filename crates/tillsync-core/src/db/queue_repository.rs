//! Queue item repository implementation

#![allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // SQLite stores counters as i64
#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use std::collections::BTreeMap;

use libsql::{params, Connection};

use crate::error::{Error, Result};
use crate::models::{
    ConflictKind, EnqueueRequest, OperationKind, QueueId, QueueItem, QueueStatus,
    ResolutionStrategy,
};
use crate::retry::RetryPolicy;

/// Column list shared by every SELECT; order matches `parse_item`
const COLUMNS: &str = "id, device_id, kind, payload, content_checksum, offline_timestamp, \
     enqueued_by, priority, status, attempts, max_attempts, last_attempt_at, not_before, \
     last_error, server_id, server_reference, conflict_kind, conflict_details, \
     resolution_strategy, resolved_by, resolved_at, resolution_reason, created_at, updated_at";

/// An item is due when it is pending, or failed with retry budget left,
/// and its backoff gate (if any) has passed. The bound parameter is "now".
const DUE_PREDICATE: &str = "(status = 'pending' OR (status = 'failed' AND attempts < max_attempts)) \
     AND (not_before IS NULL OR not_before <= ?)";

/// Counts of queue items by status and by operation kind
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct QueueStats {
    pub total: u64,
    pub by_status: BTreeMap<QueueStatus, u64>,
    pub by_kind: BTreeMap<OperationKind, u64>,
}

/// Trait for queue storage operations (async)
#[allow(async_fn_in_trait)]
pub trait QueueRepository {
    /// Validate and persist a new operation with status `pending`
    async fn enqueue(&self, request: EnqueueRequest) -> Result<QueueItem>;

    /// Get an item by ID
    async fn get(&self, id: &QueueId) -> Result<Option<QueueItem>>;

    /// Items eligible for sync, ordered by priority descending then
    /// offline timestamp ascending (oldest due work first, ties broken
    /// by importance)
    async fn fetch_due(&self, device_id: Option<&str>, limit: usize) -> Result<Vec<QueueItem>>;

    /// Atomically transition a due item to `syncing`. Returns false when
    /// the item was not claimable (already claimed by a concurrent run,
    /// resolved, or no longer due).
    async fn claim(&self, id: &QueueId) -> Result<bool>;

    /// Record a successful apply: server identity plus terminal `synced`
    /// status, in one atomic write
    async fn mark_synced(&self, id: &QueueId, server_id: &str, server_reference: &str)
        -> Result<()>;

    /// Record a failed attempt: increments `attempts`, sets the backoff
    /// gate while retry budget remains, drops the gate once exhausted
    async fn mark_failed(
        &self,
        id: &QueueId,
        error_info: &str,
        policy: &RetryPolicy,
    ) -> Result<QueueItem>;

    /// Flag the item as unsafe to replay, with a structured explanation
    async fn mark_conflict(
        &self,
        id: &QueueId,
        kind: ConflictKind,
        details: &serde_json::Value,
    ) -> Result<()>;

    /// Record an operator resolution: the chosen strategy, who and why,
    /// and the resulting status (plus server identity when the resolution
    /// replayed the item)
    async fn record_resolution(
        &self,
        id: &QueueId,
        strategy: ResolutionStrategy,
        new_status: QueueStatus,
        actor: &str,
        reason: &str,
        server: Option<(&str, &str)>,
    ) -> Result<()>;

    /// Operator-initiated reset: clears attempts, backoff, and conflict
    /// flags, returning the item to `pending`
    async fn reset_for_retry(&self, id: &QueueId) -> Result<QueueItem>;

    /// Items not yet terminally disposed (pending, syncing, failed),
    /// in due order
    async fn list_active(&self, device_id: Option<&str>, limit: usize) -> Result<Vec<QueueItem>>;

    /// Items awaiting conflict resolution, most recently flagged first
    async fn list_conflicts(&self, device_id: Option<&str>, limit: usize)
        -> Result<Vec<QueueItem>>;

    /// Counts by status and by operation kind
    async fn stats(&self, device_id: Option<&str>) -> Result<QueueStats>;

    /// Delete `synced` items past the retention window. Irreversible;
    /// never touches any other status. Returns the number deleted.
    async fn purge_synced(&self, older_than_days: u32, device_id: Option<&str>) -> Result<u64>;

    /// Session-start reconciliation: items stranded in `syncing` longer
    /// than the timeout (a crash mid-item) become retryable failures.
    /// Returns the number recovered.
    async fn recover_stale_syncing(
        &self,
        stale_after_ms: i64,
        policy: &RetryPolicy,
    ) -> Result<u64>;
}

/// libSQL implementation of `QueueRepository`
pub struct LibSqlQueueRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlQueueRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Parse a queue item from a database row (column order = `COLUMNS`)
fn parse_item(row: &libsql::Row) -> Result<QueueItem> {
    let id: String = row.get(0)?;
    let kind: String = row.get(2)?;
    let payload_json: String = row.get(3)?;
    let status: String = row.get(8)?;

    Ok(QueueItem {
        id: id
            .parse()
            .map_err(|_| Error::Database(format!("invalid queue id: {id}")))?,
        device_id: row.get(1)?,
        kind: kind.parse()?,
        payload: serde_json::from_str(&payload_json)?,
        content_checksum: row.get(4)?,
        offline_timestamp: row.get(5)?,
        enqueued_by: row.get(6)?,
        priority: row.get(7)?,
        status: status.parse()?,
        attempts: row.get::<i64>(9)? as u32,
        max_attempts: row.get::<i64>(10)? as u32,
        last_attempt_at: row.get(11)?,
        not_before: row.get(12)?,
        last_error: row.get(13)?,
        server_id: row.get(14)?,
        server_reference: row.get(15)?,
        conflict_kind: row
            .get::<Option<String>>(16)?
            .map(|value| value.parse())
            .transpose()?,
        conflict_details: row
            .get::<Option<String>>(17)?
            .map(|value| serde_json::from_str(&value))
            .transpose()?,
        resolution_strategy: row
            .get::<Option<String>>(18)?
            .map(|value| value.parse())
            .transpose()?,
        resolved_by: row.get(19)?,
        resolved_at: row.get(20)?,
        resolution_reason: row.get(21)?,
        created_at: row.get(22)?,
        updated_at: row.get(23)?,
    })
}

impl LibSqlQueueRepository<'_> {
    async fn collect(&self, sql: &str, params: impl libsql::params::IntoParams) -> Result<Vec<QueueItem>> {
        let mut rows = self.conn.query(sql, params).await?;
        let mut items = Vec::new();
        while let Some(row) = rows.next().await? {
            items.push(parse_item(&row)?);
        }
        Ok(items)
    }
}

impl QueueRepository for LibSqlQueueRepository<'_> {
    async fn enqueue(&self, request: EnqueueRequest) -> Result<QueueItem> {
        if request.device_id.trim().is_empty() {
            return Err(Error::Validation("device_id must not be empty".to_string()));
        }
        request.payload.validate()?;

        let item = QueueItem::from_request(request)?;
        let payload_json = serde_json::to_string(&item.payload)?;

        self.conn
            .execute(
                "INSERT INTO queue_items (
                    id, device_id, kind, payload, content_checksum, offline_timestamp,
                    enqueued_by, priority, status, attempts, max_attempts,
                    created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    item.id.as_str(),
                    item.device_id.clone(),
                    item.kind.as_str(),
                    payload_json,
                    item.content_checksum.clone(),
                    item.offline_timestamp,
                    item.enqueued_by.clone(),
                    i64::from(item.priority),
                    item.status.as_str(),
                    i64::from(item.attempts),
                    i64::from(item.max_attempts),
                    item.created_at,
                    item.updated_at
                ],
            )
            .await?;

        tracing::debug!(
            queue_id = %item.id,
            device = %item.device_id,
            kind = %item.kind,
            priority = item.priority,
            "Enqueued offline operation"
        );

        Ok(item)
    }

    async fn get(&self, id: &QueueId) -> Result<Option<QueueItem>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {COLUMNS} FROM queue_items WHERE id = ?"),
                [id.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(parse_item(&row)?)),
            None => Ok(None),
        }
    }

    async fn fetch_due(&self, device_id: Option<&str>, limit: usize) -> Result<Vec<QueueItem>> {
        let now = now_ms();
        let order = "ORDER BY priority DESC, offline_timestamp ASC LIMIT ?";

        if let Some(device) = device_id {
            self.collect(
                &format!(
                    "SELECT {COLUMNS} FROM queue_items
                     WHERE device_id = ? AND {DUE_PREDICATE} {order}"
                ),
                params![device, now, limit as i64],
            )
            .await
        } else {
            self.collect(
                &format!("SELECT {COLUMNS} FROM queue_items WHERE {DUE_PREDICATE} {order}"),
                params![now, limit as i64],
            )
            .await
        }
    }

    async fn claim(&self, id: &QueueId) -> Result<bool> {
        let now = now_ms();
        let rows = self
            .conn
            .execute(
                &format!(
                    "UPDATE queue_items
                     SET status = 'syncing', last_attempt_at = ?, updated_at = ?
                     WHERE id = ? AND {DUE_PREDICATE}"
                ),
                params![now, now, id.as_str(), now],
            )
            .await?;

        Ok(rows == 1)
    }

    async fn mark_synced(
        &self,
        id: &QueueId,
        server_id: &str,
        server_reference: &str,
    ) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE queue_items
                 SET status = 'synced', server_id = ?, server_reference = ?,
                     last_error = NULL, not_before = NULL, updated_at = ?
                 WHERE id = ? AND status = 'syncing'",
                params![server_id, server_reference, now_ms(), id.as_str()],
            )
            .await?;

        if rows == 0 {
            return Err(Error::Database(format!(
                "cannot mark item {id} synced: not claimed"
            )));
        }

        tracing::info!(queue_id = %id, server_reference, "Queue item synced");
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: &QueueId,
        error_info: &str,
        policy: &RetryPolicy,
    ) -> Result<QueueItem> {
        let item = self
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        let attempts = item.attempts + 1;
        let now = now_ms();

        if RetryPolicy::should_give_up(attempts, item.max_attempts) {
            self.conn
                .execute(
                    "UPDATE queue_items
                     SET status = 'failed', attempts = ?, last_attempt_at = ?,
                         last_error = ?, not_before = NULL, updated_at = ?
                     WHERE id = ?",
                    params![i64::from(attempts), now, error_info, now, id.as_str()],
                )
                .await?;
            tracing::warn!(
                queue_id = %id,
                attempts,
                max_attempts = item.max_attempts,
                "Queue item exhausted its retry budget"
            );
        } else {
            let gate = policy.next_eligible(attempts, now);
            self.conn
                .execute(
                    "UPDATE queue_items
                     SET status = 'failed', attempts = ?, last_attempt_at = ?,
                         last_error = ?, not_before = ?, updated_at = ?
                     WHERE id = ?",
                    params![i64::from(attempts), now, error_info, gate, now, id.as_str()],
                )
                .await?;
            tracing::debug!(queue_id = %id, attempts, not_before = gate, "Queue item failed; retry scheduled");
        }

        self.get(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    async fn mark_conflict(
        &self,
        id: &QueueId,
        kind: ConflictKind,
        details: &serde_json::Value,
    ) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE queue_items
                 SET status = 'conflict', conflict_kind = ?, conflict_details = ?,
                     not_before = NULL, updated_at = ?
                 WHERE id = ?",
                params![
                    kind.as_str(),
                    serde_json::to_string(details)?,
                    now_ms(),
                    id.as_str()
                ],
            )
            .await?;

        if rows == 0 {
            return Err(Error::NotFound(id.to_string()));
        }

        tracing::warn!(queue_id = %id, kind = %kind, "Queue item flagged as conflict");
        Ok(())
    }

    async fn record_resolution(
        &self,
        id: &QueueId,
        strategy: ResolutionStrategy,
        new_status: QueueStatus,
        actor: &str,
        reason: &str,
        server: Option<(&str, &str)>,
    ) -> Result<()> {
        let now = now_ms();
        let rows = if let Some((server_id, server_reference)) = server {
            self.conn
                .execute(
                    "UPDATE queue_items
                     SET status = ?, resolution_strategy = ?, resolved_by = ?,
                         resolved_at = ?, resolution_reason = ?,
                         server_id = ?, server_reference = ?, updated_at = ?
                     WHERE id = ? AND status = 'conflict'",
                    params![
                        new_status.as_str(),
                        strategy.as_str(),
                        actor,
                        now,
                        reason,
                        server_id,
                        server_reference,
                        now,
                        id.as_str()
                    ],
                )
                .await?
        } else {
            self.conn
                .execute(
                    "UPDATE queue_items
                     SET status = ?, resolution_strategy = ?, resolved_by = ?,
                         resolved_at = ?, resolution_reason = ?, updated_at = ?
                     WHERE id = ? AND status = 'conflict'",
                    params![
                        new_status.as_str(),
                        strategy.as_str(),
                        actor,
                        now,
                        reason,
                        now,
                        id.as_str()
                    ],
                )
                .await?
        };

        if rows == 0 {
            return Err(Error::Validation(format!(
                "item {id} is not awaiting conflict resolution"
            )));
        }

        tracing::info!(
            queue_id = %id,
            strategy = %strategy,
            resolved_by = actor,
            status = %new_status,
            "Conflict resolved"
        );
        Ok(())
    }

    async fn reset_for_retry(&self, id: &QueueId) -> Result<QueueItem> {
        let rows = self
            .conn
            .execute(
                "UPDATE queue_items
                 SET status = 'pending', attempts = 0, not_before = NULL,
                     last_error = NULL, conflict_kind = NULL, conflict_details = NULL,
                     updated_at = ?
                 WHERE id = ? AND status IN ('failed', 'conflict')",
                params![now_ms(), id.as_str()],
            )
            .await?;

        if rows == 0 {
            return Err(Error::Validation(format!(
                "item {id} is not in a resettable state"
            )));
        }

        tracing::info!(queue_id = %id, "Queue item reset for retry");
        self.get(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    async fn list_active(&self, device_id: Option<&str>, limit: usize) -> Result<Vec<QueueItem>> {
        let predicate = "status IN ('pending', 'syncing', 'failed')";
        let order = "ORDER BY priority DESC, offline_timestamp ASC LIMIT ?";

        if let Some(device) = device_id {
            self.collect(
                &format!(
                    "SELECT {COLUMNS} FROM queue_items
                     WHERE device_id = ? AND {predicate} {order}"
                ),
                params![device, limit as i64],
            )
            .await
        } else {
            self.collect(
                &format!("SELECT {COLUMNS} FROM queue_items WHERE {predicate} {order}"),
                params![limit as i64],
            )
            .await
        }
    }

    async fn list_conflicts(
        &self,
        device_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<QueueItem>> {
        let order = "ORDER BY updated_at DESC LIMIT ?";

        if let Some(device) = device_id {
            self.collect(
                &format!(
                    "SELECT {COLUMNS} FROM queue_items
                     WHERE device_id = ? AND status = 'conflict' {order}"
                ),
                params![device, limit as i64],
            )
            .await
        } else {
            self.collect(
                &format!("SELECT {COLUMNS} FROM queue_items WHERE status = 'conflict' {order}"),
                params![limit as i64],
            )
            .await
        }
    }

    async fn stats(&self, device_id: Option<&str>) -> Result<QueueStats> {
        let mut stats = QueueStats::default();

        let status_sql = device_id.map_or(
            "SELECT status, COUNT(*) FROM queue_items GROUP BY status".to_string(),
            |_| {
                "SELECT status, COUNT(*) FROM queue_items WHERE device_id = ? GROUP BY status"
                    .to_string()
            },
        );
        let mut rows = if let Some(device) = device_id {
            self.conn.query(&status_sql, [device]).await?
        } else {
            self.conn.query(&status_sql, ()).await?
        };
        while let Some(row) = rows.next().await? {
            let status: QueueStatus = row.get::<String>(0)?.parse()?;
            let count = row.get::<i64>(1)? as u64;
            stats.by_status.insert(status, count);
            stats.total += count;
        }

        let kind_sql = device_id.map_or(
            "SELECT kind, COUNT(*) FROM queue_items GROUP BY kind".to_string(),
            |_| "SELECT kind, COUNT(*) FROM queue_items WHERE device_id = ? GROUP BY kind".to_string(),
        );
        let mut rows = if let Some(device) = device_id {
            self.conn.query(&kind_sql, [device]).await?
        } else {
            self.conn.query(&kind_sql, ()).await?
        };
        while let Some(row) = rows.next().await? {
            let kind: OperationKind = row.get::<String>(0)?.parse()?;
            stats.by_kind.insert(kind, row.get::<i64>(1)? as u64);
        }

        Ok(stats)
    }

    async fn purge_synced(&self, older_than_days: u32, device_id: Option<&str>) -> Result<u64> {
        let cutoff = now_ms() - i64::from(older_than_days) * 86_400_000;

        let deleted = if let Some(device) = device_id {
            self.conn
                .execute(
                    "DELETE FROM queue_items
                     WHERE status = 'synced' AND updated_at < ? AND device_id = ?",
                    params![cutoff, device],
                )
                .await?
        } else {
            self.conn
                .execute(
                    "DELETE FROM queue_items WHERE status = 'synced' AND updated_at < ?",
                    params![cutoff],
                )
                .await?
        };

        if deleted > 0 {
            tracing::info!(deleted, older_than_days, "Purged synced queue items");
        }
        Ok(deleted)
    }

    async fn recover_stale_syncing(
        &self,
        stale_after_ms: i64,
        policy: &RetryPolicy,
    ) -> Result<u64> {
        let now = now_ms();
        let cutoff = now - stale_after_ms;
        let gate = policy.next_eligible(1, now);

        let recovered = self
            .conn
            .execute(
                "UPDATE queue_items
                 SET status = 'failed', attempts = attempts + 1,
                     last_error = 'sync interrupted; claim released after stale timeout',
                     not_before = ?, last_attempt_at = ?, updated_at = ?
                 WHERE status = 'syncing' AND updated_at < ?",
                params![gate, now, now, cutoff],
            )
            .await?;

        if recovered > 0 {
            tracing::warn!(recovered, "Recovered queue items stranded in syncing");
        }
        Ok(recovered)
    }
}
