//! Sync session repository implementation

use libsql::{params, Connection};

use crate::error::{Error, Result};
use crate::models::{SessionCounts, SessionId, SyncSession};

const COLUMNS: &str = "id, device_id, direction, trigger_kind, status, started_at, completed_at, \
     queued, processed, synced, failed, conflicts, skipped, by_kind, error";

/// Trait for sync session log operations (async)
#[allow(async_fn_in_trait)]
pub trait SessionRepository {
    /// Persist a newly started session
    async fn create(&self, session: &SyncSession) -> Result<()>;

    /// Record the final outcome. A session is finalized exactly once;
    /// the record is immutable afterward.
    async fn finalize(&self, session: &SyncSession) -> Result<()>;

    /// Get a session by ID
    async fn get(&self, id: &SessionId) -> Result<Option<SyncSession>>;

    /// Most recent sessions, newest first
    async fn list_recent(&self, device_id: Option<&str>, limit: usize)
        -> Result<Vec<SyncSession>>;
}

/// libSQL implementation of `SessionRepository`
pub struct LibSqlSessionRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlSessionRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn parse_session(row: &libsql::Row) -> Result<SyncSession> {
    let id: String = row.get(0)?;
    let direction: String = row.get(2)?;
    let trigger: String = row.get(3)?;
    let status: String = row.get(4)?;

    let by_kind = match row.get::<Option<String>>(13)? {
        Some(json) => serde_json::from_str(&json)?,
        None => std::collections::BTreeMap::new(),
    };

    Ok(SyncSession {
        id: id
            .parse()
            .map_err(|_| Error::Database(format!("invalid session id: {id}")))?,
        device_id: row.get(1)?,
        direction: direction.parse()?,
        trigger: trigger.parse()?,
        status: status.parse()?,
        started_at: row.get(5)?,
        completed_at: row.get(6)?,
        counts: SessionCounts {
            queued: row.get::<i64>(7)? as u32,
            processed: row.get::<i64>(8)? as u32,
            synced: row.get::<i64>(9)? as u32,
            failed: row.get::<i64>(10)? as u32,
            conflicts: row.get::<i64>(11)? as u32,
            skipped: row.get::<i64>(12)? as u32,
            by_kind,
        },
        error: row.get(14)?,
    })
}

impl SessionRepository for LibSqlSessionRepository<'_> {
    async fn create(&self, session: &SyncSession) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO sync_sessions (
                    id, device_id, direction, trigger_kind, status, started_at
                ) VALUES (?, ?, ?, ?, ?, ?)",
                params![
                    session.id.as_str(),
                    session.device_id.clone(),
                    session.direction.as_str(),
                    session.trigger.as_str(),
                    session.status.as_str(),
                    session.started_at
                ],
            )
            .await?;

        tracing::debug!(
            session_id = %session.id,
            device = %session.device_id,
            trigger = session.trigger.as_str(),
            "Sync session started"
        );
        Ok(())
    }

    async fn finalize(&self, session: &SyncSession) -> Result<()> {
        let completed_at = session
            .completed_at
            .ok_or_else(|| Error::Database("finalize requires completed_at".to_string()))?;
        let by_kind = serde_json::to_string(&session.counts.by_kind)?;

        let rows = if let Some(error) = session.error.as_deref() {
            self.conn
                .execute(
                    "UPDATE sync_sessions
                     SET status = ?, completed_at = ?, queued = ?, processed = ?,
                         synced = ?, failed = ?, conflicts = ?, skipped = ?,
                         by_kind = ?, error = ?
                     WHERE id = ? AND completed_at IS NULL",
                    params![
                        session.status.as_str(),
                        completed_at,
                        i64::from(session.counts.queued),
                        i64::from(session.counts.processed),
                        i64::from(session.counts.synced),
                        i64::from(session.counts.failed),
                        i64::from(session.counts.conflicts),
                        i64::from(session.counts.skipped),
                        by_kind,
                        error,
                        session.id.as_str()
                    ],
                )
                .await?
        } else {
            self.conn
                .execute(
                    "UPDATE sync_sessions
                     SET status = ?, completed_at = ?, queued = ?, processed = ?,
                         synced = ?, failed = ?, conflicts = ?, skipped = ?,
                         by_kind = ?
                     WHERE id = ? AND completed_at IS NULL",
                    params![
                        session.status.as_str(),
                        completed_at,
                        i64::from(session.counts.queued),
                        i64::from(session.counts.processed),
                        i64::from(session.counts.synced),
                        i64::from(session.counts.failed),
                        i64::from(session.counts.conflicts),
                        i64::from(session.counts.skipped),
                        by_kind,
                        session.id.as_str()
                    ],
                )
                .await?
        };

        if rows == 0 {
            return Err(Error::Database(format!(
                "session {} was already finalized",
                session.id
            )));
        }

        tracing::info!(
            session_id = %session.id,
            status = session.status.as_str(),
            processed = session.counts.processed,
            synced = session.counts.synced,
            failed = session.counts.failed,
            conflicts = session.counts.conflicts,
            duration_ms = session.duration_ms().unwrap_or(0),
            "Sync session finished"
        );
        Ok(())
    }

    async fn get(&self, id: &SessionId) -> Result<Option<SyncSession>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {COLUMNS} FROM sync_sessions WHERE id = ?"),
                [id.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(parse_session(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_recent(
        &self,
        device_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SyncSession>> {
        #[allow(clippy::cast_possible_wrap)]
        let limit = limit as i64;

        let mut rows = if let Some(device) = device_id {
            self.conn
                .query(
                    &format!(
                        "SELECT {COLUMNS} FROM sync_sessions
                         WHERE device_id = ? ORDER BY started_at DESC LIMIT ?"
                    ),
                    params![device, limit],
                )
                .await?
        } else {
            self.conn
                .query(
                    &format!(
                        "SELECT {COLUMNS} FROM sync_sessions ORDER BY started_at DESC LIMIT ?"
                    ),
                    params![limit],
                )
                .await?
        };

        let mut sessions = Vec::new();
        while let Some(row) = rows.next().await? {
            sessions.push(parse_session(&row)?);
        }
        Ok(sessions)
    }
}
