use std::path::Path;
use std::sync::Arc;

use chrono::TimeZone;

use tillsync_core::retry::RetryPolicy;
use tillsync_core::sync::{CollaboratorRegistry, InMemoryApplier, OperationApplier};
use tillsync_core::{OfflineQueueService, QueueId, QueueItem};

use crate::error::CliError;

/// Open the queue service over the given database file. The in-process
/// ledger stands in for domain collaborators; inspection commands never
/// touch it, and `sync`/`resolve` apply against it.
pub async fn open_service(db_path: &Path) -> Result<OfflineQueueService, CliError> {
    let ledger: Arc<dyn OperationApplier> = Arc::new(InMemoryApplier::new("SRV"));
    let registry = CollaboratorRegistry::new().register_all(&ledger);
    let service =
        OfflineQueueService::open_path(db_path, registry, RetryPolicy::default()).await?;
    Ok(service)
}

pub fn parse_queue_id(raw: &str) -> Result<QueueId, CliError> {
    raw.parse()
        .map_err(|_| CliError::InvalidQueueId(raw.to_string()))
}

pub fn format_timestamp(unix_ms: i64) -> String {
    chrono::Utc
        .timestamp_millis_opt(unix_ms)
        .single()
        .map_or_else(|| unix_ms.to_string(), |dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
}

/// One-line summary used by the list commands
pub fn format_item_line(item: &QueueItem) -> String {
    let mut line = format!(
        "{}  {:<16} {:<9} p{} {}",
        item.id,
        item.kind.to_string(),
        item.status.to_string(),
        item.priority,
        format_timestamp(item.offline_timestamp),
    );
    if let Some(kind) = item.conflict_kind {
        line.push_str(&format!("  [{kind}]"));
    }
    if let Some(reference) = item.server_reference.as_deref() {
        line.push_str(&format!("  -> {reference}"));
    }
    if item.attempts > 0 {
        line.push_str(&format!("  ({}/{} attempts)", item.attempts, item.max_attempts));
    }
    line
}

pub fn print_items(items: &[QueueItem], as_json: bool) -> Result<(), CliError> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(items)?);
        return Ok(());
    }
    if items.is_empty() {
        println!("No queue items.");
        return Ok(());
    }
    for item in items {
        println!("{}", format_item_line(item));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tillsync_core::models::{
        ConflictKind, EnqueueRequest, OperationPayload, OtherPayload, QueueStatus,
        DEFAULT_MAX_ATTEMPTS,
    };

    fn item() -> QueueItem {
        QueueItem::from_request(EnqueueRequest {
            device_id: "till-1".to_string(),
            payload: OperationPayload::Other(OtherPayload {
                client_reference: "OP-1".to_string(),
                description: "cash drawer count".to_string(),
                data: serde_json::json!({"count_cents": 18200}),
            }),
            offline_timestamp: 1_700_000_000_000,
            actor: "ada".to_string(),
            priority: 3,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        })
        .unwrap()
    }

    #[test]
    fn test_parse_queue_id_rejects_garbage() {
        assert!(parse_queue_id("not-a-uuid").is_err());
        let id = item().id;
        assert_eq!(parse_queue_id(&id.as_str()).unwrap(), id);
    }

    #[test]
    fn test_format_item_line_shows_status_and_priority() {
        let line = format_item_line(&item());
        assert!(line.contains("other"));
        assert!(line.contains("pending"));
        assert!(line.contains("p3"));
    }

    #[test]
    fn test_format_item_line_marks_conflicts_and_attempts() {
        let mut item = item();
        item.status = QueueStatus::Conflict;
        item.conflict_kind = Some(ConflictKind::Duplicate);
        item.attempts = 2;
        let line = format_item_line(&item);
        assert!(line.contains("[duplicate]"));
        assert!(line.contains("(2/5 attempts)"));
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0), "1970-01-01 00:00:00");
    }
}
