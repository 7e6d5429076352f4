use std::path::Path;

use tillsync_core::models::TriggerKind;

use crate::commands::common::open_service;
use crate::error::CliError;

pub async fn run_sync(
    device: &str,
    limit: Option<usize>,
    db_path: &Path,
) -> Result<(), CliError> {
    if device.trim().is_empty() {
        return Err(CliError::EmptyDeviceId);
    }

    let service = open_service(db_path).await?;
    let session = service
        .run_sync(device, TriggerKind::Manual, limit)
        .await?;

    println!(
        "Session {} finished: {} ({} queued, {} processed, {} synced, {} failed, {} conflicts)",
        session.id,
        session.status.as_str(),
        session.counts.queued,
        session.counts.processed,
        session.counts.synced,
        session.counts.failed,
        session.counts.conflicts,
    );
    if let Some(error) = session.error.as_deref() {
        println!("Error: {error}");
    }
    Ok(())
}

pub async fn run_sessions(
    device: Option<&str>,
    limit: usize,
    as_json: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let service = open_service(db_path).await?;
    let sessions = service.list_sessions(device, limit).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&sessions)?);
        return Ok(());
    }
    if sessions.is_empty() {
        println!("No sync sessions recorded.");
        return Ok(());
    }
    for session in &sessions {
        println!(
            "{}  {:<9} {:<9} synced {}/{} ({}ms)",
            session.id,
            session.status.as_str(),
            session.trigger.as_str(),
            session.counts.synced,
            session.counts.processed,
            session.duration_ms().unwrap_or(0),
        );
    }
    Ok(())
}
