use std::path::Path;

use tillsync_core::models::ResolutionStrategy;

use crate::commands::common::{open_service, parse_queue_id, print_items};
use crate::error::CliError;

pub async fn run_conflicts(
    device: Option<&str>,
    limit: usize,
    as_json: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let service = open_service(db_path).await?;
    let conflicts = service.list_conflicts(device, limit).await?;

    if conflicts.is_empty() && !as_json {
        println!("No conflicts awaiting resolution.");
        return Ok(());
    }
    print_items(&conflicts, as_json)
}

pub async fn run_resolve(
    id: &str,
    strategy: ResolutionStrategy,
    actor: &str,
    reason: &str,
    db_path: &Path,
) -> Result<(), CliError> {
    let service = open_service(db_path).await?;
    let queue_id = parse_queue_id(id)?;

    let resolved = service
        .resolve_conflict(&queue_id, strategy, actor, reason)
        .await?;

    println!(
        "Resolved {} with {}: status is now {}",
        resolved.id, strategy, resolved.status
    );
    if let Some(reference) = resolved.server_reference.as_deref() {
        println!("Server reference: {reference}");
    }
    Ok(())
}
