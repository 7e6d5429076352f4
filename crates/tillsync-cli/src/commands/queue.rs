use std::path::Path;

use crate::commands::common::{open_service, parse_queue_id, print_items};
use crate::error::CliError;

pub async fn run_pending(
    device: Option<&str>,
    limit: usize,
    as_json: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let service = open_service(db_path).await?;
    let items = service.list_pending(device, limit).await?;
    print_items(&items, as_json)
}

pub async fn run_show(id: &str, db_path: &Path) -> Result<(), CliError> {
    let service = open_service(db_path).await?;
    let queue_id = parse_queue_id(id)?;
    let item = service
        .get_item(&queue_id)
        .await?
        .ok_or_else(|| CliError::ItemNotFound(id.to_string()))?;
    println!("{}", serde_json::to_string_pretty(&item)?);
    Ok(())
}

pub async fn run_stats(
    device: Option<&str>,
    as_json: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let service = open_service(db_path).await?;
    let stats = service.stats(device).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("Total queue items: {}", stats.total);
    if !stats.by_status.is_empty() {
        println!("By status:");
        for (status, count) in &stats.by_status {
            println!("  {status:<9} {count}");
        }
    }
    if !stats.by_kind.is_empty() {
        println!("By kind:");
        for (kind, count) in &stats.by_kind {
            println!("  {kind:<17} {count}");
        }
    }
    Ok(())
}
