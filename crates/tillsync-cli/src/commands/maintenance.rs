use std::path::Path;

use crate::commands::common::{open_service, parse_queue_id};
use crate::error::CliError;

pub async fn run_retry(id: &str, db_path: &Path) -> Result<(), CliError> {
    let service = open_service(db_path).await?;
    let queue_id = parse_queue_id(id)?;
    let item = service.retry_item(&queue_id).await?;
    println!(
        "Reset {} to {}; it will be picked up by the next sync run",
        item.id, item.status
    );
    Ok(())
}

pub async fn run_purge(
    older_than_days: u32,
    device: Option<&str>,
    db_path: &Path,
) -> Result<(), CliError> {
    let service = open_service(db_path).await?;
    let deleted = service.purge_synced(older_than_days, device).await?;
    println!("Purged {deleted} synced items older than {older_than_days} days");
    Ok(())
}
