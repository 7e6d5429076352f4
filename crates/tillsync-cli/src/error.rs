use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] tillsync_core::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid queue item id: {0}")]
    InvalidQueueId(String),
    #[error("Queue item not found: {0}")]
    ItemNotFound(String),
    #[error("Device id cannot be empty")]
    EmptyDeviceId,
}
