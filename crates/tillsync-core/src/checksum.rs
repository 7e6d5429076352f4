//! Payload integrity guard
//!
//! A queue item may sit on a device for an arbitrary time between enqueue
//! and sync; the checksum is the only defense against the payload being
//! mutated (by a bug or otherwise) in that window. The hash is BLAKE3 over
//! the canonical JSON serialization of the typed payload, hex encoded.
//! Field order in that serialization is fixed by the type definitions, so
//! the bytes are deterministic for a given payload value.

use crate::error::Result;
use crate::models::{OperationPayload, QueueItem};

/// Compute the content checksum for a payload
pub fn compute(payload: &OperationPayload) -> Result<String> {
    let bytes = serde_json::to_vec(payload)?;
    Ok(hex::encode(blake3::hash(&bytes).as_bytes()))
}

/// Verify a queue item's recorded checksum against a fresh computation.
/// A mismatch is always an integrity failure, never a plain retry.
pub fn verify(item: &QueueItem) -> Result<bool> {
    Ok(compute(&item.payload)? == item.content_checksum)
}
