//! Data models for the offline queue and sync session log

mod payload;
mod queue_item;
mod sync_session;

pub use payload::{
    InventoryUpdatePayload, OperationPayload, OtherPayload, PaymentPayload, ReceiptPayload,
    SaleLine, SalePayload,
};
pub use queue_item::{
    ConflictKind, EnqueueRequest, OperationKind, QueueId, QueueItem, QueueStatus,
    ResolutionStrategy, DEFAULT_MAX_ATTEMPTS,
};
pub use sync_session::{
    SessionCounts, SessionId, SessionStatus, SyncDirection, SyncSession, TriggerKind,
};
