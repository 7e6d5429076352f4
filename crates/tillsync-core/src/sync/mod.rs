//! Synchronization engine
//!
//! The collaborator seam the orchestrator applies payloads through,
//! conflict detection and resolution, and the session orchestrator itself.

pub mod collaborators;
pub mod detector;
pub mod memory;
pub mod orchestrator;
pub mod resolver;

pub use collaborators::{
    ApplyError, ApplyOutcome, CollaboratorRegistry, CollaboratorVerdict, FieldMismatch,
    LogEventSink, OperationApplier, SyncEventSink,
};
pub use detector::{ConflictDecision, ConflictDetector};
pub use memory::InMemoryApplier;
pub use orchestrator::{SyncOptions, SyncOrchestrator};
pub use resolver::ConflictResolver;
