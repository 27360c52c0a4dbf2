//! Synchronization orchestration: models, tracker, sequencer, scheduler,
//! recovery, and the top-level facade.

pub mod model;
pub mod operations;
pub mod orchestrator;
pub mod recovery;
pub mod schedule;
pub mod sequence;
pub mod synchronizer;

pub use model::*;
pub use operations::{ActiveOperation, OperationGuard, OperationKind, OperationTracker};
pub use orchestrator::{
    ManualSyncReport, OrchestratorState, OrchestratorStatus, SyncOrchestrator, SyncTarget,
};
pub use recovery::{FailureContext, FailureEvent, FailureRecord, FailureTracker, RetryDecision};
pub use schedule::{ScheduleEntry, ScheduleRegistry};
pub use sequence::{sequence_position, SYNC_SEQUENCE};
pub use synchronizer::{EntitySynchronizerTrait, RecordSynchronizer, SynchronizerRegistry};
