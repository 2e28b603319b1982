//! Propagation services.

#![allow(missing_docs)]

pub mod checkpoint;
pub mod coordinator;
pub mod detector;
pub mod evidence;
pub mod executor;
pub mod gateway;
pub mod model;
pub mod notifier;
pub mod reconciler;
pub mod registry;
pub mod registry_page;
pub mod retry_ledger;

pub use checkpoint::CheckpointStore;
pub use coordinator::{CoordinatorConfig, CycleReport, RunCoordinator, RunState};
pub use detector::{ActionDetector, DetectedBatch, checkpoint_before};
pub use evidence::{EvidenceCollector, EvidenceReport, EvidenceStore, build_report};
pub use executor::GatewayExecutor;
pub use gateway::{AccountActivity, AccountStanding, ActivityItem, CommunityGateway};
pub use model::{
    Account, ActionKind, BanEvent, BanRecord, BanStatus, Checkpoint, CommunityName, FailureKind,
    LiveState, ModAction, ModLogEntry, ModeratedCommunity, NoteKind, PropagationFailure,
    RegistryDelta, RequiredAction,
};
pub use notifier::{Notifier, PropagationOutcome};
pub use reconciler::{Disposition, ReconcileContext, Reconciler, Reconciliation};
pub use registry::{PageRegistryStore, RegistrySnapshot, RegistryStore};
pub use registry_page::{PageError, RegistryPage};
pub use retry_ledger::{DbRetryLedger, PendingRetry, RetryLedger, RetryPolicy};
