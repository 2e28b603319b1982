//! Database entities.

pub mod community_checkpoint;
pub mod evidence_report;
pub mod propagation_failure;

pub use community_checkpoint::Entity as CommunityCheckpoint;
pub use evidence_report::Entity as EvidenceReport;
pub use propagation_failure::Entity as PropagationFailure;
