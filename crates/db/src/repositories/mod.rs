//! Repositories for bot state.

mod checkpoint;
mod evidence;
mod propagation_failure;

pub use checkpoint::CheckpointRepository;
pub use evidence::EvidenceReportRepository;
pub use propagation_failure::PropagationFailureRepository;
