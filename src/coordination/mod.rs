//! Phase orchestration and per-file processing

pub mod orchestrator;
pub mod report;
pub mod worker;

pub use orchestrator::{Orchestrator, Phase, PhaseSummary};
pub use report::{FileOutcome, FileStatus, RowCounts, RunReport};
