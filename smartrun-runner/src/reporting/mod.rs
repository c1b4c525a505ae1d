//! Run reporting: per-stage records, text summary, JSON export.

mod manifest;
mod render;
mod report;

pub use manifest::{write_manifest, ReportManifest};
pub use render::{format_duration, summary};
pub use report::{
    stage_exit_code, FailureCause, Notice, RunReport, StageOutcome, StageRecord, StaleArtifact,
    EXIT_CONFIG, EXIT_OK, EXIT_STAGE_BASE,
};
