//! smartrun runner — configuration, execution and reporting.
//!
//! This crate builds on `smartrun-core` to provide:
//! - TOML pipeline configuration with per-profile placeholder expansion
//! - External stage execution behind the `StageRunner` seam
//! - The orchestrator loop (probe, decide, cascade, set aside, execute)
//! - Signal-balance metrics and validation warnings
//! - Run reports (text summary, JSON manifest) and JSONL run history

pub mod config;
pub mod executor;
pub mod history;
pub mod metrics;
pub mod orchestrator;
pub mod reporting;

pub use config::{ConfigError, PipelineConfig, ProfileConfig, RunContext, Settings};
pub use executor::{ExecError, ExecutionResult, ProcessRunner, StageRunner};
pub use history::{HistoryEntry, RunHistory, StageSummary};
pub use metrics::{SignalCounts, StageMetrics, ValidationWarning};
pub use orchestrator::{
    artifact_status, ArtifactStatus, Orchestrator, RunError, RunMode, RunOptions, RunOutcome,
};
pub use reporting::{
    write_manifest, FailureCause, Notice, RunReport, StageOutcome, StageRecord, EXIT_CONFIG,
    EXIT_OK,
};
