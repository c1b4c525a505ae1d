//! smartrun core — the decision procedure of the incremental pipeline runner.
//!
//! This crate holds everything that does not execute anything:
//! - Stage descriptors and the fixed stage order
//! - Artifact probing with structural freshness checks (CSV header schemas)
//! - The skip/recompute decision engine
//! - Cascade invalidation across downstream stages
//! - Pipeline validation, stage selection and fingerprinting

pub mod artifact;
pub mod cascade;
pub mod decision;
pub mod fingerprint;
pub mod pipeline;
pub mod stage;

pub use artifact::{
    aside_path, probe_all, probe_path, set_aside, ArtifactSpec, ArtifactState, ColumnSchema,
    Freshness, FreshnessPredicate, ProbeError, ProbedArtifact,
};
pub use cascade::Cascade;
pub use decision::{decide, Decision, RecomputeReason};
pub use fingerprint::pipeline_fingerprint;
pub use pipeline::{Pipeline, PipelineError, StageSelection};
pub use stage::{CommandSpec, MetricSpec, Stage, StageId, UnknownStage};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: descriptors can be shared with a worker thread.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<Stage>();
        require_sync::<Stage>();
        require_send::<Pipeline>();
        require_sync::<Pipeline>();
        require_send::<ArtifactSpec>();
        require_sync::<ArtifactSpec>();
        require_send::<Decision>();
        require_sync::<Decision>();
        require_send::<Cascade>();
        require_sync::<Cascade>();
    }
}
