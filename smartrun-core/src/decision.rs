//! Decision engine: skip a stage or recompute it.
//!
//! `decide` is pure. Moving stale outputs aside is a separate step the
//! orchestrator performs once it commits to executing the stage.

use crate::artifact::{ArtifactState, ProbedArtifact};
use crate::stage::Stage;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Why a stage must run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RecomputeReason {
    /// An upstream stage recomputed earlier in this run.
    Cascade,
    /// The operator asked to recompute from this stage onward.
    Forced,
    /// Nothing on disk can prove the stage is up to date.
    NoDeclaredOutputs,
    OutputAbsent { path: PathBuf },
    OutputEmpty { path: PathBuf },
    OutputStale { path: PathBuf, detail: String },
}

impl fmt::Display for RecomputeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecomputeReason::Cascade => f.write_str("upstream recomputed"),
            RecomputeReason::Forced => f.write_str("forced"),
            RecomputeReason::NoDeclaredOutputs => f.write_str("no declared outputs"),
            RecomputeReason::OutputAbsent { path } => write!(f, "missing {}", path.display()),
            RecomputeReason::OutputEmpty { path } => write!(f, "empty {}", path.display()),
            RecomputeReason::OutputStale { path, detail } => {
                write!(f, "stale {} ({detail})", path.display())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Skip,
    Recompute(RecomputeReason),
}

impl Decision {
    pub fn is_recompute(&self) -> bool {
        matches!(self, Decision::Recompute(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            Decision::Skip => "skip",
            Decision::Recompute(_) => "recompute",
        }
    }

    pub fn reason(&self) -> Option<&RecomputeReason> {
        match self {
            Decision::Skip => None,
            Decision::Recompute(reason) => Some(reason),
        }
    }
}

/// Decide whether `stage` can reuse its outputs.
///
/// `probed` must be the probe results for `stage.outputs`. The first
/// non-fresh output, in declaration order, names the reason.
pub fn decide(stage: &Stage, probed: &[ProbedArtifact], cascade_active: bool) -> Decision {
    if cascade_active {
        return Decision::Recompute(RecomputeReason::Cascade);
    }
    if stage.outputs.is_empty() || probed.is_empty() {
        return Decision::Recompute(RecomputeReason::NoDeclaredOutputs);
    }

    for artifact in probed {
        let reason = match &artifact.state {
            ArtifactState::PresentFresh => continue,
            ArtifactState::Absent => RecomputeReason::OutputAbsent {
                path: artifact.path.clone(),
            },
            ArtifactState::EmptyOrMissing => RecomputeReason::OutputEmpty {
                path: artifact.path.clone(),
            },
            ArtifactState::PresentStale { reason } => RecomputeReason::OutputStale {
                path: artifact.path.clone(),
                detail: reason.clone(),
            },
        };
        return Decision::Recompute(reason);
    }

    Decision::Skip
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactSpec;
    use crate::stage::{CommandSpec, StageId};

    fn features_stage() -> Stage {
        Stage::new(StageId::Features, CommandSpec::new("features"))
            .output(ArtifactSpec::new("data/features.csv"))
            .output(ArtifactSpec::new("data/features.meta"))
    }

    fn probed(states: &[ArtifactState]) -> Vec<ProbedArtifact> {
        let paths = ["data/features.csv", "data/features.meta"];
        states
            .iter()
            .zip(paths)
            .map(|(state, path)| ProbedArtifact {
                path: PathBuf::from(path),
                state: state.clone(),
            })
            .collect()
    }

    #[test]
    fn all_fresh_skips() {
        let stage = features_stage();
        let probes = probed(&[ArtifactState::PresentFresh, ArtifactState::PresentFresh]);
        assert_eq!(decide(&stage, &probes, false), Decision::Skip);
    }

    #[test]
    fn cascade_overrides_fresh_outputs() {
        let stage = features_stage();
        let probes = probed(&[ArtifactState::PresentFresh, ArtifactState::PresentFresh]);
        assert_eq!(
            decide(&stage, &probes, true),
            Decision::Recompute(RecomputeReason::Cascade)
        );
    }

    #[test]
    fn first_non_fresh_output_names_the_reason() {
        let stage = features_stage();
        let probes = probed(&[
            ArtifactState::PresentStale {
                reason: "missing column(s): vol_regime".into(),
            },
            ArtifactState::Absent,
        ]);
        assert_eq!(
            decide(&stage, &probes, false),
            Decision::Recompute(RecomputeReason::OutputStale {
                path: PathBuf::from("data/features.csv"),
                detail: "missing column(s): vol_regime".into(),
            })
        );
    }

    #[test]
    fn absent_and_empty_outputs_recompute() {
        let stage = features_stage();
        let absent = probed(&[ArtifactState::PresentFresh, ArtifactState::Absent]);
        assert!(matches!(
            decide(&stage, &absent, false),
            Decision::Recompute(RecomputeReason::OutputAbsent { .. })
        ));

        let empty = probed(&[ArtifactState::EmptyOrMissing, ArtifactState::PresentFresh]);
        assert!(matches!(
            decide(&stage, &empty, false),
            Decision::Recompute(RecomputeReason::OutputEmpty { .. })
        ));
    }

    #[test]
    fn stage_without_outputs_always_runs() {
        let stage = Stage::new(StageId::Backtest, CommandSpec::new("backtest"));
        assert_eq!(
            decide(&stage, &[], false),
            Decision::Recompute(RecomputeReason::NoDeclaredOutputs)
        );
    }
}
