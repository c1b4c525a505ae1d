//! Orchestrator — walks the pipeline in order, deciding and executing stages.
//!
//! Per selected stage: probe the outputs, decide, feed the decision to the
//! cascade, then either record a skip or (outside dry runs) check inputs, move
//! stale outputs aside and run the command. The first failure stops the run;
//! nothing after it is probed or recorded.

use crate::config::{ConfigError, RunContext, Settings};
use crate::executor::{ExecError, StageRunner};
use crate::metrics;
use crate::reporting::{FailureCause, RunReport, StaleArtifact, EXIT_OK};
use serde::Serialize;
use smartrun_core::{
    decide, pipeline_fingerprint, probe_all, set_aside, ArtifactState, Cascade, Decision,
    Pipeline, ProbedArtifact, RecomputeReason, Stage, StageId, StageSelection,
};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Which portion of the pipeline an invocation covers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RunMode {
    #[default]
    Full,
    Quick,
    Stages(Vec<StageId>),
}

impl RunMode {
    pub fn label(&self) -> String {
        match self {
            RunMode::Full => "full".to_string(),
            RunMode::Quick => "quick".to_string(),
            RunMode::Stages(ids) => {
                let names: Vec<&str> = ids.iter().map(|id| id.name()).collect();
                format!("stages[{}]", names.join(","))
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub mode: RunMode,
    pub selection: StageSelection,
    /// Force recomputation from this stage onward.
    pub force_from: Option<StageId>,
    pub dry_run: bool,
}

impl RunOptions {
    pub fn full() -> Self {
        Self::default()
    }

    /// Options for `mode`, resolving quick mode through the settings.
    pub fn for_mode(mode: RunMode, settings: &Settings) -> Self {
        let selection = match &mode {
            RunMode::Full => StageSelection::All,
            RunMode::Quick => settings.quick_selection(),
            RunMode::Stages(ids) => StageSelection::only(ids.iter().copied()),
        };
        Self {
            mode,
            selection,
            force_from: None,
            dry_run: false,
        }
    }

    pub fn with_force_from(mut self, stage: StageId) -> Self {
        self.force_from = Some(stage);
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Reject selections that name stages `pipeline` does not define.
    ///
    /// Such a run would select nothing and still report success.
    pub fn validate(&self, pipeline: &Pipeline) -> Result<(), ConfigError> {
        let stages = self.selection.undefined_in(pipeline);
        if stages.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::UndefinedStages {
                stages,
                defined: pipeline.ids().collect(),
            })
        }
    }
}

/// Fatal run errors. Each one identifies the stage that stopped the run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("stage '{stage}': required input {} does not exist or is empty", .path.display())]
    MissingInput { stage: StageId, path: PathBuf },

    #[error("stage '{stage}' failed with {}", exit_status(.exit_code))]
    StageExecution {
        stage: StageId,
        exit_code: Option<i32>,
    },

    #[error("stage '{stage}': {source}")]
    Launch {
        stage: StageId,
        #[source]
        source: ExecError,
    },

    #[error("stage '{stage}': cannot move stale {} aside: {source}", .path.display())]
    SetAside {
        stage: StageId,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn exit_status(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit status {code}"),
        None => "no exit status (terminated by signal)".to_string(),
    }
}

impl RunError {
    pub fn stage(&self) -> StageId {
        match self {
            RunError::MissingInput { stage, .. }
            | RunError::StageExecution { stage, .. }
            | RunError::Launch { stage, .. }
            | RunError::SetAside { stage, .. } => *stage,
        }
    }
}

/// Report plus the error that ended the run early, if any.
#[derive(Debug)]
pub struct RunOutcome {
    pub report: RunReport,
    pub error: Option<RunError>,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn exit_code(&self) -> i32 {
        match &self.error {
            Some(_) => self.report.exit_code(),
            None => EXIT_OK,
        }
    }
}

pub struct Orchestrator<'a, R: StageRunner> {
    pipeline: &'a Pipeline,
    ctx: &'a RunContext,
    runner: R,
}

impl<'a, R: StageRunner> Orchestrator<'a, R> {
    pub fn new(pipeline: &'a Pipeline, ctx: &'a RunContext, runner: R) -> Self {
        Self {
            pipeline,
            ctx,
            runner,
        }
    }

    pub fn run(&self, options: &RunOptions) -> RunOutcome {
        let fingerprint = pipeline_fingerprint(self.pipeline);
        let mut report = RunReport::new(
            &self.ctx.profile,
            options.mode.label(),
            fingerprint,
            options.dry_run,
        );
        let mut cascade = Cascade::new();

        info!(
            profile = %self.ctx.profile,
            mode = %options.mode.label(),
            dry_run = options.dry_run,
            "starting pipeline run"
        );

        for stage in self.pipeline.stages() {
            if !options.selection.includes(stage.id) {
                debug!(stage = stage.name(), "not selected");
                continue;
            }

            let probed = probe_all(&stage.outputs);
            let decision = match options.force_from {
                Some(from) if !cascade.is_active() && stage.id >= from => {
                    Decision::Recompute(RecomputeReason::Forced)
                }
                _ => decide(stage, &probed, cascade.is_active()),
            };
            cascade.observe(stage.id, &decision);
            report.cascade_origin = cascade.origin();

            match &decision {
                Decision::Skip => info!(stage = stage.name(), "outputs fresh, skipping"),
                Decision::Recompute(reason) => {
                    info!(stage = stage.name(), reason = %reason, "recompute")
                }
            }

            if decision.is_recompute() {
                if options.dry_run {
                    report.record(stage.id, decision, None);
                    continue;
                }
                if let Err(err) = self.execute(stage, &probed, decision, &mut report) {
                    error!(stage = stage.name(), error = %err, "run stopped");
                    return RunOutcome {
                        report,
                        error: Some(err),
                    };
                }
            } else {
                report.record(stage.id, decision, None);
            }

            if let Some(stage_metrics) = metrics::collect(stage) {
                for warning in &stage_metrics.warnings {
                    warn!(stage = stage.name(), "{warning}");
                }
                report.record_metrics(stage.id, stage_metrics);
            }
        }

        info!(
            executed = report.count("succeeded"),
            skipped = report.count("skipped"),
            "pipeline run complete"
        );
        RunOutcome {
            report,
            error: None,
        }
    }

    /// Check inputs, move stale outputs aside, run the command. Records the
    /// stage either way.
    fn execute(
        &self,
        stage: &Stage,
        probed: &[ProbedArtifact],
        decision: Decision,
        report: &mut RunReport,
    ) -> Result<(), RunError> {
        if let Some(missing) = stage.inputs.iter().find(|input| input.probe().is_missing()) {
            report.record_failure(
                stage.id,
                decision,
                FailureCause::MissingInput {
                    path: missing.path.clone(),
                },
            );
            return Err(RunError::MissingInput {
                stage: stage.id,
                path: missing.path.clone(),
            });
        }

        for artifact in probed {
            let ArtifactState::PresentStale { reason } = &artifact.state else {
                continue;
            };
            match set_aside(&artifact.path) {
                Ok(moved_to) => {
                    warn!(
                        stage = stage.name(),
                        path = %artifact.path.display(),
                        moved_to = %moved_to.display(),
                        "stale artifact moved aside: {reason}"
                    );
                    report.note_stale(StaleArtifact {
                        stage: stage.id,
                        path: artifact.path.clone(),
                        moved_to,
                        detail: reason.clone(),
                    });
                }
                Err(source) => {
                    report.record_failure(
                        stage.id,
                        decision,
                        FailureCause::SetAside {
                            path: artifact.path.clone(),
                            detail: source.to_string(),
                        },
                    );
                    return Err(RunError::SetAside {
                        stage: stage.id,
                        path: artifact.path.clone(),
                        source,
                    });
                }
            }
        }

        let result = match self.runner.run(stage, self.ctx) {
            Ok(result) => result,
            Err(source) => {
                report.record_failure(
                    stage.id,
                    decision,
                    FailureCause::Launch {
                        detail: source.to_string(),
                    },
                );
                return Err(RunError::Launch {
                    stage: stage.id,
                    source,
                });
            }
        };

        let succeeded = result.succeeded();
        let exit_code = result.exit_code;
        info!(
            stage = stage.name(),
            exit_code = ?exit_code,
            duration_ms = result.duration_ms() as u64,
            "stage finished"
        );
        report.record(stage.id, decision, Some(result));

        if succeeded {
            Ok(())
        } else {
            Err(RunError::StageExecution {
                stage: stage.id,
                exit_code,
            })
        }
    }
}

/// Current state of one declared output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtifactStatus {
    pub stage: StageId,
    #[serde(flatten)]
    pub artifact: ProbedArtifact,
}

/// Probe every declared output of every stage. Read-only.
pub fn artifact_status(pipeline: &Pipeline) -> Vec<ArtifactStatus> {
    pipeline
        .stages()
        .iter()
        .flat_map(|stage| {
            probe_all(&stage.outputs)
                .into_iter()
                .map(move |artifact| ArtifactStatus {
                    stage: stage.id,
                    artifact,
                })
        })
        .collect()
}
