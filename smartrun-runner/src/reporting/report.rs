//! The run report: one record per stage reached, plus notices.

use crate::executor::ExecutionResult;
use crate::metrics::{StageMetrics, ValidationWarning};
use serde::Serialize;
use smartrun_core::{Decision, StageId};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Every executed stage succeeded or was skipped.
pub const EXIT_OK: i32 = 0;
/// Unknown profile, invalid mode, unreadable or invalid configuration.
pub const EXIT_CONFIG: i32 = 2;
/// Stage failures exit with `EXIT_STAGE_BASE + ordinal`.
pub const EXIT_STAGE_BASE: i32 = 10;

pub fn stage_exit_code(stage: StageId) -> i32 {
    EXIT_STAGE_BASE + stage.ordinal() as i32
}

/// Why a stage failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureCause {
    MissingInput { path: PathBuf },
    NonZeroExit { exit_code: Option<i32> },
    Launch { detail: String },
    SetAside { path: PathBuf, detail: String },
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCause::MissingInput { path } => write!(f, "missing input {}", path.display()),
            FailureCause::NonZeroExit {
                exit_code: Some(code),
            } => write!(f, "exit status {code}"),
            FailureCause::NonZeroExit { exit_code: None } => f.write_str("killed by signal"),
            FailureCause::Launch { detail } => write!(f, "launch failed: {detail}"),
            FailureCause::SetAside { path, detail } => {
                write!(f, "cannot move aside {}: {detail}", path.display())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StageOutcome {
    /// Outputs were fresh; nothing ran.
    Skipped,
    /// Executed and exited zero.
    Succeeded,
    /// Would execute; dry runs only.
    Planned,
    Failed { cause: FailureCause },
}

impl StageOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            StageOutcome::Skipped => "skipped",
            StageOutcome::Succeeded => "succeeded",
            StageOutcome::Planned => "planned",
            StageOutcome::Failed { .. } => "failed",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, StageOutcome::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageRecord {
    pub stage: StageId,
    #[serde(flatten)]
    pub decision: Decision,
    #[serde(flatten)]
    pub outcome: StageOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionResult>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metrics: BTreeMap<String, f64>,
}

/// A stale output moved aside before regeneration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StaleArtifact {
    pub stage: StageId,
    pub path: PathBuf,
    pub moved_to: PathBuf,
    pub detail: String,
}

/// Non-fatal findings, surfaced only in the report.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "notice", rename_all = "snake_case")]
pub enum Notice {
    StaleArtifact(StaleArtifact),
    Validation(ValidationWarning),
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::StaleArtifact(stale) => write!(
                f,
                "STALE: {}: {} moved to {} ({})",
                stale.stage,
                stale.path.display(),
                stale.moved_to.display(),
                stale.detail
            ),
            Notice::Validation(warning) => write!(f, "WARNING: {warning}"),
        }
    }
}

/// Ordered account of one invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub profile: String,
    pub mode: String,
    pub pipeline_fingerprint: String,
    pub dry_run: bool,
    /// First stage that recomputed; every selected stage after it recomputes too.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cascade_origin: Option<StageId>,
    pub records: Vec<StageRecord>,
    pub notices: Vec<Notice>,
}

impl RunReport {
    pub fn new(
        profile: impl Into<String>,
        mode: impl Into<String>,
        pipeline_fingerprint: impl Into<String>,
        dry_run: bool,
    ) -> Self {
        Self {
            profile: profile.into(),
            mode: mode.into(),
            pipeline_fingerprint: pipeline_fingerprint.into(),
            dry_run,
            cascade_origin: None,
            records: Vec::new(),
            notices: Vec::new(),
        }
    }

    /// Append one stage. The outcome follows from the decision and, when
    /// the stage ran, its exit status.
    pub fn record(&mut self, stage: StageId, decision: Decision, execution: Option<ExecutionResult>) {
        let outcome = match (&decision, &execution) {
            (_, Some(result)) if result.succeeded() => StageOutcome::Succeeded,
            (_, Some(result)) => StageOutcome::Failed {
                cause: FailureCause::NonZeroExit {
                    exit_code: result.exit_code,
                },
            },
            (Decision::Skip, None) => StageOutcome::Skipped,
            (Decision::Recompute(_), None) => StageOutcome::Planned,
        };
        self.push(stage, decision, outcome, execution);
    }

    /// Append a stage that failed before or instead of producing an exit status.
    pub fn record_failure(&mut self, stage: StageId, decision: Decision, cause: FailureCause) {
        self.push(stage, decision, StageOutcome::Failed { cause }, None);
    }

    /// Attach metric values to the stage's record; warnings become notices.
    pub fn record_metrics(&mut self, stage: StageId, metrics: StageMetrics) {
        if let Some(record) = self.records.iter_mut().rev().find(|r| r.stage == stage) {
            record.metrics.extend(metrics.values);
        }
        self.notices
            .extend(metrics.warnings.into_iter().map(Notice::Validation));
    }

    pub fn note_stale(&mut self, stale: StaleArtifact) {
        self.notices.push(Notice::StaleArtifact(stale));
    }

    fn push(
        &mut self,
        stage: StageId,
        decision: Decision,
        outcome: StageOutcome,
        execution: Option<ExecutionResult>,
    ) {
        self.records.push(StageRecord {
            stage,
            decision,
            outcome,
            execution,
            metrics: BTreeMap::new(),
        });
    }

    pub fn records(&self) -> &[StageRecord] {
        &self.records
    }

    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationWarning> {
        self.notices.iter().filter_map(|n| match n {
            Notice::Validation(w) => Some(w),
            Notice::StaleArtifact(_) => None,
        })
    }

    pub fn first_failure(&self) -> Option<&StageRecord> {
        self.records.iter().find(|r| r.outcome.is_failure())
    }

    pub fn count(&self, label: &str) -> usize {
        self.records
            .iter()
            .filter(|r| r.outcome.label() == label)
            .count()
    }

    pub fn is_success(&self) -> bool {
        self.first_failure().is_none()
    }

    /// 0 on success, otherwise identifies the first failing stage.
    pub fn exit_code(&self) -> i32 {
        match self.first_failure() {
            Some(record) => stage_exit_code(record.stage),
            None => EXIT_OK,
        }
    }

    /// Text summary and exit code.
    pub fn render(&self) -> (String, i32) {
        (super::render::summary(self), self.exit_code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::SignalCounts;
    use smartrun_core::RecomputeReason;
    use std::time::Duration;

    fn executed(code: i32) -> ExecutionResult {
        ExecutionResult {
            exit_code: Some(code),
            duration: Duration::from_millis(250),
            stdout_tail: vec![],
            stderr_tail: vec!["boom".into()],
        }
    }

    fn recompute() -> Decision {
        Decision::Recompute(RecomputeReason::Cascade)
    }

    #[test]
    fn outcomes_follow_decision_and_exit_status() {
        let mut report = RunReport::new("dev", "full", "abc", false);
        report.record(StageId::Download, Decision::Skip, None);
        report.record(StageId::Merge, recompute(), Some(executed(0)));
        report.record(StageId::Features, recompute(), Some(executed(2)));

        let labels: Vec<_> = report.records().iter().map(|r| r.outcome.label()).collect();
        assert_eq!(labels, vec!["skipped", "succeeded", "failed"]);
        assert_eq!(report.first_failure().unwrap().stage, StageId::Features);
        assert_eq!(report.exit_code(), 12);
    }

    #[test]
    fn all_skipped_exits_zero() {
        let mut report = RunReport::new("dev", "full", "abc", false);
        for id in StageId::ALL {
            report.record(id, Decision::Skip, None);
        }
        assert!(report.is_success());
        assert_eq!(report.exit_code(), EXIT_OK);
        assert_eq!(report.count("skipped"), 8);
    }

    #[test]
    fn imbalance_warning_does_not_change_exit_code() {
        let mut report = RunReport::new("dev", "full", "abc", false);
        report.record(StageId::Signals, recompute(), Some(executed(0)));
        report.record_metrics(
            StageId::Signals,
            SignalCounts::new(1000, 650).assess(StageId::Signals, 0.30),
        );
        report.record(StageId::Backtest, recompute(), Some(executed(0)));

        assert_eq!(report.warnings().count(), 1);
        assert_eq!(report.records()[0].metrics["buy_signals"], 1000.0);
        assert_eq!(report.exit_code(), 0);

        let (text, code) = report.render();
        assert_eq!(code, 0);
        assert!(text.contains("WARNING: signals: buy/sell imbalance 35.0% exceeds 30.0%"));
    }

    #[test]
    fn missing_input_failure_has_no_execution() {
        let mut report = RunReport::new("dev", "full", "abc", false);
        report.record_failure(
            StageId::Train,
            recompute(),
            FailureCause::MissingInput {
                path: PathBuf::from("data/matrix_1h.csv"),
            },
        );
        let record = &report.records()[0];
        assert!(record.execution.is_none());
        assert_eq!(report.exit_code(), stage_exit_code(StageId::Train));
    }

    #[test]
    fn dry_run_recompute_is_planned() {
        let mut report = RunReport::new("dev", "full", "abc", true);
        report.record(StageId::Merge, recompute(), None);
        assert_eq!(report.records()[0].outcome, StageOutcome::Planned);
        assert!(report.is_success());
    }
}
