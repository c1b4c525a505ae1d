//! Run history — append-only JSONL log of pipeline invocations.
//!
//! One JSON object per line, so a partially written final line never
//! corrupts earlier entries. Unlike the run report, entries carry a
//! wall-clock timestamp.

use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smartrun_core::StageId;

use crate::reporting::RunReport;

/// Condensed per-stage line of a history entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSummary {
    pub stage: StageId,
    pub decision: String,
    pub outcome: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub recorded_at: DateTime<Utc>,
    pub profile: String,
    pub mode: String,
    pub pipeline_fingerprint: String,
    pub dry_run: bool,
    pub exit_code: i32,
    pub stages: Vec<StageSummary>,
}

impl HistoryEntry {
    pub fn from_report(report: &RunReport, recorded_at: DateTime<Utc>) -> Self {
        Self {
            recorded_at,
            profile: report.profile.clone(),
            mode: report.mode.clone(),
            pipeline_fingerprint: report.pipeline_fingerprint.clone(),
            dry_run: report.dry_run,
            exit_code: report.exit_code(),
            stages: report
                .records()
                .iter()
                .map(|r| StageSummary {
                    stage: r.stage,
                    decision: r.decision.label().to_string(),
                    outcome: r.outcome.label().to_string(),
                    duration_ms: r.execution.as_ref().map(|e| e.duration.as_millis() as u64),
                })
                .collect(),
        }
    }

    /// Stages that actually executed in this run.
    pub fn executed(&self) -> impl Iterator<Item = &StageSummary> {
        self.stages.iter().filter(|s| s.duration_ms.is_some())
    }
}

/// JSONL history file manager.
pub struct RunHistory {
    path: PathBuf,
}

impl RunHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn append(&self, entry: &HistoryEntry) -> io::Result<()> {
        let json = serde_json::to_string(entry)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        writeln!(file, "{json}")?;
        file.flush()
    }

    /// Read all entries, skipping malformed lines.
    pub fn read_all(&self) -> io::Result<Vec<HistoryEntry>> {
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut entries = Vec::new();
        for line in io::BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<HistoryEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::debug!(error = %e, "skipping malformed history line"),
            }
        }
        Ok(entries)
    }

    /// The most recent `n` entries, oldest first.
    pub fn last(&self, n: usize) -> io::Result<Vec<HistoryEntry>> {
        let mut entries = self.read_all()?;
        let skip = entries.len().saturating_sub(n);
        Ok(entries.split_off(skip))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutionResult;
    use chrono::TimeZone;
    use smartrun_core::{Decision, RecomputeReason};
    use std::time::Duration;

    fn report(profile: &str) -> RunReport {
        let mut report = RunReport::new(profile, "full", "abc", false);
        report.record(StageId::Download, Decision::Skip, None);
        report.record(
            StageId::Merge,
            Decision::Recompute(RecomputeReason::Forced),
            Some(ExecutionResult {
                exit_code: Some(0),
                duration: Duration::from_millis(75),
                stdout_tail: vec![],
                stderr_tail: vec![],
            }),
        );
        report
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn entry_summarizes_report() {
        let entry = HistoryEntry::from_report(&report("dev"), at(0));
        assert_eq!(entry.exit_code, 0);
        assert_eq!(entry.stages.len(), 2);
        assert_eq!(entry.stages[0].outcome, "skipped");
        assert_eq!(entry.stages[1].duration_ms, Some(75));
        assert_eq!(entry.executed().count(), 1);
    }

    #[test]
    fn append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let history = RunHistory::new(dir.path().join("nested/history.jsonl"));

        history
            .append(&HistoryEntry::from_report(&report("dev"), at(1)))
            .unwrap();
        history
            .append(&HistoryEntry::from_report(&report("prod"), at(2)))
            .unwrap();

        let entries = history.read_all().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].profile, "prod");

        let last = history.last(1).unwrap();
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].recorded_at, at(2));
    }

    #[test]
    fn skips_malformed_lines_and_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let history = RunHistory::new(dir.path().join("history.jsonl"));
        assert!(history.read_all().unwrap().is_empty());

        history
            .append(&HistoryEntry::from_report(&report("dev"), at(1)))
            .unwrap();
        let mut file = OpenOptions::new().append(true).open(history.path()).unwrap();
        writeln!(file, "{{not json").unwrap();
        writeln!(file).unwrap();

        assert_eq!(history.read_all().unwrap().len(), 1);
    }
}
