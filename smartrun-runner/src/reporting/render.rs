//! Plain-text rendering of a [`RunReport`].
//!
//! Output depends only on the report contents, so two reports built from the
//! same run render identically apart from measured durations.

use super::report::{RunReport, StageOutcome, StageRecord};
use smartrun_core::fingerprint::short;
use smartrun_core::Decision;
use std::fmt::Write;
use std::time::Duration;

pub fn summary(report: &RunReport) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = write_summary(&mut out, report);
    out
}

fn write_summary(out: &mut String, report: &RunReport) -> std::fmt::Result {
    writeln!(out)?;
    writeln!(out, "=== Pipeline Run ===")?;
    writeln!(out, "Profile:        {}", report.profile)?;
    writeln!(out, "Mode:           {}", report.mode)?;
    writeln!(out, "Pipeline:       {}", short(&report.pipeline_fingerprint))?;
    if report.dry_run {
        writeln!(out, "Dry run:        no commands executed")?;
    }
    if let Some(origin) = report.cascade_origin {
        writeln!(out, "Cascade from:   {origin}")?;
    }
    writeln!(out)?;
    writeln!(
        out,
        "{:<10} {:<10} {:<16} {:>9}  {}",
        "Stage", "Decision", "Outcome", "Duration", "Detail"
    )?;
    writeln!(out, "{}", "-".repeat(72))?;

    for record in report.records() {
        writeln!(
            out,
            "{:<10} {:<10} {:<16} {:>9}  {}",
            record.stage.name(),
            record.decision.label(),
            outcome_text(&record.outcome),
            duration_text(record),
            detail_text(record)
        )?;
        for (name, value) in &record.metrics {
            writeln!(out, "{:<10} {:>38}  {name} = {}", "", "", format_metric(name, *value))?;
        }
        if let Some(exec) = &record.execution {
            if !exec.succeeded() {
                for line in &exec.stderr_tail {
                    writeln!(out, "    | {line}")?;
                }
            }
        }
    }

    if !report.notices().is_empty() {
        writeln!(out)?;
        writeln!(out, "--- Notices ---")?;
        for notice in report.notices() {
            writeln!(out, "{notice}")?;
        }
    }

    writeln!(out)?;
    match report.first_failure() {
        Some(record) => writeln!(
            out,
            "Result: FAILED at stage '{}' (exit code {})",
            record.stage,
            report.exit_code()
        )?,
        None if report.dry_run => writeln!(
            out,
            "Result: DRY RUN ({} planned, {} skipped)",
            report.count("planned"),
            report.count("skipped")
        )?,
        None => writeln!(
            out,
            "Result: OK ({} executed, {} skipped)",
            report.count("succeeded"),
            report.count("skipped")
        )?,
    }
    Ok(())
}

fn outcome_text(outcome: &StageOutcome) -> &'static str {
    match outcome {
        StageOutcome::Skipped => "skipped (fresh)",
        StageOutcome::Succeeded => "succeeded",
        StageOutcome::Planned => "would run",
        StageOutcome::Failed { .. } => "FAILED",
    }
}

fn duration_text(record: &StageRecord) -> String {
    match &record.execution {
        Some(exec) => format_duration(exec.duration),
        None => "-".to_string(),
    }
}

fn detail_text(record: &StageRecord) -> String {
    match (&record.outcome, &record.decision) {
        (StageOutcome::Failed { cause }, _) => cause.to_string(),
        (_, Decision::Recompute(reason)) => reason.to_string(),
        (_, Decision::Skip) => "outputs fresh".to_string(),
    }
}

fn format_metric(name: &str, value: f64) -> String {
    if name == "imbalance" {
        format!("{:.1}%", value * 100.0)
    } else if value.fract() == 0.0 {
        format!("{value:.0}")
    } else {
        format!("{value:.4}")
    }
}

pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 60.0 {
        format!("{secs:.3}s")
    } else {
        let mins = (secs / 60.0).floor();
        format!("{mins:.0}m{:04.1}s", secs - mins * 60.0)
    }
}
