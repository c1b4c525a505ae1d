//! Derived stage metrics.
//!
//! The signals stage declares a `signal_balance` metric: buy and sell labels
//! are counted across all of its output files and the class imbalance
//! `|buy - sell| / max(buy, sell)` is compared against a threshold. Crossing
//! it produces a [`ValidationWarning`]; it never fails the run.

use serde::Serialize;
use smartrun_core::{MetricSpec, Stage, StageId};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricError {
    #[error("cannot read {path}: {source}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },

    #[error("{path} has no '{column}' column")]
    MissingColumn { path: String, column: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SignalCounts {
    pub buy: u64,
    pub sell: u64,
}

impl SignalCounts {
    pub fn new(buy: u64, sell: u64) -> Self {
        Self { buy, sell }
    }

    /// `|buy - sell| / max(buy, sell)`, or `None` when no signals exist.
    pub fn imbalance(&self) -> Option<f64> {
        let max = self.buy.max(self.sell);
        if max == 0 {
            return None;
        }
        Some(self.buy.abs_diff(self.sell) as f64 / max as f64)
    }

    /// Metric values plus any warning for the given threshold.
    pub fn assess(&self, stage: StageId, threshold: f64) -> StageMetrics {
        let mut metrics = StageMetrics::default();
        metrics.values.insert("buy_signals".into(), self.buy as f64);
        metrics.values.insert("sell_signals".into(), self.sell as f64);

        match self.imbalance() {
            Some(ratio) => {
                metrics.values.insert("imbalance".into(), ratio);
                if ratio > threshold {
                    metrics.warnings.push(ValidationWarning::SignalImbalance {
                        stage,
                        buy: self.buy,
                        sell: self.sell,
                        ratio,
                        threshold,
                    });
                }
            }
            None => metrics.warnings.push(ValidationWarning::NoSignals { stage }),
        }

        metrics
    }
}

/// Non-fatal finding about a stage's outputs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationWarning {
    SignalImbalance {
        stage: StageId,
        buy: u64,
        sell: u64,
        ratio: f64,
        threshold: f64,
    },
    NoSignals {
        stage: StageId,
    },
    MetricUnavailable {
        stage: StageId,
        detail: String,
    },
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationWarning::SignalImbalance {
                stage,
                buy,
                sell,
                ratio,
                threshold,
            } => write!(
                f,
                "{stage}: buy/sell imbalance {:.1}% exceeds {:.1}% (buy={buy}, sell={sell})",
                ratio * 100.0,
                threshold * 100.0
            ),
            ValidationWarning::NoSignals { stage } => {
                write!(f, "{stage}: no buy or sell signals produced")
            }
            ValidationWarning::MetricUnavailable { stage, detail } => {
                write!(f, "{stage}: metrics unavailable ({detail})")
            }
        }
    }
}

/// Values are keyed by name so rendering order is stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StageMetrics {
    pub values: BTreeMap<String, f64>,
    pub warnings: Vec<ValidationWarning>,
}

/// Count `buy`/`sell` labels in `column` of one delimited file.
pub fn count_signals(
    path: &Path,
    delimiter: u8,
    column: &str,
    buy: &str,
    sell: &str,
) -> Result<SignalCounts, MetricError> {
    let csv_err = |source| MetricError::Csv {
        path: path.display().to_string(),
        source,
    };

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(csv_err)?;

    let index = reader
        .headers()
        .map_err(csv_err)?
        .iter()
        .position(|h| h.trim() == column)
        .ok_or_else(|| MetricError::MissingColumn {
            path: path.display().to_string(),
            column: column.to_string(),
        })?;

    let mut counts = SignalCounts::default();
    for record in reader.records() {
        let record = record.map_err(csv_err)?;
        match record.get(index).map(str::trim) {
            Some(v) if v == buy => counts.buy += 1,
            Some(v) if v == sell => counts.sell += 1,
            _ => {}
        }
    }
    Ok(counts)
}

/// Evaluate the metric a stage declares, reading its output artifacts.
///
/// Returns `None` for stages without a metric declaration. Read failures are
/// folded into a warning rather than surfaced as errors.
pub fn collect(stage: &Stage) -> Option<StageMetrics> {
    let MetricSpec::SignalBalance {
        column,
        buy,
        sell,
        threshold,
    } = stage.metrics.as_ref()?;

    let mut total = SignalCounts::default();
    for output in &stage.outputs {
        match count_signals(&output.path, output.delimiter, column, buy, sell) {
            Ok(counts) => {
                total.buy += counts.buy;
                total.sell += counts.sell;
            }
            Err(e) => {
                let mut metrics = StageMetrics::default();
                metrics.warnings.push(ValidationWarning::MetricUnavailable {
                    stage: stage.id,
                    detail: e.to_string(),
                });
                return Some(metrics);
            }
        }
    }

    Some(total.assess(stage.id, *threshold))
}
