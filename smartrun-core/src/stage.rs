//! Stage descriptors — the immutable half of the pipeline definition.
//!
//! A [`Stage`] binds one position in the fixed pipeline order to an external
//! command and the artifacts it reads and writes. Stages are built once at
//! startup and never mutated during a run.

use crate::artifact::ArtifactSpec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Position in the fixed, linear pipeline order.
///
/// Variant order is pipeline order: `Ord` compares ordinals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    Download,
    Merge,
    Features,
    Labels,
    Train,
    Predict,
    #[serde(alias = "signal-generation", alias = "signal_generation")]
    Signals,
    Backtest,
}

impl StageId {
    /// Every stage, in pipeline order.
    pub const ALL: [StageId; 8] = [
        StageId::Download,
        StageId::Merge,
        StageId::Features,
        StageId::Labels,
        StageId::Train,
        StageId::Predict,
        StageId::Signals,
        StageId::Backtest,
    ];

    /// Zero-based position in the pipeline.
    pub fn ordinal(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            StageId::Download => "download",
            StageId::Merge => "merge",
            StageId::Features => "features",
            StageId::Labels => "labels",
            StageId::Train => "train",
            StageId::Predict => "predict",
            StageId::Signals => "signals",
            StageId::Backtest => "backtest",
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown stage '{0}'. Valid: download, merge, features, labels, train, predict, signals, backtest")]
pub struct UnknownStage(pub String);

impl FromStr for StageId {
    type Err = UnknownStage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "download" => Ok(StageId::Download),
            "merge" => Ok(StageId::Merge),
            "features" => Ok(StageId::Features),
            "labels" => Ok(StageId::Labels),
            "train" => Ok(StageId::Train),
            "predict" => Ok(StageId::Predict),
            "signals" | "signal-generation" | "signal_generation" => Ok(StageId::Signals),
            "backtest" => Ok(StageId::Backtest),
            _ => Err(UnknownStage(s.to_string())),
        }
    }
}

/// External command bound to a stage. Arguments are already expanded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            if arg.contains(char::is_whitespace) {
                write!(f, " \"{arg}\"")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// Derived metrics a stage's outputs can be checked against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricSpec {
    /// Count buy/sell labels in a column of every output file and flag the
    /// run when `|buy - sell| / max(buy, sell)` exceeds `threshold`.
    SignalBalance {
        column: String,
        buy: String,
        sell: String,
        threshold: f64,
    },
}

/// One unit of the pipeline.
#[derive(Debug, Clone)]
pub struct Stage {
    pub id: StageId,
    pub command: CommandSpec,
    pub inputs: Vec<ArtifactSpec>,
    pub outputs: Vec<ArtifactSpec>,
    pub metrics: Option<MetricSpec>,
}

impl Stage {
    pub fn new(id: StageId, command: CommandSpec) -> Self {
        Self {
            id,
            command,
            inputs: Vec::new(),
            outputs: Vec::new(),
            metrics: None,
        }
    }

    pub fn input(mut self, artifact: ArtifactSpec) -> Self {
        self.inputs.push(artifact);
        self
    }

    pub fn output(mut self, artifact: ArtifactSpec) -> Self {
        self.outputs.push(artifact);
        self
    }

    pub fn with_metrics(mut self, metrics: MetricSpec) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn name(&self) -> &'static str {
        self.id.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordinals_follow_pipeline_order() {
        for (i, id) in StageId::ALL.iter().enumerate() {
            assert_eq!(id.ordinal(), i);
        }
        assert!(StageId::Merge < StageId::Features);
        assert!(StageId::Signals < StageId::Backtest);
    }

    #[test]
    fn parses_names_and_aliases() {
        for id in StageId::ALL {
            assert_eq!(id.name().parse::<StageId>().unwrap(), id);
        }
        assert_eq!("signal-generation".parse::<StageId>().unwrap(), StageId::Signals);
        assert_eq!(" Train ".parse::<StageId>().unwrap(), StageId::Train);
        assert!("deploy".parse::<StageId>().is_err());
    }

    #[test]
    fn command_display_quotes_whitespace() {
        let cmd = CommandSpec::new("python").args(["-m", "train"]).arg("my file.csv");
        assert_eq!(cmd.to_string(), "python -m train \"my file.csv\"");
    }
}
