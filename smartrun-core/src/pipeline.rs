//! Pipeline registry: the ordered, validated set of stages for one profile.

use crate::stage::{Stage, StageId};
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("pipeline defines no stages")]
    Empty,

    #[error("stage '{0}' is defined more than once")]
    Duplicate(StageId),

    #[error("stage '{later}' is defined before '{earlier}'; stages must follow pipeline order")]
    OutOfOrder { earlier: StageId, later: StageId },

    #[error("stage '{0}' has an empty command")]
    EmptyCommand(StageId),
}

/// Stages in fixed pipeline order. Stages absent from the definition are
/// simply not part of this pipeline.
#[derive(Debug, Clone)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new(stages: Vec<Stage>) -> Result<Self, PipelineError> {
        if stages.is_empty() {
            return Err(PipelineError::Empty);
        }
        for stage in &stages {
            if stage.command.program.trim().is_empty() {
                return Err(PipelineError::EmptyCommand(stage.id));
            }
        }
        for pair in stages.windows(2) {
            let (prev, next) = (pair[0].id, pair[1].id);
            if prev == next {
                return Err(PipelineError::Duplicate(next));
            }
            if prev > next {
                return Err(PipelineError::OutOfOrder {
                    earlier: next,
                    later: prev,
                });
            }
        }
        Ok(Self { stages })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn get(&self, id: StageId) -> Option<&Stage> {
        self.stages.iter().find(|s| s.id == id)
    }

    pub fn ids(&self) -> impl Iterator<Item = StageId> + '_ {
        self.stages.iter().map(|s| s.id)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

/// Which stages of a pipeline take part in a run.
///
/// `Only` names stages explicitly, so every one of them must exist in the
/// pipeline. `Range` is a span of pipeline order and tolerates gaps.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StageSelection {
    #[default]
    All,
    Only(BTreeSet<StageId>),
    Range { first: StageId, last: StageId },
}

impl StageSelection {
    pub fn only<I: IntoIterator<Item = StageId>>(ids: I) -> Self {
        StageSelection::Only(ids.into_iter().collect())
    }

    /// Every stage from `first` to `last`, inclusive.
    pub fn range(first: StageId, last: StageId) -> Self {
        StageSelection::Range { first, last }
    }

    pub fn includes(&self, id: StageId) -> bool {
        match self {
            StageSelection::All => true,
            StageSelection::Only(ids) => ids.contains(&id),
            StageSelection::Range { first, last } => id >= *first && id <= *last,
        }
    }

    /// Explicitly named stages that `pipeline` does not define.
    pub fn undefined_in(&self, pipeline: &Pipeline) -> Vec<StageId> {
        match self {
            StageSelection::Only(ids) => ids
                .iter()
                .copied()
                .filter(|id| pipeline.get(*id).is_none())
                .collect(),
            StageSelection::All | StageSelection::Range { .. } => Vec::new(),
        }
    }
}
