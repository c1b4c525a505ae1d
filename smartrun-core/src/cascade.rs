//! Cascade invalidation state threaded through the stage loop.
//!
//! `active' = active || decision == Recompute`. Once a stage recomputes,
//! every later stage in the same run recomputes too, whatever its own
//! outputs look like.

use crate::decision::Decision;
use crate::stage::StageId;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cascade {
    origin: Option<StageId>,
}

impl Cascade {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.origin.is_some()
    }

    /// First stage that recomputed in this run.
    pub fn origin(&self) -> Option<StageId> {
        self.origin
    }

    /// Fold one decision into the cascade. Never deactivates.
    pub fn observe(&mut self, stage: StageId, decision: &Decision) {
        if self.origin.is_none() && decision.is_recompute() {
            self.origin = Some(stage);
        }
    }
}
