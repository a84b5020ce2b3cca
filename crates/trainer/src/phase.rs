use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub const CLASSIFICATION_PHASE_NAME: &str = "classification";
pub const EARLINESS_PHASE_NAME: &str = "earliness";

/// Training stage, derived from the epoch counter and never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    Classification,
    Earliness,
}

impl Phase {
    /// Phase in effect at `epoch` for a run switching at `switch_epoch`.
    pub fn at(epoch: usize, switch_epoch: usize) -> Self {
        if epoch < switch_epoch {
            Phase::Classification
        } else {
            Phase::Earliness
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Phase::Classification => CLASSIFICATION_PHASE_NAME,
            Phase::Earliness => EARLINESS_PHASE_NAME,
        }
    }

    /// Checkpoint slot of this phase inside `store`.
    pub fn checkpoint_path(&self, store: &Path) -> PathBuf {
        store.join(format!("model_{}.pth", self.name()))
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEvent {
    StartingClassification,
    EndingClassification,
    StartingEarliness,
    EndingEarliness,
}

impl PhaseEvent {
    /// Phase whose checkpoint slot is written when this event fires.
    pub fn checkpoint(&self) -> Option<Phase> {
        match self {
            PhaseEvent::EndingClassification => Some(Phase::Classification),
            PhaseEvent::EndingEarliness => Some(Phase::Earliness),
            PhaseEvent::StartingClassification | PhaseEvent::StartingEarliness => None,
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            PhaseEvent::StartingClassification => "starting training phase classification",
            PhaseEvent::EndingClassification => "ending training phase classification",
            PhaseEvent::StartingEarliness => "starting training phase earliness",
            PhaseEvent::EndingEarliness => "ending training phase earliness",
        }
    }
}

/// Events due when the epoch counter reads `epoch`.
///
/// The boundaries are tested in order (start, switch, end) and only the first
/// match fires, so a schedule with `switch_epoch == epochs` never reaches
/// `EndingEarliness`.
pub fn events_at(epoch: usize, switch_epoch: usize, epochs: usize) -> Vec<PhaseEvent> {
    if epoch == 0 {
        vec![PhaseEvent::StartingClassification]
    } else if epoch == switch_epoch {
        vec![PhaseEvent::EndingClassification, PhaseEvent::StartingEarliness]
    } else if epoch == epochs {
        vec![PhaseEvent::EndingEarliness]
    } else {
        Vec::new()
    }
}
