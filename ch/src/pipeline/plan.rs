//! Declarative run plan and the stage list it selects

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Pipeline shape, decided by the perspective count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunMode {
    /// One model call answers the prompt
    SingleCall,
    /// Expansion into `perspectives` instructions, then fan-out
    Chorus { perspectives: u32 },
}

impl RunMode {
    pub fn from_perspectives(perspectives: u32) -> Self {
        if perspectives == 0 {
            RunMode::SingleCall
        } else {
            RunMode::Chorus { perspectives }
        }
    }

    pub fn perspectives(&self) -> u32 {
        match self {
            RunMode::SingleCall => 0,
            RunMode::Chorus { perspectives } => *perspectives,
        }
    }
}

/// How fan-out participants are scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DispatchPolicy {
    /// All participants at once
    #[default]
    Concurrent,
    /// One participant at a time, in instruction order
    Serial,
}

/// One step of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    /// Expansion, or the single call in single-call mode
    Expand,
    FanOut,
    Synthesize,
    Collect,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Expand => write!(f, "expand"),
            Stage::FanOut => write!(f, "fan-out"),
            Stage::Synthesize => write!(f, "synthesize"),
            Stage::Collect => write!(f, "collect"),
        }
    }
}

/// Everything the sequencer needs to know about which stages to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunPlan {
    pub mode: RunMode,
    /// Stop after expansion (chorus mode only)
    pub dry_run: bool,
    /// Append synthesis (chorus mode only)
    pub summarize: bool,
    pub dispatch: DispatchPolicy,
    /// Let participants and the single call use tools
    pub tools_enabled: bool,
}

impl RunPlan {
    /// The fixed, ordered stage list for this plan
    pub fn stages(&self) -> Vec<Stage> {
        let stages = match self.mode {
            RunMode::SingleCall => vec![Stage::Expand, Stage::Collect],
            RunMode::Chorus { .. } if self.dry_run => vec![Stage::Expand, Stage::Collect],
            RunMode::Chorus { .. } if self.summarize => {
                vec![Stage::Expand, Stage::FanOut, Stage::Synthesize, Stage::Collect]
            }
            RunMode::Chorus { .. } => vec![Stage::Expand, Stage::FanOut, Stage::Collect],
        };
        debug!(?self, ?stages, "RunPlan::stages: called");
        stages
    }

    /// True when expansion output is the final product
    pub fn is_dry_run(&self) -> bool {
        self.dry_run && matches!(self.mode, RunMode::Chorus { .. })
    }
}
