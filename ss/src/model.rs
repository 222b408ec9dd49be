//! Persisted session data model
//!
//! Field names on disk are camelCase so the files line up with the JSON the
//! submit/poll protocol hands to callers.

use std::iter::Sum;
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{PREVIEW_CHARS, now_ms};

/// Token usage and dollar cost of one or more model calls
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cost {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub usd: f64,
}

impl Cost {
    /// Create a cost record
    pub fn new(input_tokens: u64, output_tokens: u64, usd: f64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            usd,
        }
    }

    /// True when no tokens were spent
    pub fn is_zero(&self) -> bool {
        self.input_tokens == 0 && self.output_tokens == 0 && self.usd == 0.0
    }
}

impl Add for Cost {
    type Output = Cost;

    fn add(self, rhs: Cost) -> Cost {
        Cost {
            input_tokens: self.input_tokens + rhs.input_tokens,
            output_tokens: self.output_tokens + rhs.output_tokens,
            usd: self.usd + rhs.usd,
        }
    }
}

impl AddAssign for Cost {
    fn add_assign(&mut self, rhs: Cost) {
        *self = *self + rhs;
    }
}

impl Sum for Cost {
    fn sum<I: Iterator<Item = Cost>>(iter: I) -> Cost {
        iter.fold(Cost::default(), Add::add)
    }
}

impl<'a> Sum<&'a Cost> for Cost {
    fn sum<I: Iterator<Item = &'a Cost>>(iter: I) -> Cost {
        iter.copied().sum()
    }
}

/// One analytical angle produced by expansion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instruction {
    pub id: u32,
    pub perspective: String,
    pub instruction: String,
    pub methodology: String,
}

/// Outcome of one fan-out participant
///
/// A failed participant keeps its slot: `failed` is set, `cost` is zero and
/// `findings` carries the failure marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerspectiveResult {
    pub id: u32,
    pub perspective: String,
    pub instruction: String,
    pub findings: String,
    pub cost: Cost,
    pub turns_used: u32,
    #[serde(default)]
    pub failed: bool,
}

impl PerspectiveResult {
    /// Prefix written into `findings` for a failed participant
    pub const FAILURE_MARKER: &'static str = "[participant failed]";

    /// Build the result slot for a participant that failed
    pub fn failure(instruction: &Instruction, reason: impl std::fmt::Display) -> Self {
        debug!(id = instruction.id, %reason, "PerspectiveResult::failure: called");
        Self {
            id: instruction.id,
            perspective: instruction.perspective.clone(),
            instruction: instruction.instruction.clone(),
            findings: format!("{} {}", Self::FAILURE_MARKER, reason),
            cost: Cost::default(),
            turns_used: 0,
            failed: true,
        }
    }
}

/// Which pipeline shape produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TurnMode {
    /// One call, no fan-out
    SingleCall,
    /// Expansion, fan-out and optional synthesis
    Chorus,
    /// Expansion only
    DryRun,
}

impl std::fmt::Display for TurnMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SingleCall => write!(f, "single-call"),
            Self::Chorus => write!(f, "chorus"),
            Self::DryRun => write!(f, "dry-run"),
        }
    }
}

/// One complete pipeline execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    pub turn_number: u32,
    pub prompt: String,
    pub mode: TurnMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expansion: Option<Vec<Instruction>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub perspectives: Option<Vec<PerspectiveResult>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synthesis: Option<String>,
    pub total_cost: Cost,
    pub elapsed_seconds: f64,
    /// Completion time (unix ms)
    pub timestamp: i64,
}

/// Explicit error marker for a turn that will never complete
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMarker {
    pub turn_number: u32,
    pub message: String,
    /// When the error was recorded (unix ms)
    pub recorded_at: i64,
}

/// A named, durable sequence of turns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_name: String,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default)]
    pub turns: Vec<Turn>,
    #[serde(default)]
    pub total_cost: Cost,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorMarker>,
}

impl Session {
    /// Create an empty session
    pub fn new(name: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            session_name: name.into(),
            created_at: now,
            updated_at: now,
            turns: Vec::new(),
            total_cost: Cost::default(),
            error: None,
        }
    }

    /// Number of completed turns
    pub fn completed_turns(&self) -> u32 {
        self.turns.len() as u32
    }

    /// The turn number the next execution must use
    pub fn next_turn_number(&self) -> u32 {
        self.completed_turns() + 1
    }

    /// Look up a completed turn by its 1-based number
    pub fn turn(&self, turn_number: u32) -> Option<&Turn> {
        if turn_number == 0 {
            return None;
        }
        self.turns.get(turn_number as usize - 1)
    }

    /// Error marker for the given turn, if one was recorded
    pub fn error_for(&self, turn_number: u32) -> Option<&ErrorMarker> {
        self.error.as_ref().filter(|e| e.turn_number == turn_number)
    }

    /// Recompute the aggregate cost from the turn history
    pub fn recompute_total(&mut self) {
        self.total_cost = self.turns.iter().map(|t| t.total_cost).sum();
    }

    /// Lightweight listing preview
    pub fn summary(&self) -> SessionSummary {
        let last_prompt = self
            .turns
            .last()
            .map(|t| truncate(&t.prompt, PREVIEW_CHARS))
            .unwrap_or_default();

        SessionSummary {
            session_name: self.session_name.clone(),
            updated_at: self.updated_at,
            turn_count: self.completed_turns(),
            total_cost: self.total_cost,
            last_prompt,
            has_error: self.error.is_some(),
        }
    }
}

/// Preview metadata returned by `SessionStore::list`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_name: String,
    pub updated_at: i64,
    pub turn_count: u32,
    pub total_cost: Cost,
    pub last_prompt: String,
    pub has_error: bool,
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str("...");
    out
}
