//! Collector and formatter

use std::fmt::Write;

use sessionstore::{Cost, Instruction, PerspectiveResult, Turn, TurnMode};
use tracing::debug;

use super::RunPlan;
use super::plan::RunMode;

/// Stage outputs accumulated while the sequencer runs
#[derive(Debug, Clone, Default)]
pub struct StageOutputs {
    pub response: Option<String>,
    pub expansion: Option<Vec<Instruction>>,
    pub perspectives: Option<Vec<PerspectiveResult>>,
    pub synthesis: Option<String>,
    /// Sum of every stage cost actually incurred
    pub cost: Cost,
}

/// Assemble the turn record from whatever stages ran
pub fn collect(
    plan: &RunPlan,
    turn_number: u32,
    prompt: &str,
    outputs: StageOutputs,
    elapsed_seconds: f64,
    timestamp: i64,
) -> Turn {
    debug!(turn_number, usd = outputs.cost.usd, "collect: called");
    let mode = match plan.mode {
        RunMode::SingleCall => TurnMode::SingleCall,
        RunMode::Chorus { .. } if plan.dry_run => TurnMode::DryRun,
        RunMode::Chorus { .. } => TurnMode::Chorus,
    };

    Turn {
        turn_number,
        prompt: prompt.to_string(),
        mode,
        response: outputs.response,
        expansion: outputs.expansion,
        perspectives: outputs.perspectives,
        synthesis: outputs.synthesis,
        total_cost: outputs.cost,
        elapsed_seconds,
        timestamp,
    }
}

/// Output format for turn reports
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use: text or json", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Render a turn as JSON or as a readable report
pub fn render(turn: &Turn, format: OutputFormat) -> Result<String, serde_json::Error> {
    debug!(turn_number = turn.turn_number, %format, "render: called");
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(turn),
        OutputFormat::Text => Ok(render_text(turn)),
    }
}

pub fn format_cost(cost: &Cost) -> String {
    format!(
        "${:.4} ({} in / {} out tokens)",
        cost.usd, cost.input_tokens, cost.output_tokens
    )
}

fn render_text(turn: &Turn) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Turn {} [{}] {:.1}s {}",
        turn.turn_number,
        turn.mode,
        turn.elapsed_seconds,
        format_cost(&turn.total_cost)
    );
    let _ = writeln!(out, "Prompt: {}", turn.prompt);

    if let Some(response) = &turn.response {
        let _ = writeln!(out, "\n{}", response);
    }

    if let Some(expansion) = &turn.expansion
        && turn.perspectives.is_none()
    {
        let _ = writeln!(out, "\nInstructions:");
        for i in expansion {
            let _ = writeln!(out, "  {}. {}: {}", i.id, i.perspective, i.instruction);
            let _ = writeln!(out, "     method: {}", i.methodology);
        }
    }

    if let Some(perspectives) = &turn.perspectives {
        for p in perspectives {
            let status = if p.failed { " (failed)" } else { "" };
            let _ = writeln!(out, "\n## {}. {}{}", p.id, p.perspective, status);
            let _ = writeln!(out, "{}", p.findings);
        }
    }

    if let Some(synthesis) = &turn.synthesis {
        let _ = writeln!(out, "\n## Synthesis\n{}", synthesis);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::DispatchPolicy;

    fn chorus_plan(dry_run: bool) -> RunPlan {
        RunPlan {
            mode: RunMode::Chorus { perspectives: 2 },
            dry_run,
            summarize: false,
            dispatch: DispatchPolicy::Concurrent,
            tools_enabled: false,
        }
    }

    fn instruction(id: u32) -> Instruction {
        Instruction {
            id,
            perspective: format!("P{}", id),
            instruction: "look".to_string(),
            methodology: "method".to_string(),
        }
    }

    #[test]
    fn test_collect_sets_mode_and_cost() {
        let outputs = StageOutputs {
            expansion: Some(vec![instruction(1), instruction(2)]),
            cost: Cost::new(10, 5, 0.5),
            ..Default::default()
        };
        let turn = collect(&chorus_plan(true), 2, "Q", outputs, 1.5, 42);
        assert_eq!(turn.mode, TurnMode::DryRun);
        assert_eq!(turn.turn_number, 2);
        assert_eq!(turn.total_cost.usd, 0.5);
        assert!(turn.perspectives.is_none());
        assert!(turn.synthesis.is_none());
    }

    #[test]
    fn test_render_text_dry_run_lists_instructions() {
        let outputs = StageOutputs {
            expansion: Some(vec![instruction(1)]),
            ..Default::default()
        };
        let turn = collect(&chorus_plan(true), 1, "Q", outputs, 0.0, 0);
        let text = render(&turn, OutputFormat::Text).unwrap();
        assert!(text.contains("[dry-run]"));
        assert!(text.contains("1. P1: look"));
    }

    #[test]
    fn test_render_json_is_camel_case() {
        let turn = collect(&chorus_plan(false), 1, "Q", StageOutputs::default(), 0.0, 0);
        let json = render(&turn, OutputFormat::Json).unwrap();
        assert!(json.contains("\"turnNumber\": 1"));
        assert!(!json.contains("synthesis"));
    }

    #[test]
    fn test_output_format_parse() {
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("plain".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert!("table".parse::<OutputFormat>().is_err());
    }
}
