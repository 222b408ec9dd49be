//! Serialization of prior turns into model context

use std::fmt::Write;

use tracing::debug;

use crate::model::{Session, Turn};

/// Render every completed turn of a session as one plain-text block
///
/// Each turn contributes its number, prompt and the best available answer:
/// the single-call response, else the synthesis, else the per-perspective
/// findings. Returns an empty string for a session without turns.
pub fn session_context(session: &Session) -> String {
    debug!(session = %session.session_name, turns = session.turns.len(), "session_context: called");
    let mut out = String::new();

    for turn in &session.turns {
        render_turn(&mut out, turn);
    }

    out
}

fn render_turn(out: &mut String, turn: &Turn) {
    let _ = writeln!(out, "=== Turn {} ===", turn.turn_number);
    let _ = writeln!(out, "Question: {}", turn.prompt);

    if let Some(response) = &turn.response {
        let _ = writeln!(out, "Answer:\n{}", response.trim());
    } else if let Some(synthesis) = &turn.synthesis {
        let _ = writeln!(out, "Synthesis:\n{}", synthesis.trim());
    } else if let Some(perspectives) = &turn.perspectives {
        for p in perspectives.iter().filter(|p| !p.failed) {
            let _ = writeln!(out, "--- {} ---\n{}", p.perspective, p.findings.trim());
        }
    } else if let Some(expansion) = &turn.expansion {
        for i in expansion {
            let _ = writeln!(out, "- {}: {}", i.perspective, i.instruction);
        }
    }
    out.push('\n');
}
