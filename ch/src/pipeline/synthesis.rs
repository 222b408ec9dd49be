//! Synthesis stage: fold participant findings into one answer

use sessionstore::{Cost, PerspectiveResult};
use tracing::{debug, info};

use super::agent::run_agent;
use super::{Stage, StageContext, StageError};
use crate::llm::{CompletionRequest, Message};
use crate::prompts::{FindingEntry, SynthesisPrompt};

const SYSTEM_PROMPT: &str = "You synthesize independent analyses into one balanced, well-supported answer.";

/// Synthesize over the participants that succeeded
///
/// Failed participants are named as unavailable and their failure text never
/// reaches the model. Fails with `NoUsableFindings` when none succeeded.
pub async fn synthesize(
    ctx: &StageContext,
    prompt: &str,
    results: &[PerspectiveResult],
) -> Result<(String, Cost), StageError> {
    let (usable, failed): (Vec<&PerspectiveResult>, Vec<&PerspectiveResult>) = results.iter().partition(|r| !r.failed);
    debug!(usable = usable.len(), failed = failed.len(), "synthesize: called");

    if usable.is_empty() {
        return Err(StageError::NoUsableFindings);
    }

    let user = ctx
        .prompts
        .synthesis(&SynthesisPrompt {
            prompt,
            findings: usable
                .iter()
                .map(|r| FindingEntry {
                    perspective: &r.perspective,
                    findings: &r.findings,
                })
                .collect(),
            unavailable: failed.iter().map(|r| r.perspective.as_str()).collect(),
        })
        .map_err(StageError::prompt)?;

    let request = CompletionRequest {
        system_prompt: SYSTEM_PROMPT.to_string(),
        messages: vec![Message::user(user)],
        tools: vec![],
        tool_choice: None,
        max_tokens: ctx.max_tokens,
    };

    let outcome = run_agent(ctx.llm.as_ref(), request, None, ctx.max_tool_iterations)
        .await
        .map_err(|e| StageError::llm(Stage::Synthesize, e))?;
    let cost = ctx.pricing.cost(&ctx.model, &outcome.usage)?;

    let text = outcome.text.trim();
    if text.is_empty() {
        return Err(StageError::EmptyOutput { stage: Stage::Synthesize });
    }

    info!(usd = cost.usd, "Synthesis complete");
    Ok((text.to_string(), cost))
}
