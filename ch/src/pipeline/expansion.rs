//! Expansion stage: one prompt into N instructions
//!
//! The model is forced to answer through the `submit_instructions` tool, whose
//! input is validated against a strict serde schema. Text answers are accepted
//! only when the whole text is that JSON document.

use serde::Deserialize;
use sessionstore::{Cost, Instruction};
use tracing::{debug, info};

use super::{Stage, StageContext, StageError};
use crate::llm::{CompletionRequest, CompletionResponse, Message, ToolDefinition};
use crate::prompts::ExpansionPrompt;

/// Name of the structured-output tool
pub const SUBMIT_TOOL: &str = "submit_instructions";

const SYSTEM_PROMPT: &str = "You plan multi-perspective analyses. Always answer by calling the \
                             submit_instructions tool with exactly the requested number of perspectives.";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct InstructionPayload {
    instructions: Vec<InstructionEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct InstructionEntry {
    perspective: String,
    instruction: String,
    methodology: String,
}

/// JSON schema offered to the model for the submit tool
pub fn submit_tool() -> ToolDefinition {
    ToolDefinition::new(
        SUBMIT_TOOL,
        "Submit the analysis perspectives",
        serde_json::json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "instructions": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "additionalProperties": false,
                        "properties": {
                            "perspective": {"type": "string"},
                            "instruction": {"type": "string"},
                            "methodology": {"type": "string"}
                        },
                        "required": ["perspective", "instruction", "methodology"]
                    }
                }
            },
            "required": ["instructions"]
        }),
    )
}

/// Extract and validate exactly `expected` instructions from a response
///
/// Ids are assigned `1..=expected` in the order returned.
pub fn parse_expansion(response: &CompletionResponse, expected: u32) -> Result<Vec<Instruction>, StageError> {
    debug!(expected, tool_calls = response.tool_calls.len(), "parse_expansion: called");

    let payload: InstructionPayload = match response.tool_calls.iter().find(|c| c.name == SUBMIT_TOOL) {
        Some(call) => serde_json::from_value(call.input.clone()).map_err(|e| StageError::MalformedOutput(e.to_string()))?,
        None => {
            let text = response.content.as_deref().map(str::trim).unwrap_or_default();
            if text.is_empty() {
                return Err(StageError::EmptyOutput { stage: Stage::Expand });
            }
            serde_json::from_str(text).map_err(|e| StageError::MalformedOutput(e.to_string()))?
        }
    };

    if payload.instructions.is_empty() {
        return Err(StageError::EmptyOutput { stage: Stage::Expand });
    }
    if payload.instructions.len() != expected as usize {
        return Err(StageError::MalformedOutput(format!(
            "expected {} instructions, got {}",
            expected,
            payload.instructions.len()
        )));
    }

    Ok(payload
        .instructions
        .into_iter()
        .zip(1..)
        .map(|(entry, id)| Instruction {
            id,
            perspective: entry.perspective,
            instruction: entry.instruction,
            methodology: entry.methodology,
        })
        .collect())
}

/// Run the expansion call
pub async fn expand(
    ctx: &StageContext,
    prompt: &str,
    context: Option<&str>,
    perspectives: u32,
) -> Result<(Vec<Instruction>, Cost), StageError> {
    debug!(perspectives, has_context = context.is_some(), "expand: called");
    let user = ctx
        .prompts
        .expansion(&ExpansionPrompt {
            prompt,
            context,
            perspectives,
        })
        .map_err(StageError::prompt)?;

    let request = CompletionRequest {
        system_prompt: SYSTEM_PROMPT.to_string(),
        messages: vec![Message::user(user)],
        tools: vec![submit_tool()],
        tool_choice: Some(SUBMIT_TOOL.to_string()),
        max_tokens: ctx.max_tokens,
    };

    let response = ctx
        .llm
        .complete(request)
        .await
        .map_err(|e| StageError::llm(Stage::Expand, e))?;
    let cost = ctx.pricing.cost(&ctx.model, &response.usage)?;
    let instructions = parse_expansion(&response, perspectives)?;

    info!(count = instructions.len(), usd = cost.usd, "Expansion complete");
    Ok((instructions, cost))
}
