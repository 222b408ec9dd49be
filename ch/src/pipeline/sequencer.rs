//! Stage sequencer: walks a run plan's stages in order
//!
//! The sequencer owns no storage. It returns the finished `Turn` or the first
//! stage error, and the caller decides what to persist.

use std::sync::Arc;
use std::time::Instant;

use sessionstore::{Cost, Turn, now_ms};
use tracing::{debug, info};

use super::agent::{AgentTools, run_agent};
use super::collect::{StageOutputs, collect};
use super::expansion::expand;
use super::fanout::fan_out;
use super::plan::RunMode;
use super::synthesis::synthesize;
use super::{RunPlan, Stage, StageError};
use crate::config::Config;
use crate::llm::{CompletionRequest, LlmClient, Message, Pricing};
use crate::prompts::{PromptLoader, SingleCallPrompt};
use crate::tools::{ToolContext, ToolExecutor};

const SINGLE_CALL_SYSTEM_PROMPT: &str = "You are a careful, thorough analyst. Answer the question directly.";

/// Everything a stage needs to talk to the model
#[derive(Clone)]
pub struct StageContext {
    pub llm: Arc<dyn LlmClient>,
    pub pricing: Pricing,
    pub model: String,
    pub prompts: Arc<PromptLoader>,
    pub tools: Arc<ToolExecutor>,
    pub tool_ctx: ToolContext,
    pub max_tokens: u32,
    pub max_tool_iterations: u32,
    /// Concurrent participant cap, 0 for unbounded
    pub max_concurrency: usize,
}

impl StageContext {
    pub fn new(config: &Config, llm: Arc<dyn LlmClient>, model: impl Into<String>, exec_id: impl Into<String>) -> Self {
        let model = model.into();
        let exec_id = exec_id.into();
        debug!(%model, %exec_id, "StageContext::new: called");
        Self {
            llm,
            pricing: Pricing::new(config.pricing.clone()),
            model,
            prompts: Arc::new(PromptLoader::new(config.pipeline.prompts_dir.as_deref())),
            tools: Arc::new(ToolExecutor::research()),
            tool_ctx: ToolContext::new(config.pipeline.reference_dir.clone(), exec_id),
            max_tokens: config.llm.max_tokens,
            max_tool_iterations: config.pipeline.max_tool_iterations,
            max_concurrency: config.pipeline.max_concurrency,
        }
    }
}

/// The prompt side of one turn
#[derive(Debug, Clone)]
pub struct TurnInput {
    pub turn_number: u32,
    pub prompt: String,
    /// Serialized prior turns of a resumed session
    pub context: Option<String>,
}

pub struct Sequencer {
    ctx: StageContext,
}

impl Sequencer {
    pub fn new(ctx: StageContext) -> Self {
        Self { ctx }
    }

    /// Run every stage of the plan; the first stage error aborts the rest
    pub async fn run(&self, plan: &RunPlan, input: &TurnInput) -> Result<Turn, StageError> {
        let stages = plan.stages();
        debug!(turn_number = input.turn_number, ?stages, model = %self.ctx.model, "Sequencer::run: called");
        let started = Instant::now();
        let mut outputs = StageOutputs::default();

        for stage in stages {
            debug!(%stage, "Sequencer::run: entering stage");
            match stage {
                Stage::Expand => self.expand_stage(plan, input, &mut outputs).await?,
                Stage::FanOut => {
                    let instructions = outputs.expansion.as_deref().unwrap_or_default();
                    let results = fan_out(&self.ctx, &input.prompt, instructions, plan.dispatch, plan.tools_enabled).await;
                    outputs.cost += results.iter().map(|r| &r.cost).sum::<Cost>();
                    outputs.perspectives = Some(results);
                }
                Stage::Synthesize => {
                    let results = outputs.perspectives.as_deref().unwrap_or_default();
                    let (text, cost) = synthesize(&self.ctx, &input.prompt, results).await?;
                    outputs.cost += cost;
                    outputs.synthesis = Some(text);
                }
                Stage::Collect => {
                    let elapsed = started.elapsed().as_secs_f64();
                    let turn = collect(plan, input.turn_number, &input.prompt, outputs, elapsed, now_ms());
                    info!(
                        turn_number = turn.turn_number,
                        mode = %turn.mode,
                        usd = turn.total_cost.usd,
                        elapsed_seconds = turn.elapsed_seconds,
                        "Turn complete"
                    );
                    return Ok(turn);
                }
            }
        }

        // Every plan ends in Collect
        Err(StageError::EmptyOutput { stage: Stage::Collect })
    }

    async fn expand_stage(&self, plan: &RunPlan, input: &TurnInput, outputs: &mut StageOutputs) -> Result<(), StageError> {
        match plan.mode {
            RunMode::SingleCall => {
                let (response, cost) = self.single_call(input, plan.tools_enabled).await?;
                outputs.cost += cost;
                outputs.response = Some(response);
            }
            RunMode::Chorus { perspectives } => {
                let (instructions, cost) =
                    expand(&self.ctx, &input.prompt, input.context.as_deref(), perspectives).await?;
                outputs.cost += cost;
                outputs.expansion = Some(instructions);
            }
        }
        Ok(())
    }

    async fn single_call(&self, input: &TurnInput, tools_enabled: bool) -> Result<(String, Cost), StageError> {
        debug!(tools_enabled, "single_call: called");
        let user = self
            .ctx
            .prompts
            .single_call(&SingleCallPrompt {
                prompt: &input.prompt,
                context: input.context.as_deref(),
            })
            .map_err(StageError::prompt)?;

        let request = CompletionRequest {
            system_prompt: SINGLE_CALL_SYSTEM_PROMPT.to_string(),
            messages: vec![Message::user(user)],
            tools: vec![],
            tool_choice: None,
            max_tokens: self.ctx.max_tokens,
        };
        let tools = tools_enabled.then(|| AgentTools {
            executor: self.ctx.tools.as_ref(),
            ctx: &self.ctx.tool_ctx,
        });

        let outcome = run_agent(self.ctx.llm.as_ref(), request, tools, self.ctx.max_tool_iterations)
            .await
            .map_err(|e| StageError::llm(Stage::Expand, e))?;
        let cost = self.ctx.pricing.cost(&self.ctx.model, &outcome.usage)?;

        let response = if outcome.exhausted {
            outcome.bounded_finding()
        } else if outcome.text.trim().is_empty() {
            return Err(StageError::EmptyOutput { stage: Stage::Expand });
        } else {
            outcome.text.trim().to_string()
        };
        Ok((response, cost))
    }
}
