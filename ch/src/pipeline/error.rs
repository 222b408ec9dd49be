//! Stage error types

use thiserror::Error;

use super::Stage;
use crate::llm::{LlmError, PricingError};

/// A failure that aborts the current turn
///
/// Nothing of the turn is persisted once a stage returns one of these.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("{stage} stage: model call failed: {source}")]
    Llm {
        stage: Stage,
        #[source]
        source: LlmError,
    },

    #[error("Expansion output did not match the instruction schema: {0}")]
    MalformedOutput(String),

    #[error("{stage} stage produced no output")]
    EmptyOutput { stage: Stage },

    #[error("Synthesis requested but every participant failed")]
    NoUsableFindings,

    #[error(transparent)]
    Pricing(#[from] PricingError),

    #[error("Prompt rendering failed: {0}")]
    Prompt(String),
}

impl StageError {
    pub fn llm(stage: Stage, source: LlmError) -> Self {
        Self::Llm { stage, source }
    }

    pub fn prompt(err: eyre::Report) -> Self {
        Self::Prompt(err.to_string())
    }
}
