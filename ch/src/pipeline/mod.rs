//! Analysis pipeline: expand, fan out, synthesize, collect

mod agent;
mod collect;
mod error;
mod expansion;
mod fanout;
mod plan;
mod sequencer;
mod synthesis;

pub use agent::{AgentOutcome, BOUNDED_MARKER};
pub use collect::{OutputFormat, StageOutputs, collect, format_cost, render};
pub use error::StageError;
pub use expansion::{SUBMIT_TOOL, parse_expansion};
pub use plan::{DispatchPolicy, RunMode, RunPlan, Stage};
pub use sequencer::{Sequencer, StageContext, TurnInput};

#[cfg(test)]
pub(crate) use sequencer::tests::{TEST_MODEL, expansion_response, test_context};
