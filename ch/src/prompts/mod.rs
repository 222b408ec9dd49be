//! Prompt templates for the pipeline stages
//!
//! Templates are Handlebars `.pmt` files. A file of the same name in the
//! configured prompts directory overrides the embedded copy.

pub mod embedded;
mod loader;

pub use loader::{ExpansionPrompt, FindingEntry, ParticipantPrompt, PromptLoader, SingleCallPrompt, SynthesisPrompt};
