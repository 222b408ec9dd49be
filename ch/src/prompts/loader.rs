//! Prompt Loader
//!
//! Loads prompt templates from the override directory or falls back to the
//! embedded defaults, then renders them with Handlebars.

use std::path::{Path, PathBuf};

use eyre::{Result, eyre};
use handlebars::Handlebars;
use serde::Serialize;
use tracing::debug;

use super::embedded;

/// Render context for `expansion.pmt`
#[derive(Debug, Clone, Serialize)]
pub struct ExpansionPrompt<'a> {
    pub prompt: &'a str,
    pub context: Option<&'a str>,
    pub perspectives: u32,
}

/// Render context for `single-call.pmt`
#[derive(Debug, Clone, Serialize)]
pub struct SingleCallPrompt<'a> {
    pub prompt: &'a str,
    pub context: Option<&'a str>,
}

/// Render context for `participant.pmt`
#[derive(Debug, Clone, Serialize)]
pub struct ParticipantPrompt<'a> {
    pub prompt: &'a str,
    pub perspective: &'a str,
    pub instruction: &'a str,
    pub methodology: &'a str,
    pub tools_enabled: bool,
}

/// One participant's findings as shown to synthesis
#[derive(Debug, Clone, Serialize)]
pub struct FindingEntry<'a> {
    pub perspective: &'a str,
    pub findings: &'a str,
}

/// Render context for `synthesis.pmt`
#[derive(Debug, Clone, Serialize)]
pub struct SynthesisPrompt<'a> {
    pub prompt: &'a str,
    pub findings: Vec<FindingEntry<'a>>,
    pub unavailable: Vec<&'a str>,
}

/// Loads and renders prompt templates
pub struct PromptLoader {
    hbs: Handlebars<'static>,
    /// User override directory
    override_dir: Option<PathBuf>,
}

impl PromptLoader {
    /// Loader that checks `override_dir` before the embedded prompts
    pub fn new(override_dir: Option<&Path>) -> Self {
        debug!(?override_dir, "PromptLoader::new: called");
        let override_dir = override_dir.filter(|d| d.is_dir()).map(Path::to_path_buf);
        if override_dir.is_none() {
            debug!("PromptLoader::new: no usable override directory");
        }
        Self {
            hbs: Self::engine(),
            override_dir,
        }
    }

    /// Create a loader that only uses embedded prompts
    pub fn embedded_only() -> Self {
        Self {
            hbs: Self::engine(),
            override_dir: None,
        }
    }

    fn engine() -> Handlebars<'static> {
        let mut hbs = Handlebars::new();
        // Prompts are plain text, not HTML
        hbs.register_escape_fn(handlebars::no_escape);
        hbs
    }

    /// Load a template by name: override file first, then embedded
    fn load_template(&self, name: &str) -> Result<String> {
        debug!(%name, "PromptLoader::load_template: called");
        if let Some(ref dir) = self.override_dir {
            let path = dir.join(format!("{}.pmt", name));
            if path.exists() {
                debug!(?path, "PromptLoader::load_template: found override");
                return std::fs::read_to_string(&path)
                    .map_err(|e| eyre!("Failed to read prompt {}: {}", path.display(), e));
            }
        }

        embedded::get_embedded(name)
            .map(str::to_string)
            .ok_or_else(|| eyre!("Prompt template not found: {}", name))
    }

    /// Render a template with the given context
    pub fn render<T: Serialize>(&self, template_name: &str, context: &T) -> Result<String> {
        debug!(%template_name, "PromptLoader::render: called");
        let template = self.load_template(template_name)?;
        self.hbs
            .render_template(&template, context)
            .map(|s| s.trim().to_string())
            .map_err(|e| eyre!("Failed to render template {}: {}", template_name, e))
    }

    pub fn expansion(&self, ctx: &ExpansionPrompt<'_>) -> Result<String> {
        self.render("expansion", ctx)
    }

    pub fn single_call(&self, ctx: &SingleCallPrompt<'_>) -> Result<String> {
        self.render("single-call", ctx)
    }

    pub fn participant(&self, ctx: &ParticipantPrompt<'_>) -> Result<String> {
        self.render("participant", ctx)
    }

    pub fn synthesis(&self, ctx: &SynthesisPrompt<'_>) -> Result<String> {
        self.render("synthesis", ctx)
    }
}
