//! ToolContext - execution context for one participant's tool calls

use std::path::{Path, PathBuf};

use tracing::debug;

use super::ToolError;

/// Execution context for tools, scoped to a single participant
///
/// File access is confined to `reference_dir` unless the sandbox is off.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Directory file tools may read from
    pub reference_dir: Option<PathBuf>,

    /// Identifies the participant in logs, e.g. `amber-falcon/3/2`
    pub exec_id: String,

    /// Whether sandbox mode is enabled (default: true)
    pub sandbox_enabled: bool,
}

impl ToolContext {
    /// Create a new tool context
    pub fn new(reference_dir: Option<PathBuf>, exec_id: impl Into<String>) -> Self {
        let exec_id = exec_id.into();
        debug!(?reference_dir, %exec_id, "ToolContext::new: called");
        Self {
            reference_dir,
            exec_id,
            sandbox_enabled: true,
        }
    }

    /// Same context under a different id
    pub fn for_participant(&self, exec_id: impl Into<String>) -> Self {
        Self {
            exec_id: exec_id.into(),
            ..self.clone()
        }
    }

    /// Create a context with sandbox disabled (for testing)
    pub fn new_unsandboxed(reference_dir: PathBuf, exec_id: impl Into<String>) -> Self {
        Self {
            sandbox_enabled: false,
            ..Self::new(Some(reference_dir), exec_id)
        }
    }

    /// Resolve a tool-supplied path and enforce the sandbox
    pub fn validate_path(&self, path: &Path) -> Result<PathBuf, ToolError> {
        debug!(?path, exec_id = %self.exec_id, "ToolContext::validate_path: called");
        let root = self.reference_dir.as_ref().ok_or(ToolError::NoReferenceDir)?;

        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            root.join(path)
        };

        if !self.sandbox_enabled {
            debug!("ToolContext::validate_path: sandbox disabled");
            return Ok(joined);
        }

        // Canonicalize to resolve `..` and symlinks; a missing file cannot escape
        let canonical = joined.canonicalize()?;
        let root_canonical = root.canonicalize()?;

        if canonical.starts_with(&root_canonical) {
            Ok(canonical)
        } else {
            debug!(?canonical, "ToolContext::validate_path: sandbox violation");
            Err(ToolError::SandboxViolation {
                path: path.to_path_buf(),
                root: root.clone(),
            })
        }
    }
}
