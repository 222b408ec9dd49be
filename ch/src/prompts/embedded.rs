//! Embedded prompts
//!
//! Compiled into the binary from .pmt files at build time.

use tracing::debug;

pub const EXPANSION: &str = include_str!("../../prompts/expansion.pmt");

pub const SINGLE_CALL: &str = include_str!("../../prompts/single-call.pmt");

pub const PARTICIPANT: &str = include_str!("../../prompts/participant.pmt");

pub const SYNTHESIS: &str = include_str!("../../prompts/synthesis.pmt");

/// Get the embedded prompt by name
pub fn get_embedded(name: &str) -> Option<&'static str> {
    debug!(%name, "get_embedded: called");
    match name {
        "expansion" => Some(EXPANSION),
        "single-call" => Some(SINGLE_CALL),
        "participant" => Some(PARTICIPANT),
        "synthesis" => Some(SYNTHESIS),
        _ => None,
    }
}
