//! Chorus: asynchronous multi-perspective analysis
//!
//! A turn expands a question into perspectives, fans out one participant per
//! perspective, optionally synthesizes their findings, and records the result
//! in a session. Submissions return at once; workers run the turn and callers
//! poll for it.

pub mod cli;
pub mod config;
pub mod daemon;
pub mod http;
pub mod ipc;
pub mod jobs;
pub mod llm;
pub mod pipeline;
pub mod prompts;
pub mod service;
pub mod tools;
