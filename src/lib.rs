//! Maestro -- a multi-agent orchestration server.
//!
//! Routes a natural-language request to one or more specialized agents
//! (calendar, notes, email, file summarization, general Q&A), executes
//! them in dependency order over a shared scratchpad, and compiles their
//! partial results into a single response. Sessions own every persisted
//! artifact: chat transcripts, notes, email drafts and uploaded files.

pub mod agents;
pub mod clients;
pub mod config;
pub mod llm;
pub mod logging;
pub mod orchestrator;
pub mod store;
pub mod types;
