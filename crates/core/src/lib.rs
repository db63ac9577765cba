//! Onboarding Core
//!
//! Domain logic shared by the HTTP service: the field schema and the tool it
//! compiles into, the instruction prompts, the in-memory session store, the
//! MCP tool service the chat agent calls, and the LLM turn runner.

pub mod agent;
pub mod field;
pub mod llm_client;
pub mod prompt;
pub mod runner;
pub mod session;
pub mod tool_spec;
