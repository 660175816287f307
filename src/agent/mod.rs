//! Agentic loop for LLM-driven web-app building
//!
//! # Architecture
//!
//! ```text
//! caller → AgentDriver.chat() → Completion port (next turn)
//!                 ↓ tool calls?
//!          ToolExecutor → SandboxManager.acquire() → environment port
//!                 ↓
//!          result folded back into the conversation → loop repeats
//!                 ↓ no tool calls
//!          final text returned; activity events stream throughout
//! ```

pub mod driver;

pub use driver::{
    AgentConfig, AgentDriver, AgentError, ChatOutcome, DEFAULT_SYSTEM_PROMPT, FALLBACK_REPLY,
};
