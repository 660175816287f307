//! AppForge - agentic web-app builder core
//!
//! A user describes a web application in natural language; an automated
//! agent iteratively writes files and runs commands inside an isolated,
//! ephemeral execution environment until it judges the request satisfied,
//! while observers watch a live activity stream.
//!
//! # Modules
//!
//! - `sandbox` - environment capability port and the lifecycle manager
//! - `llm` - conversation types, the completion port, and an HTTP client
//! - `tools` - translates tool invocations into environment operations
//! - `agent` - the conversation driver (the agentic loop)
//! - `broadcast` - per-session activity event fan-out
//! - `service` - the public entry points, wired over the two ports
//! - `metrics` - Prometheus metrics for observability
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use appforge::llm::HttpCompletion;
//! use appforge::service::Orchestrator;
//!
//! let env = Arc::new(my_provider_adapter);
//! let completion = Arc::new(HttpCompletion::new("http://localhost:11434", "qwen3"));
//! let forge = Orchestrator::with_defaults(env, completion);
//!
//! let outcome = forge.chat("s1", "build me a todo app", vec![]).await?;
//! println!("{}", outcome.final_text);
//! ```

pub mod agent;
pub mod broadcast;
pub mod llm;
pub mod metrics;
pub mod sandbox;
pub mod service;
pub mod tools;
pub mod tracing;

// Re-export commonly used types at crate root for convenience
pub use agent::{AgentConfig, AgentError, ChatOutcome};
pub use broadcast::{ActivityBroadcaster, ActivityEvent, ActivityKind};
pub use llm::{ChatMessage, Completion, CompletionTurn, ToolCall};
pub use sandbox::{
    ExecutionEnvironment, KeepAlive, SandboxConfig, SandboxError, SandboxManager, SessionStatus,
};
pub use service::Orchestrator;
