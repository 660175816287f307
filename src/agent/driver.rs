//! Conversation driver - the agentic tool-execution loop
//!
//! Given a session key, a new user message, and prior turns, the driver
//! repeatedly asks the completion port for the next assistant turn and
//! dispatches any requested tools strictly sequentially, in turn order,
//! until a turn arrives with no tool calls. Tool failures fold into the
//! conversation; only completion and provisioning failures abort.

use std::sync::Arc;

use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::broadcast::{ActivityBroadcaster, ActivityEvent, ActivityKind};
use crate::llm::{ChatError, ChatMessage, Completion, ToolCall};
use crate::metrics;
use crate::sandbox::{ExecutionEnvironment, SandboxError, SandboxManager};
use crate::tools::{ToolExecutor, ToolKind, ToolOutcome};

/// Substituted when the model finishes with no text at all
pub const FALLBACK_REPLY: &str =
    "I wasn't able to produce a response for this request. Please try again.";

/// Default system prompt for the web-app building agent
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a web application builder working inside an isolated sandbox.

You have two tools:
- write_file(path, content): create or overwrite a file; parent directories are created for you
- run_command(command): run a shell command in the workspace root and see its output

Guidelines:
- Build what the user describes, file by file, verifying with run_command as you go
- If a command fails, read the error output and fix the problem
- Always pass the complete file contents to write_file; partial edits are not supported
- When the application is ready, respond with a plain-text summary and no tool calls"#;

/// Configuration for the conversation driver
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Hard ceiling on completion round-trips per invocation. The natural
    /// termination condition is a turn with no tool calls; this cap keeps
    /// an unterminated tool-calling model from looping forever.
    pub max_iterations: usize,
    /// Custom system prompt (uses the default if None)
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 24,
            system_prompt: None,
        }
    }
}

/// Result of one chat invocation
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    /// Final assistant text; never empty
    pub final_text: String,
    /// Completion round-trips made
    pub iterations: usize,
    /// Tool invocations dispatched
    pub tool_calls_made: usize,
    /// True when the iteration ceiling cut the loop short; final_text is
    /// then the best-available assistant text
    pub iteration_capped: bool,
}

/// Error type for chat invocations
#[derive(Debug)]
pub enum AgentError {
    /// The user message was empty
    EmptyMessage,
    /// Acquiring or provisioning the environment failed
    Sandbox(SandboxError),
    /// The completion port itself failed; fatal to this invocation
    Completion(ChatError),
}

impl std::fmt::Display for AgentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentError::EmptyMessage => write!(f, "user message is empty"),
            AgentError::Sandbox(e) => write!(f, "sandbox error: {}", e),
            AgentError::Completion(e) => write!(f, "completion error: {}", e),
        }
    }
}

impl std::error::Error for AgentError {}

impl From<SandboxError> for AgentError {
    fn from(e: SandboxError) -> Self {
        AgentError::Sandbox(e)
    }
}

impl From<ChatError> for AgentError {
    fn from(e: ChatError) -> Self {
        AgentError::Completion(e)
    }
}

/// Orchestrates completion calls and tool dispatch for one session
pub struct AgentDriver<E: ExecutionEnvironment, C: Completion> {
    completion: Arc<C>,
    manager: Arc<SandboxManager<E>>,
    executor: ToolExecutor<E>,
    broadcaster: Arc<ActivityBroadcaster>,
    config: AgentConfig,
}

impl<E: ExecutionEnvironment, C: Completion> AgentDriver<E, C> {
    pub fn new(
        completion: Arc<C>,
        manager: Arc<SandboxManager<E>>,
        executor: ToolExecutor<E>,
        broadcaster: Arc<ActivityBroadcaster>,
        config: AgentConfig,
    ) -> Self {
        Self {
            completion,
            manager,
            executor,
            broadcaster,
            config,
        }
    }

    /// Run the loop for one user message.
    ///
    /// The conversation is built fresh from the prior turns plus the new
    /// message; persisting it across calls is the caller's concern.
    pub async fn chat(
        &self,
        session_key: &str,
        message: &str,
        history: Vec<ChatMessage>,
    ) -> Result<ChatOutcome, AgentError> {
        if message.trim().is_empty() {
            return Err(AgentError::EmptyMessage);
        }

        let trace_id = Uuid::now_v7().to_string();
        let span = info_span!("chat", session_key, trace_id = %trace_id);

        async {
            info!(session_key, "starting chat invocation");

            // Obtain the environment up front; failure here aborts the call
            let env_ref = self.manager.provision(session_key).await.map_err(|e| {
                metrics::CHAT_TASKS.with_label_values(&["provision_error"]).inc();
                AgentError::from(e)
            })?;
            info!(session_key, environment_id = %env_ref.environment_id, "environment bound");

            let tools = ToolKind::schema();
            let mut conversation = Vec::with_capacity(history.len() + 2);
            let system_prompt = self
                .config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());
            conversation.push(ChatMessage::system(system_prompt));
            conversation.extend(history);
            conversation.push(ChatMessage::user(message));

            let mut iterations = 0;
            let mut tool_calls_made = 0;
            let mut last_text = String::new();

            while iterations < self.config.max_iterations {
                iterations += 1;

                let turn = self
                    .completion
                    .next_turn(&conversation, &tools)
                    .instrument(info_span!("completion_call", iteration = iterations))
                    .await
                    .map_err(|e| {
                        metrics::CHAT_TASKS
                            .with_label_values(&["completion_error"])
                            .inc();
                        AgentError::from(e)
                    })?;

                if !turn.text.trim().is_empty() {
                    last_text = turn.text.clone();
                }
                conversation.push(ChatMessage::assistant_turn(
                    turn.text.clone(),
                    turn.tool_calls.clone(),
                ));

                if turn.tool_calls.is_empty() {
                    info!(session_key, iterations, tool_calls_made, "chat completed");
                    metrics::CHAT_TASKS.with_label_values(&["success"]).inc();
                    metrics::CHAT_ITERATIONS.observe(iterations as f64);
                    let final_text = if turn.text.trim().is_empty() {
                        FALLBACK_REPLY.to_string()
                    } else {
                        turn.text
                    };
                    return Ok(ChatOutcome {
                        final_text,
                        iterations,
                        tool_calls_made,
                        iteration_capped: false,
                    });
                }

                // Strictly sequential, in request order: effects of one
                // invocation must be visible to the next in the same turn
                for call in &turn.tool_calls {
                    self.broadcaster.publish(ActivityEvent::now(
                        session_key,
                        ActivityKind::ToolCall {
                            tool: call.name.clone(),
                            summary: summarize_call(call),
                        },
                    ));

                    let result = self.executor.execute(session_key, call).await;
                    tool_calls_made += 1;
                    if result.outcome == ToolOutcome::ToolError {
                        warn!(session_key, tool = %call.name, "tool reported an error");
                    }
                    // Exactly one result turn per invocation, request order
                    conversation.push(ChatMessage::tool(result.text));
                }
            }

            // Ceiling reached: return the best-available text with a warning
            // event rather than hanging or discarding the work done so far
            warn!(session_key, iterations, "iteration ceiling reached");
            metrics::CHAT_TASKS.with_label_values(&["capped"]).inc();
            metrics::CHAT_ITERATIONS.observe(iterations as f64);
            self.broadcaster.publish(ActivityEvent::now(
                session_key,
                ActivityKind::Error {
                    message: format!(
                        "stopped after {} completion round-trips without a final answer",
                        iterations
                    ),
                },
            ));
            let final_text = if last_text.is_empty() {
                FALLBACK_REPLY.to_string()
            } else {
                last_text
            };
            Ok(ChatOutcome {
                final_text,
                iterations,
                tool_calls_made,
                iteration_capped: true,
            })
        }
        .instrument(span)
        .await
    }
}

/// One-line description of an invocation for the activity stream
fn summarize_call(call: &ToolCall) -> String {
    match ToolKind::parse(&call.name) {
        Some(ToolKind::WriteFile) => call.string_arg("path").unwrap_or("?").to_string(),
        Some(ToolKind::RunCommand) => truncate(call.string_arg("command").unwrap_or("?"), 80),
        None => String::new(),
    }
}

/// Truncate a string to at most max_len bytes, adding ellipsis if needed.
/// Cuts on a char boundary so multibyte text never panics the slice.
fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut cut = max_len.saturating_sub(3);
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &s[..cut])
}
