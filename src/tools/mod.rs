//! Tool executor
//!
//! Translates a named tool invocation into environment operations and a
//! textual result the model can read. The tool set is a closed enum so
//! dispatch is an exhaustive match; an unknown name becomes a descriptive
//! result string, preserving the one-result-per-invocation invariant.
//! Nothing in here ever aborts the conversation: every failure, including
//! environment port errors, folds into the result text.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::broadcast::{ActivityBroadcaster, ActivityEvent, ActivityKind};
use crate::llm::{Tool, ToolCall, ToolFunction};
use crate::metrics;
use crate::sandbox::{EnvironmentRef, ExecutionEnvironment, SandboxManager};

/// The closed set of tools the agent may invoke
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    WriteFile,
    RunCommand,
}

impl ToolKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "write_file" => Some(ToolKind::WriteFile),
            "run_command" => Some(ToolKind::RunCommand),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ToolKind::WriteFile => "write_file",
            ToolKind::RunCommand => "run_command",
        }
    }

    /// Tool definitions advertised to the completion port
    pub fn schema() -> Vec<Tool> {
        vec![
            Tool {
                tool_type: "function".to_string(),
                function: ToolFunction {
                    name: "write_file".to_string(),
                    description: "Write a file inside the project workspace. Parent \
                                  directories are created automatically. Overwrites any \
                                  existing file at the path."
                        .to_string(),
                    parameters: serde_json::json!({
                        "type": "object",
                        "properties": {
                            "path": {
                                "type": "string",
                                "description": "File path relative to the workspace root"
                            },
                            "content": {
                                "type": "string",
                                "description": "Full contents of the file"
                            }
                        },
                        "required": ["path", "content"]
                    }),
                },
            },
            Tool {
                tool_type: "function".to_string(),
                function: ToolFunction {
                    name: "run_command".to_string(),
                    description: "Run a shell command in the workspace root and return \
                                  its output. Non-zero exit codes are reported as an \
                                  error string you can read and react to."
                        .to_string(),
                    parameters: serde_json::json!({
                        "type": "object",
                        "properties": {
                            "command": {
                                "type": "string",
                                "description": "The shell command to run"
                            }
                        },
                        "required": ["command"]
                    }),
                },
            },
        ]
    }
}

/// How one tool invocation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolOutcome {
    Success,
    ToolError,
}

/// The single result every invocation produces
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub text: String,
    pub outcome: ToolOutcome,
}

impl ToolResult {
    fn ok(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            outcome: ToolOutcome::Success,
        }
    }

    fn err(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            outcome: ToolOutcome::ToolError,
        }
    }
}

/// Configuration for tool execution
#[derive(Debug, Clone)]
pub struct ToolExecutorConfig {
    /// Deadline for a single run_command invocation
    pub command_timeout: Duration,
}

impl Default for ToolExecutorConfig {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(60),
        }
    }
}

/// Executes tool invocations against a session's environment
pub struct ToolExecutor<E: ExecutionEnvironment> {
    manager: Arc<SandboxManager<E>>,
    env: Arc<E>,
    broadcaster: Arc<ActivityBroadcaster>,
    config: ToolExecutorConfig,
}

impl<E: ExecutionEnvironment> ToolExecutor<E> {
    pub fn new(
        manager: Arc<SandboxManager<E>>,
        env: Arc<E>,
        broadcaster: Arc<ActivityBroadcaster>,
        config: ToolExecutorConfig,
    ) -> Self {
        Self {
            manager,
            env,
            broadcaster,
            config,
        }
    }

    /// Dispatch one invocation and produce its result.
    ///
    /// Always returns exactly one result; failures become result text,
    /// never errors.
    pub async fn execute(&self, session_key: &str, call: &ToolCall) -> ToolResult {
        let Some(kind) = ToolKind::parse(&call.name) else {
            warn!(session_key, tool = %call.name, "unknown tool requested");
            return ToolResult::err(format!("Unknown tool: {}", call.name));
        };

        let env_ref = match self.manager.acquire(session_key).await {
            Ok(env_ref) => env_ref,
            Err(e) => {
                self.emit_error(session_key, &e.to_string());
                return ToolResult::err(format!("Error: {}", e));
            }
        };

        let result = match kind {
            ToolKind::WriteFile => self.write_file(session_key, &env_ref, call).await,
            ToolKind::RunCommand => self.run_command(session_key, &env_ref, call).await,
        };
        metrics::TOOL_CALLS
            .with_label_values(&[
                kind.name(),
                match result.outcome {
                    ToolOutcome::Success => "success",
                    ToolOutcome::ToolError => "tool_error",
                },
            ])
            .inc();
        result
    }

    async fn write_file(
        &self,
        session_key: &str,
        env_ref: &EnvironmentRef<E::Handle>,
        call: &ToolCall,
    ) -> ToolResult {
        let path = call.string_arg("path").unwrap_or("").trim();
        if path.is_empty() {
            return ToolResult::err("Error: path parameter is missing.");
        }
        // An empty file is almost always the model forgetting the content
        // field; refuse rather than silently writing nothing.
        let content = call.string_arg("content").unwrap_or("");
        if content.is_empty() {
            return ToolResult::err(
                "Error: content parameter is empty. Provide the full file contents.",
            );
        }

        if let Some((dir, _)) = path.rsplit_once('/') {
            if !dir.is_empty() {
                let mkdir = format!("mkdir -p {}", shell_single_quote(dir));
                if let Err(e) = self
                    .env
                    .run(&env_ref.handle, &mkdir, self.config.command_timeout)
                    .await
                {
                    self.emit_error(session_key, &e.to_string());
                    return ToolResult::err(format!("Error: {}", e));
                }
            }
        }

        if let Err(e) = self
            .env
            .write_file(&env_ref.handle, path, content.as_bytes())
            .await
        {
            self.emit_error(session_key, &e.to_string());
            return ToolResult::err(format!("Error: {}", e));
        }

        debug!(session_key, path, bytes = content.len(), "file written");
        self.broadcaster.publish(ActivityEvent::now(
            session_key,
            ActivityKind::FileChange {
                path: path.to_string(),
            },
        ));
        ToolResult::ok(format!("Wrote {} bytes to {}", content.len(), path))
    }

    async fn run_command(
        &self,
        session_key: &str,
        env_ref: &EnvironmentRef<E::Handle>,
        call: &ToolCall,
    ) -> ToolResult {
        let command = call.string_arg("command").unwrap_or("").trim();
        if command.is_empty() {
            return ToolResult::err("Error: command parameter is empty.");
        }

        let start = Instant::now();
        let output = match self
            .env
            .run(&env_ref.handle, command, self.config.command_timeout)
            .await
        {
            Ok(output) => output,
            Err(e) => {
                self.emit_error(session_key, &e.to_string());
                return ToolResult::err(format!("Error: {}", e));
            }
        };
        metrics::COMMAND_DURATION.observe(start.elapsed().as_secs_f64());

        let mut terminal = output.stdout.clone();
        if !output.stderr.is_empty() {
            if !terminal.is_empty() {
                terminal.push('\n');
            }
            terminal.push_str(&output.stderr);
        }
        self.broadcaster.publish(ActivityEvent::now(
            session_key,
            ActivityKind::Terminal { output: terminal },
        ));

        if output.success() {
            ToolResult::ok(output.stdout)
        } else {
            // Formatted, not thrown: the model reads this and adapts
            ToolResult::err(format!(
                "Error (exit {}): {}",
                output.exit_code, output.stderr
            ))
        }
    }

    fn emit_error(&self, session_key: &str, message: &str) {
        warn!(session_key, error = message, "tool execution failed");
        self.broadcaster.publish(ActivityEvent::now(
            session_key,
            ActivityKind::Error {
                message: message.to_string(),
            },
        ));
    }
}

/// Single-quote a string for the shell; embedded quotes become '\''
fn shell_single_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
