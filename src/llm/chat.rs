//! Chat conversation types and the completion capability port
//!
//! The agent loop speaks to the language model only through the
//! [`Completion`] trait. Conversations are ordered lists of tagged turns;
//! tool-result turns always immediately follow the assistant turn that
//! requested them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A message in a chat conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String, // "system", "user", "assistant", "tool"
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
            tool_calls: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
            tool_calls: None,
        }
    }

    /// An assistant turn, carrying whatever tool calls it requested
    pub fn assistant_turn(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(tool_calls)
            },
        }
    }

    /// A tool-result turn answering one requested invocation
    pub fn tool(content: impl Into<String>) -> Self {
        Self {
            role: "tool".to_string(),
            content: content.into(),
            tool_calls: None,
        }
    }
}

/// One tool invocation requested by the model
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "WireToolCall", into = "WireToolCall")]
pub struct ToolCall {
    pub name: String,
    /// Named arguments as a JSON object; fields are strings
    pub arguments: serde_json::Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }

    /// Fetch a string argument by name, if present and non-null
    pub fn string_arg(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(|v| v.as_str())
    }
}

/// Wire shape used by chat APIs: {"function": {"name", "arguments"}}
#[derive(Serialize, Deserialize)]
struct WireToolCall {
    function: WireFunction,
}

#[derive(Serialize, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

impl From<WireToolCall> for ToolCall {
    fn from(wire: WireToolCall) -> Self {
        Self {
            name: wire.function.name,
            arguments: wire.function.arguments,
        }
    }
}

impl From<ToolCall> for WireToolCall {
    fn from(call: ToolCall) -> Self {
        Self {
            function: WireFunction {
                name: call.name,
                arguments: call.arguments,
            },
        }
    }
}

/// Tool definition advertised to the model
#[derive(Debug, Clone, Serialize)]
pub struct Tool {
    #[serde(rename = "type")]
    pub tool_type: String, // always "function"
    pub function: ToolFunction,
}

/// Function specification for a tool
#[derive(Debug, Clone, Serialize)]
pub struct ToolFunction {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value, // JSON Schema
}

/// One assistant turn produced by the completion port
#[derive(Debug, Clone)]
pub struct CompletionTurn {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

impl CompletionTurn {
    pub fn text_only(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_calls: Vec::new(),
        }
    }
}

/// Error type for completion operations
#[derive(Debug)]
pub enum ChatError {
    Request(reqwest::Error),
    Parse(serde_json::Error),
    EmptyResponse,
    /// Provider-side failure not covered by the other variants
    Service(String),
}

impl std::fmt::Display for ChatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatError::Request(e) => write!(f, "Request error: {}", e),
            ChatError::Parse(e) => write!(f, "Parse error: {}", e),
            ChatError::EmptyResponse => write!(f, "Empty response from completion service"),
            ChatError::Service(msg) => write!(f, "Completion service error: {}", msg),
        }
    }
}

impl std::error::Error for ChatError {}

impl From<reqwest::Error> for ChatError {
    fn from(e: reqwest::Error) -> Self {
        ChatError::Request(e)
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(e: serde_json::Error) -> Self {
        ChatError::Parse(e)
    }
}

/// Completion capability port: given a conversation and the tool schema,
/// produce the next assistant turn.
#[async_trait]
pub trait Completion: Send + Sync + 'static {
    async fn next_turn(
        &self,
        conversation: &[ChatMessage],
        tools: &[Tool],
    ) -> Result<CompletionTurn, ChatError>;
}

/// Parse tool calls out of assistant text.
///
/// Some models emit tool calls as JSON inside the content instead of using
/// the native tool_calls field. Scans for balanced top-level JSON objects
/// and keeps the ones that look like `{"name": ..., "arguments": {...}}`.
pub fn parse_tool_calls_from_text(content: &str) -> Vec<ToolCall> {
    let content = content.trim();
    let mut tool_calls = Vec::new();

    if let Some(call) = try_parse_tool_call(content) {
        tool_calls.push(call);
        return tool_calls;
    }

    let mut depth = 0;
    let mut start = None;
    for (i, c) in content.char_indices() {
        match c {
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start.take() {
                        if let Some(call) = try_parse_tool_call(&content[s..=i]) {
                            tool_calls.push(call);
                        }
                    }
                }
            }
            _ => {}
        }
    }

    tool_calls
}

fn try_parse_tool_call(json_str: &str) -> Option<ToolCall> {
    let value: serde_json::Value = serde_json::from_str(json_str).ok()?;
    let name = value.get("name")?.as_str()?;
    let arguments = value
        .get("arguments")
        .or_else(|| value.get("parameters"))?
        .clone();
    if !arguments.is_object() {
        return None;
    }
    Some(ToolCall::new(name, arguments))
}
