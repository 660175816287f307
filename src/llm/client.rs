//! HTTP implementation of the completion port
//!
//! Talks to an Ollama-style `/api/chat` endpoint with native tool calling.
//! Falls back to parsing tool calls out of the assistant text for models
//! that ignore the native tool_calls field.

use async_trait::async_trait;
use serde::Deserialize;

use super::chat::{
    parse_tool_calls_from_text, ChatError, ChatMessage, Completion, CompletionTurn, Tool, ToolCall,
};

/// Completion client backed by a chat HTTP API
#[derive(Clone)]
pub struct HttpCompletion {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct WireChatResponse {
    message: WireMessage,
}

#[derive(Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

impl HttpCompletion {
    /// Create a new client.
    ///
    /// # Arguments
    /// * `base_url` - e.g. "http://localhost:11434"
    /// * `model` - model name, e.g. "qwen3"
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Completion for HttpCompletion {
    async fn next_turn(
        &self,
        conversation: &[ChatMessage],
        tools: &[Tool],
    ) -> Result<CompletionTurn, ChatError> {
        let endpoint = format!("{}/api/chat", self.base_url);

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": conversation,
            "stream": false,
            "options": {
                "temperature": 0.0
            }
        });
        if !tools.is_empty() {
            body["tools"] = serde_json::to_value(tools)?;
        }

        let response = self.client.post(&endpoint).json(&body).send().await?;
        let text = response.text().await?;
        if text.is_empty() {
            return Err(ChatError::EmptyResponse);
        }

        let wire: WireChatResponse = serde_json::from_str(&text)?;

        // Native tool calls win; otherwise scan the content for JSON calls
        let tool_calls = wire
            .message
            .tool_calls
            .filter(|calls| !calls.is_empty())
            .unwrap_or_else(|| parse_tool_calls_from_text(&wire.message.content));

        Ok(CompletionTurn {
            text: wire.message.content,
            tool_calls,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_response_with_native_tool_calls() {
        let raw = r#"{
            "message": {
                "role": "assistant",
                "content": "",
                "tool_calls": [
                    {"function": {"name": "run_command", "arguments": {"command": "ls"}}}
                ]
            },
            "done": true
        }"#;
        let wire: WireChatResponse = serde_json::from_str(raw).unwrap();
        let calls = wire.message.tool_calls.unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "run_command");
    }

    #[test]
    fn test_wire_response_without_tool_calls() {
        let raw = r#"{"message": {"role": "assistant", "content": "Done"}, "done": true}"#;
        let wire: WireChatResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(wire.message.content, "Done");
        assert!(wire.message.tool_calls.is_none());
    }
}
