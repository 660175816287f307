//! Language-model integration
//!
//! Conversation types, the [`Completion`] capability port, and an HTTP
//! client implementing it against a chat API with tool calling.

pub mod chat;
pub mod client;

pub use chat::{
    parse_tool_calls_from_text, ChatError, ChatMessage, Completion, CompletionTurn, Tool,
    ToolCall, ToolFunction,
};
pub use client::HttpCompletion;
