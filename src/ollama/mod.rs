//! Talking to a local Ollama server
//!
//! `chat` is the model backend used by the task dispatcher; `client` covers
//! the management endpoints (local model list, health).

pub mod chat;
pub mod client;

pub use chat::{
    BackendError, ChatClient, ChatMessage, ChatResponse, FunctionCall, ModelBackend, ModelReply,
    Tool, ToolCall, ToolFunction,
};
pub use client::{strip_tags, LocalModel, OllamaClient};
