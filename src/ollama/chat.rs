//! Wire types and client for `/api/chat`, including tool calls
//!
//! This module provides the [`ModelBackend`] seam the dispatcher talks to and
//! its Ollama implementation over `/api/chat`. Tool definitions are passed in
//! the request's `tools` field; the reply is returned raw (content plus any
//! native `tool_calls`) and decoded into directives by the agent layer.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info_span, Instrument};

use crate::metrics::LLM_CALL_TIME;

/// A message in a chat conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String, // "system", "user", "assistant", "tool"
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role("assistant", content)
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self::with_role("tool", content)
    }

    fn with_role(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
            tool_calls: None,
        }
    }
}

/// A tool call from the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub function: FunctionCall,
}

/// Function call details
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// Tool definition for the model
#[derive(Debug, Clone, Serialize)]
pub struct Tool {
    #[serde(rename = "type")]
    pub tool_type: String, // Always "function"
    pub function: ToolFunction,
}

/// Function specification for a tool
#[derive(Debug, Clone, Serialize)]
pub struct ToolFunction {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value, // JSON Schema
}

/// One non-streamed `/api/chat` reply
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    pub message: ChatMessage,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub prompt_eval_count: u32,
    #[serde(default)]
    pub eval_count: u32,
    #[serde(default)]
    pub eval_duration: u64,
}

/// What the model said back, before any interpretation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelReply {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    /// Prompt plus completion tokens, when the backend reports them
    pub tokens_used: u64,
}

impl ModelReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }
}

/// Error type for model backend operations
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request to {endpoint} failed: {source}")]
    Request {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint} returned HTTP {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("could not parse backend response: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("empty response from Ollama")]
    EmptyResponse,
}

/// Outbound interface to whatever serves the models
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// One non-streaming chat completion
    async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: &[Tool],
    ) -> Result<ModelReply, BackendError>;

    /// Release the model's memory on the backend
    async fn unload(&self, model: &str) -> Result<(), BackendError>;
}

/// Sends agent conversations to `/api/chat` and returns the assistant turn
#[derive(Clone)]
pub struct ChatClient {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl ChatClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            timeout,
        }
    }

    async fn post_json(&self, path: &str, body: &serde_json::Value) -> Result<String, BackendError> {
        let endpoint = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&endpoint)
            .timeout(self.timeout)
            .json(body)
            .send()
            .await
            .map_err(|source| BackendError::Request { endpoint: endpoint.clone(), source })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|source| BackendError::Request { endpoint: endpoint.clone(), source })?;

        if !status.is_success() {
            return Err(BackendError::Status {
                endpoint,
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(text)
    }
}

#[async_trait]
impl ModelBackend for ChatClient {
    async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: &[Tool],
    ) -> Result<ModelReply, BackendError> {
        let span = info_span!("llm_call", model = %model, messages = messages.len(), otel.name = "llm_call");

        async {
            let mut body = serde_json::json!({
                "model": model,
                "messages": messages,
                "stream": false,
                "options": {
                    "temperature": 0.0
                }
            });
            if !tools.is_empty() {
                body["tools"] = serde_json::to_value(tools)?;
            }

            let start = Instant::now();
            let text = self.post_json("/api/chat", &body).await?;
            LLM_CALL_TIME
                .with_label_values(&[model])
                .observe(start.elapsed().as_secs_f64());

            if text.is_empty() {
                return Err(BackendError::EmptyResponse);
            }

            let response: ChatResponse = serde_json::from_str(&text)?;
            debug!(
                eval_count = response.eval_count,
                tool_calls = response.message.tool_calls.as_ref().map_or(0, Vec::len),
                "chat response received"
            );

            Ok(ModelReply {
                content: response.message.content,
                tool_calls: response.message.tool_calls.unwrap_or_default(),
                tokens_used: u64::from(response.prompt_eval_count) + u64::from(response.eval_count),
            })
        }
        .instrument(span)
        .await
    }

    async fn unload(&self, model: &str) -> Result<(), BackendError> {
        let body = serde_json::json!({ "model": model, "keep_alive": 0 });
        self.post_json("/api/generate", &body).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_message_constructors() {
        assert_eq!(ChatMessage::system("s").role, "system");
        assert_eq!(ChatMessage::tool("t").role, "tool");
        assert!(ChatMessage::user("u").tool_calls.is_none());
    }

    #[test]
    fn test_tool_calls_omitted_when_absent() {
        let json = serde_json::to_value(ChatMessage::assistant("hi")).unwrap();
        assert!(json.get("tool_calls").is_none());
    }

    #[test]
    fn test_parse_native_tool_call_response() {
        let raw = r#"{
            "model": "llama3.1",
            "message": {
                "role": "assistant",
                "content": "",
                "tool_calls": [{"function": {"name": "nmap", "arguments": {"target": "10.0.0.1"}}}]
            },
            "done": true,
            "eval_count": 12
        }"#;
        let resp: ChatResponse = serde_json::from_str(raw).unwrap();
        let calls = resp.message.tool_calls.unwrap();
        assert_eq!(calls[0].function.name, "nmap");
        assert_eq!(calls[0].function.arguments["target"], "10.0.0.1");
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = ChatClient::new("http://localhost:11434/", Duration::from_secs(1));
        assert_eq!(client.base_url, "http://localhost:11434");
    }
}
