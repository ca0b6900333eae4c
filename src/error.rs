//! Error taxonomy shared by every core component
//!
//! Each failure carries a machine-readable [`ErrorKind`] so the HTTP layer
//! can pick a status code without looking at message text, plus a
//! human-readable message from `Display`.

use serde::Serialize;
use thiserror::Error;

use crate::models::CatalogError;
use crate::ollama::BackendError;
use crate::tools::ToolError;

/// Result alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Machine-readable failure kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidRole,
    ModelUnavailable,
    InsufficientResources,
    AgentNotFound,
    AgentBusy,
    Forbidden,
    Timeout,
    ExecutionError,
    ToolCallLimitExceeded,
    BackendUnavailable,
    InvalidRequest,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidRole => "invalid_role",
            ErrorKind::ModelUnavailable => "model_unavailable",
            ErrorKind::InsufficientResources => "insufficient_resources",
            ErrorKind::AgentNotFound => "agent_not_found",
            ErrorKind::AgentBusy => "agent_busy",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ExecutionError => "execution_error",
            ErrorKind::ToolCallLimitExceeded => "tool_call_limit_exceeded",
            ErrorKind::BackendUnavailable => "backend_unavailable",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Core error type returned across the boundary
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Role '{0}' is not configured")]
    InvalidRole(String),

    #[error("Model '{model}' is unavailable: {reason}")]
    ModelUnavailable { model: String, reason: String },

    #[error("Insufficient resources: {0}")]
    InsufficientResources(String),

    #[error("Agent {0} not found")]
    AgentNotFound(String),

    #[error("Agent {agent_id} is busy ({reason})")]
    AgentBusy { agent_id: String, reason: String },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Tool '{tool}' timed out after {seconds}s")]
    Timeout { tool: String, seconds: u64 },

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Tool-call limit reached ({limit} round-trips)")]
    ToolCallLimitExceeded { limit: usize },

    #[error("Model backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::InvalidRole(_) => ErrorKind::InvalidRole,
            CoreError::ModelUnavailable { .. } => ErrorKind::ModelUnavailable,
            CoreError::InsufficientResources(_) => ErrorKind::InsufficientResources,
            CoreError::AgentNotFound(_) => ErrorKind::AgentNotFound,
            CoreError::AgentBusy { .. } => ErrorKind::AgentBusy,
            CoreError::Forbidden(_) => ErrorKind::Forbidden,
            CoreError::Timeout { .. } => ErrorKind::Timeout,
            CoreError::Execution(_) => ErrorKind::ExecutionError,
            CoreError::ToolCallLimitExceeded { .. } => ErrorKind::ToolCallLimitExceeded,
            CoreError::BackendUnavailable(_) => ErrorKind::BackendUnavailable,
            CoreError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            CoreError::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<CatalogError> for CoreError {
    fn from(e: CatalogError) -> Self {
        match e {
            CatalogError::NotFound(model) => CoreError::ModelUnavailable {
                model,
                reason: "not in catalog".to_string(),
            },
            other => CoreError::Internal(other.to_string()),
        }
    }
}

impl From<BackendError> for CoreError {
    fn from(e: BackendError) -> Self {
        CoreError::BackendUnavailable(e.to_string())
    }
}

impl From<ToolError> for CoreError {
    fn from(e: ToolError) -> Self {
        match e {
            ToolError::Forbidden(msg) => CoreError::Forbidden(msg),
            ToolError::AgentNotFound(id) => CoreError::AgentNotFound(id),
            ToolError::Timeout { tool, after } => CoreError::Timeout {
                tool: tool.to_string(),
                seconds: after.as_secs(),
            },
            other => CoreError::Execution(other.to_string()),
        }
    }
}
