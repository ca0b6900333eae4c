//! Agent records and transcript turns

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::AgentRole;
use crate::ollama::ChatMessage;
use crate::tools::{ToolKind, ToolSet};

/// Agent lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Waiting for its model download to settle
    Initializing,
    Ready,
    Busy,
    Error,
}

impl AgentStatus {
    pub const ALL: [AgentStatus; 4] = [
        AgentStatus::Initializing,
        AgentStatus::Ready,
        AgentStatus::Busy,
        AgentStatus::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Initializing => "initializing",
            AgentStatus::Ready => "ready",
            AgentStatus::Busy => "busy",
            AgentStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
    Tool,
}

/// One transcript entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub content: String,
    pub at: DateTime<Utc>,
    /// Tool that produced this turn (tool turns only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    /// Whether the tool call succeeded (tool turns only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(TurnRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(TurnRole::Assistant, content)
    }

    pub fn tool(tool: impl Into<String>, success: bool, content: impl Into<String>) -> Self {
        Self {
            tool: Some(tool.into()),
            success: Some(success),
            ..Self::new(TurnRole::Tool, content)
        }
    }

    fn new(role: TurnRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            at: Utc::now(),
            tool: None,
            success: None,
        }
    }

    pub fn to_chat_message(&self) -> ChatMessage {
        match self.role {
            TurnRole::User => ChatMessage::user(self.content.clone()),
            TurnRole::Assistant => ChatMessage::assistant(self.content.clone()),
            TurnRole::Tool => ChatMessage::tool(self.content.clone()),
        }
    }
}

/// Everything the registry knows about one agent
#[derive(Debug, Clone, PartialEq)]
pub struct AgentRecord {
    pub id: String,
    pub role: AgentRole,
    pub model: String,
    pub system_prompt: String,
    pub allowed_tools: ToolSet,
    pub status: AgentStatus,
    pub transcript: Vec<Turn>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub tasks_completed: u64,
    pub total_tokens_used: u64,
}

impl AgentRecord {
    pub fn new(
        role: AgentRole,
        model: impl Into<String>,
        system_prompt: impl Into<String>,
        allowed_tools: ToolSet,
        status: AgentStatus,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            role,
            model: model.into(),
            system_prompt: system_prompt.into(),
            allowed_tools,
            status,
            transcript: Vec::new(),
            created_at: now,
            last_activity: now,
            tasks_completed: 0,
            total_tokens_used: 0,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    /// The last `window` turns, oldest first
    pub fn recent_turns(&self, window: usize) -> &[Turn] {
        let start = self.transcript.len().saturating_sub(window);
        &self.transcript[start..]
    }

    pub fn info(&self) -> AgentInfo {
        AgentInfo {
            id: self.id.clone(),
            role: self.role,
            model: self.model.clone(),
            status: self.status,
            allowed_tools: self.allowed_tools.iter().copied().collect(),
            created_at: self.created_at,
            last_activity: self.last_activity,
            tasks_completed: self.tasks_completed,
            total_tokens_used: self.total_tokens_used,
            conversation_length: self.transcript.len(),
        }
    }
}

/// Summary view returned by list/get
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentInfo {
    pub id: String,
    pub role: AgentRole,
    pub model: String,
    pub status: AgentStatus,
    pub allowed_tools: Vec<ToolKind>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub tasks_completed: u64,
    pub total_tokens_used: u64,
    pub conversation_length: usize,
}
