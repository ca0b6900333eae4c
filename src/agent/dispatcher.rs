//! Chat/Task Dispatcher - runs one task against one agent
//!
//! ```text
//!   Received ──► ModelInvoked ──► ResponseReady
//!                   ▲    │
//!                   │    ▼ (tool requested, rounds < max_tool_rounds)
//!          ToolResultAppended ◄── ToolGatewayInvoked
//! ```
//!
//! The agent is held `busy` for the whole task through a [`TaskGuard`]; a
//! second task on the same agent fails with `AgentBusy` instead of queueing.
//! Transcript turns are appended as they happen, so the persisted order is
//! user message, tool results, assistant response.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures_util::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::directive::{decode, Directive};
use super::record::{AgentStatus, Turn};
use super::registry::{AgentRegistry, TaskGuard};
use crate::config::AgentRole;
use crate::error::{CoreError, ErrorKind, Result};
use crate::metrics::TASKS;
use crate::ollama::{ChatMessage, ModelBackend, Tool};
use crate::tools::{ToolError, ToolGateway, ToolKind, ToolResult};

/// Tool output beyond this many bytes is cut before it reaches the model
const MAX_TOOL_OUTPUT: usize = 16 * 1024;

/// One tool call made during a task
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolInvocation {
    pub tool: String,
    pub params: Value,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_status: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
}

/// Outcome of `run_task`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskResult {
    pub agent_id: String,
    pub response: String,
    pub tool_invocations: Vec<ToolInvocation>,
    /// Turns appended to the transcript by this task, in order
    pub new_turns: Vec<Turn>,
    pub success: bool,
    pub limit_reached: bool,
    pub tokens_used: u64,
}

/// Per-agent result of a broadcast
#[derive(Debug, Serialize)]
pub struct BroadcastOutcome {
    pub agent_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<BroadcastError>,
}

#[derive(Debug, Serialize)]
pub struct BroadcastError {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy)]
pub struct DispatchSettings {
    pub max_tool_rounds: usize,
    pub history_window: usize,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            max_tool_rounds: 5,
            history_window: 5,
        }
    }
}

pub struct Dispatcher {
    registry: Arc<AgentRegistry>,
    gateway: Arc<ToolGateway>,
    backend: Arc<dyn ModelBackend>,
    settings: DispatchSettings,
}

/// Accumulates what a task did
struct TaskRun<'a> {
    guard: &'a TaskGuard,
    result: TaskResult,
}

impl<'a> TaskRun<'a> {
    fn new(guard: &'a TaskGuard) -> Self {
        Self {
            result: TaskResult {
                agent_id: guard.agent_id().to_string(),
                response: String::new(),
                tool_invocations: Vec::new(),
                new_turns: Vec::new(),
                success: false,
                limit_reached: false,
                tokens_used: 0,
            },
            guard,
        }
    }

    fn append(&mut self, turn: Turn) {
        self.guard.append(turn.clone());
        self.result.new_turns.push(turn);
    }
}

impl Dispatcher {
    pub fn new(
        registry: Arc<AgentRegistry>,
        gateway: Arc<ToolGateway>,
        backend: Arc<dyn ModelBackend>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            registry,
            gateway,
            backend,
            settings,
        }
    }

    /// Run one chat task
    pub async fn run_task(&self, agent_id: &str, message: &str) -> Result<TaskResult> {
        self.run_task_with_context(agent_id, message, &BTreeMap::new()).await
    }

    /// Run one chat task with extra key/value context for the model
    pub async fn run_task_with_context(
        &self,
        agent_id: &str,
        message: &str,
        context: &BTreeMap<String, Value>,
    ) -> Result<TaskResult> {
        let span = info_span!("agent_task", agent_id = %agent_id, otel.name = "agent_task");
        async {
            let guard = self.begin(agent_id)?;
            let outcome = self.drive(&guard, message, context).await;
            settle(guard, outcome)
        }
        .instrument(span)
        .await
    }

    /// Invoke one tool directly on behalf of an operator, without the model
    pub async fn run_tool(&self, agent_id: &str, tool: &str, params: &Value) -> Result<TaskResult> {
        let span = info_span!("agent_task", agent_id = %agent_id, tool = %tool, otel.name = "agent_tool_task");
        async {
            let guard = self.begin(agent_id)?;
            let mut run = TaskRun::new(&guard);

            run.append(Turn::user(format!("[operator] run {} with {}", tool, params)));
            let (content, ok) = self.invoke_tool(&mut run, tool, params).await;
            run.result.response = content;
            run.result.success = ok;
            let result = run.result;
            settle(guard, Ok(result))
        }
        .instrument(span)
        .await
    }

    /// Run the same message on every agent whose role is in `roles` (all
    /// agents when `None`), in parallel
    pub async fn broadcast(&self, message: &str, roles: Option<&[AgentRole]>) -> Vec<BroadcastOutcome> {
        let targets: Vec<String> = self
            .registry
            .list()
            .into_iter()
            .filter(|a| roles.map_or(true, |r| r.contains(&a.role)))
            .map(|a| a.id)
            .collect();
        info!(agents = targets.len(), "broadcasting task");

        let runs = targets.iter().map(|id| async move {
            match self.run_task(id, message).await {
                Ok(result) => BroadcastOutcome {
                    agent_id: id.clone(),
                    result: Some(result),
                    error: None,
                },
                Err(e) => BroadcastOutcome {
                    agent_id: id.clone(),
                    result: None,
                    error: Some(BroadcastError {
                        kind: e.kind(),
                        message: e.to_string(),
                    }),
                },
            }
        });
        join_all(runs).await
    }

    fn begin(&self, agent_id: &str) -> Result<TaskGuard> {
        self.registry.begin_task(agent_id).map_err(|e| {
            if let CoreError::AgentBusy { .. } = e {
                TASKS.with_label_values(&["busy"]).inc();
            }
            e
        })
    }

    async fn drive(
        &self,
        guard: &TaskGuard,
        message: &str,
        context: &BTreeMap<String, Value>,
    ) -> std::result::Result<TaskResult, (CoreError, TaskResult)> {
        let (model, mut messages, tools) = guard.read(|record| {
            let mut messages = vec![ChatMessage::system(record.system_prompt.clone())];
            if !context.is_empty() {
                messages.push(ChatMessage::system(format_context(context)));
            }
            messages.extend(
                record
                    .recent_turns(self.settings.history_window)
                    .iter()
                    .map(Turn::to_chat_message),
            );
            let tools = self.advertised_tools(&record.allowed_tools);
            (record.model.clone(), messages, tools)
        });

        let mut run = TaskRun::new(guard);
        messages.push(ChatMessage::user(message));
        run.append(Turn::user(message));

        let mut rounds = 0;
        loop {
            let reply = match self.backend.chat(&model, &messages, &tools).await {
                Ok(reply) => reply,
                Err(e) => {
                    error!(model = %model, error = %e, "model backend call failed");
                    return Err((e.into(), run.result));
                }
            };
            run.result.tokens_used += reply.tokens_used;

            let directives = decode(&reply);
            if !directives.iter().any(Directive::is_tool_request) {
                let text = match directives.into_iter().next() {
                    Some(Directive::Text(text)) => text,
                    _ => String::new(),
                };
                run.append(Turn::assistant(text.clone()));
                run.result.response = text;
                run.result.success = true;
                return Ok(run.result);
            }

            if rounds >= self.settings.max_tool_rounds {
                let notice = CoreError::ToolCallLimitExceeded {
                    limit: self.settings.max_tool_rounds,
                }
                .to_string();
                warn!(rounds, "tool-call limit reached");
                run.append(Turn::assistant(notice.clone()));
                run.result.response = notice;
                run.result.limit_reached = true;
                return Ok(run.result);
            }
            rounds += 1;

            let mut assistant = ChatMessage::assistant(reply.content.clone());
            if !reply.tool_calls.is_empty() {
                assistant.tool_calls = Some(reply.tool_calls.clone());
            }
            messages.push(assistant);

            for directive in directives {
                let content = match directive {
                    Directive::Invoke { tool, params } => {
                        self.invoke_tool(&mut run, tool.as_str(), &params).await.0
                    }
                    Directive::Rejected { name, reason } => {
                        debug!(tool = %name, reason = %reason, "tool request rejected");
                        let content = format!("[tool:{} rejected] {}", name, reason);
                        run.result.tool_invocations.push(ToolInvocation {
                            tool: name.clone(),
                            params: Value::Null,
                            success: false,
                            exit_status: None,
                            error_kind: Some(ErrorKind::ExecutionError),
                            duration_ms: None,
                        });
                        run.append(Turn::tool(name, false, content.clone()));
                        content
                    }
                    Directive::Text(_) => continue,
                };
                messages.push(ChatMessage::tool(content));
            }
        }
    }

    /// Invoke through the gateway and record the tool turn. Returns the turn
    /// content and whether the call succeeded.
    async fn invoke_tool(&self, run: &mut TaskRun<'_>, tool: &str, params: &Value) -> (String, bool) {
        let agent_id = run.result.agent_id.clone();
        let outcome = self.gateway.invoke(&agent_id, tool, params).await;

        let (content, invocation) = match outcome {
            Ok(result) => (
                format_tool_result(&result),
                ToolInvocation {
                    tool: tool.to_string(),
                    params: params.clone(),
                    success: true,
                    exit_status: Some(result.exit_status),
                    error_kind: None,
                    duration_ms: Some(result.duration_ms),
                },
            ),
            Err(e) => {
                let (exit_status, duration_ms) = match &e {
                    ToolError::Execution { result: Some(r), .. } => (Some(r.exit_status), Some(r.duration_ms)),
                    _ => (None, None),
                };
                let content = format_tool_error(tool, &e);
                let kind = CoreError::from(e).kind();
                (
                    content,
                    ToolInvocation {
                        tool: tool.to_string(),
                        params: params.clone(),
                        success: false,
                        exit_status,
                        error_kind: Some(kind),
                        duration_ms,
                    },
                )
            }
        };

        let ok = invocation.success;
        run.result.tool_invocations.push(invocation);
        run.append(Turn::tool(tool, ok, content.clone()));
        (content, ok)
    }

    /// Definitions for tools this agent may actually run
    fn advertised_tools(&self, allowed: &crate::tools::ToolSet) -> Vec<Tool> {
        let policy = self.gateway.policy();
        allowed
            .iter()
            .filter(|t| policy.whitelist.contains(t))
            .filter(|t| !t.runs_arbitrary_code() || policy.allow_raw_command)
            .map(ToolKind::definition)
            .collect()
    }
}

/// Release the agent and turn the run into the caller's result
fn settle(guard: TaskGuard, outcome: std::result::Result<TaskResult, (CoreError, TaskResult)>) -> Result<TaskResult> {
    match outcome {
        Ok(result) => {
            guard.add_tokens(result.tokens_used);
            let label = if result.limit_reached {
                "limit_reached"
            } else if result.success {
                "success"
            } else {
                "error"
            };
            TASKS.with_label_values(&[label]).inc();
            info!(
                success = result.success,
                limit_reached = result.limit_reached,
                tools = result.tool_invocations.len(),
                "task finished"
            );
            guard.finish(AgentStatus::Ready, result.success);
            Ok(result)
        }
        Err((e, partial)) => {
            guard.add_tokens(partial.tokens_used);
            TASKS.with_label_values(&["error"]).inc();
            let status = if e.kind() == ErrorKind::BackendUnavailable {
                AgentStatus::Error
            } else {
                AgentStatus::Ready
            };
            guard.finish(status, false);
            Err(e)
        }
    }
}

fn format_context(context: &BTreeMap<String, Value>) -> String {
    let lines: Vec<String> = context
        .iter()
        .map(|(k, v)| match v {
            Value::String(s) => format!("{}: {}", k, s),
            other => format!("{}: {}", k, other),
        })
        .collect();
    format!("Additional context:\n{}", lines.join("\n"))
}

fn format_tool_result(result: &ToolResult) -> String {
    let mut out = format!(
        "[tool:{} exit={} duration={:.0}ms]\n{}",
        result.tool,
        result.exit_status,
        result.duration_ms,
        truncate(&result.stdout)
    );
    if !result.stderr.trim().is_empty() {
        out.push_str("\n[stderr]\n");
        out.push_str(&truncate(&result.stderr));
    }
    out
}

fn format_tool_error(tool: &str, e: &ToolError) -> String {
    let kind = match e {
        ToolError::Forbidden(_) | ToolError::AgentNotFound(_) => "forbidden",
        ToolError::Timeout { .. } => "timeout",
        ToolError::InvalidParams { .. } | ToolError::Execution { .. } => "execution_error",
    };
    let mut out = format!("[tool:{} error={}] {}", tool, kind, e);
    if let ToolError::Execution { result: Some(r), .. } = e {
        if !r.stdout.trim().is_empty() {
            out.push_str("\n[stdout]\n");
            out.push_str(&truncate(&r.stdout));
        }
        if !r.stderr.trim().is_empty() {
            out.push_str("\n[stderr]\n");
            out.push_str(&truncate(&r.stderr));
        }
    }
    out
}

fn truncate(text: &str) -> String {
    if text.len() <= MAX_TOOL_OUTPUT {
        return text.to_string();
    }
    let mut end = MAX_TOOL_OUTPUT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n[... {} bytes truncated]", &text[..end], text.len() - end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let text = "é".repeat(MAX_TOOL_OUTPUT);
        let out = truncate(&text);
        assert!(out.contains("bytes truncated"));
        assert!(out.len() < text.len());
        assert_eq!(truncate("short"), "short");
    }

    #[test]
    fn test_format_context() {
        let mut ctx = BTreeMap::new();
        ctx.insert("target".to_string(), Value::String("10.0.0.5".into()));
        ctx.insert("ports".to_string(), serde_json::json!([22, 80]));
        assert_eq!(format_context(&ctx), "Additional context:\nports: [22,80]\ntarget: 10.0.0.5");
    }

    #[test]
    fn test_tool_error_content_names_kind() {
        let e = ToolError::Timeout {
            tool: ToolKind::Nmap,
            after: std::time::Duration::from_secs(600),
        };
        assert!(format_tool_error("nmap", &e).starts_with("[tool:nmap error=timeout]"));
        let e = ToolError::Forbidden("no".into());
        assert!(format_tool_error("command", &e).contains("error=forbidden"));
    }
}
