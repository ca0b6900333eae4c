//! Tool Gateway - the single privilege boundary between model output and
//! process execution
//!
//! Every invocation walks the same checks, in order, before anything is
//! launched:
//!
//! ```text
//! tool name ──parse──► ToolKind ──► global whitelist ──► agent allowed set
//!                                                          │
//!                          raw command? ──► allow_raw_command
//!                                                          │
//!                                   parameter validation ◄─┘
//!                                                          │
//!                                  ProcessLauncher / BrowserDriver
//! ```
//!
//! Invocations are built as argument vectors, so parameter content cannot
//! smuggle a second program past the whitelist.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::Url;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::browser::{BrowserDriver, BrowserError};
use super::kind::{ToolKind, ToolSet};
use super::process::{CommandSpec, LaunchError, ProcessLauncher};
use crate::agent::AgentRegistry;
use crate::metrics::{TOOL_DURATION, TOOL_INVOCATIONS};

const DEFAULT_NMAP_FLAGS: &str = "-sV -sC";
const DEFAULT_WORDLIST: &str = "/usr/share/wordlists/dirb/common.txt";

/// nmap switches that take no value and touch no files
const NMAP_SWITCHES: &[&str] = &[
    "-sS", "-sT", "-sU", "-sA", "-sN", "-sF", "-sX", "-sV", "-sC", "-sn", "-Pn", "-PE", "-PS", "-PA",
    "-n", "-R", "-O", "-A", "-F", "-r", "-v", "-vv", "-6", "--open", "--reason", "--traceroute",
    "--version-light", "--version-all", "--osscan-guess",
];

/// nmap options whose only value is a number
const NMAP_NUMERIC_OPTIONS: &[&str] = &[
    "--top-ports",
    "--min-rate",
    "--max-rate",
    "--max-retries",
    "--version-intensity",
    "--min-parallelism",
    "--max-parallelism",
];

/// Largest file the `files` tool writes or returns
const MAX_WORKSPACE_FILE: u64 = 1024 * 1024;

/// Static execution policy, built from configuration
#[derive(Debug, Clone)]
pub struct ToolPolicy {
    /// Tools that may run at all, regardless of agent grants
    pub whitelist: ToolSet,
    /// Fixed working directory for every launched process
    pub workspace_dir: PathBuf,
    /// Ceiling for tools without a specific timeout
    pub default_timeout: Duration,
    /// Per-tool overrides
    pub timeouts: HashMap<ToolKind, Duration>,
    /// Gate for the raw `command` tool
    pub allow_raw_command: bool,
    /// Wordlist used by gobuster when the model does not name one
    pub default_wordlist: String,
}

impl Default for ToolPolicy {
    fn default() -> Self {
        Self {
            whitelist: ToolKind::ALL.iter().copied().filter(|k| !k.runs_arbitrary_code()).collect(),
            workspace_dir: PathBuf::from("/tmp/pentest-playground"),
            default_timeout: Duration::from_secs(300),
            timeouts: HashMap::new(),
            allow_raw_command: false,
            default_wordlist: DEFAULT_WORDLIST.to_string(),
        }
    }
}

impl ToolPolicy {
    pub fn timeout_for(&self, tool: ToolKind) -> Duration {
        self.timeouts
            .get(&tool)
            .copied()
            .unwrap_or_else(|| tool.default_timeout(self.default_timeout))
    }
}

/// Result of a successful tool run
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ToolResult {
    pub tool: ToolKind,
    /// Command line or browser action that was executed
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_status: i32,
    pub duration_ms: f64,
}

/// Failures surfaced by the gateway
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{0}")]
    Forbidden(String),

    #[error("agent {0} not found")]
    AgentNotFound(String),

    #[error("invalid parameters for {tool}: {message}")]
    InvalidParams { tool: ToolKind, message: String },

    #[error("{tool} timed out after {}s", .after.as_secs())]
    Timeout { tool: ToolKind, after: Duration },

    #[error("{tool} failed: {message}")]
    Execution {
        tool: ToolKind,
        message: String,
        /// Captured output when the process ran but exited non-zero
        result: Option<Box<ToolResult>>,
    },
}

impl ToolError {
    fn metric_label(&self) -> &'static str {
        match self {
            ToolError::Forbidden(_) | ToolError::AgentNotFound(_) => "forbidden",
            ToolError::InvalidParams { .. } => "invalid_params",
            ToolError::Timeout { .. } => "timeout",
            ToolError::Execution { .. } => "error",
        }
    }
}

/// What a validated request turns into
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Invocation {
    Process(CommandSpec),
    MetasploitScript {
        spec: CommandSpec,
        script_path: PathBuf,
        contents: String,
    },
    Navigate(Url),
    Screenshot { url: Url, output: PathBuf },
    File(FileOp),
}

/// Workspace file operation; every path is a plain name joined onto the
/// workspace
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum FileOp {
    Save { path: PathBuf, content: String },
    Read { path: PathBuf },
    List,
}

/// Whitelist-checked dispatcher for tool invocations
pub struct ToolGateway {
    registry: Arc<AgentRegistry>,
    launcher: Arc<dyn ProcessLauncher>,
    browser: Arc<dyn BrowserDriver>,
    policy: ToolPolicy,
}

impl ToolGateway {
    pub fn new(
        registry: Arc<AgentRegistry>,
        launcher: Arc<dyn ProcessLauncher>,
        browser: Arc<dyn BrowserDriver>,
        policy: ToolPolicy,
    ) -> Self {
        Self {
            registry,
            launcher,
            browser,
            policy,
        }
    }

    pub fn policy(&self) -> &ToolPolicy {
        &self.policy
    }

    /// Invoke `tool_name` on behalf of `agent_id`
    pub async fn invoke(
        &self,
        agent_id: &str,
        tool_name: &str,
        params: &Value,
    ) -> Result<ToolResult, ToolError> {
        let span = info_span!(
            "tool_invocation",
            agent_id = %agent_id,
            tool = %tool_name,
            otel.name = "tool_invocation"
        );

        async {
            let start = Instant::now();
            let outcome = match self.authorize(agent_id, tool_name) {
                Ok(tool) => self.dispatch(agent_id, tool, params).await,
                Err(e) => Err(e),
            };

            let label = match &outcome {
                Ok(_) => "success",
                Err(e) => e.metric_label(),
            };
            TOOL_INVOCATIONS.with_label_values(&[tool_name_label(tool_name), label]).inc();
            TOOL_DURATION
                .with_label_values(&[tool_name_label(tool_name)])
                .observe(start.elapsed().as_secs_f64());

            match &outcome {
                Ok(result) => info!(exit_status = result.exit_status, duration_ms = result.duration_ms, "tool finished"),
                Err(e) => warn!(error = %e, "tool invocation failed"),
            }
            outcome
        }
        .instrument(span)
        .await
    }

    /// Whitelist and grant checks; nothing has been launched when this fails
    pub fn authorize(&self, agent_id: &str, tool_name: &str) -> Result<ToolKind, ToolError> {
        let tool: ToolKind = tool_name
            .parse()
            .map_err(|_| ToolError::Forbidden(format!("'{}' is not a recognised tool", tool_name)))?;

        if !self.policy.whitelist.contains(&tool) {
            return Err(ToolError::Forbidden(format!(
                "tool '{}' is not in the global whitelist",
                tool
            )));
        }

        let allowed = self
            .registry
            .allowed_tools(agent_id)
            .ok_or_else(|| ToolError::AgentNotFound(agent_id.to_string()))?;
        if !allowed.contains(&tool) {
            return Err(ToolError::Forbidden(format!(
                "tool '{}' is not allowed for agent {}",
                tool, agent_id
            )));
        }

        if tool.runs_arbitrary_code() && !self.policy.allow_raw_command {
            return Err(ToolError::Forbidden(format!(
                "'{}' runs arbitrary code and is disabled (allow_raw_command = false)",
                tool
            )));
        }

        Ok(tool)
    }

    async fn dispatch(&self, agent_id: &str, tool: ToolKind, params: &Value) -> Result<ToolResult, ToolError> {
        let invocation = build_invocation(tool, params, &self.policy)?;
        let timeout = self.policy.timeout_for(tool);

        tokio::fs::create_dir_all(&self.policy.workspace_dir)
            .await
            .map_err(|e| ToolError::Execution {
                tool,
                message: format!("workspace {} unavailable: {}", self.policy.workspace_dir.display(), e),
                result: None,
            })?;

        match invocation {
            Invocation::Process(spec) => {
                if tool.runs_arbitrary_code() {
                    warn!(agent_id = %agent_id, command = %spec.display(), "AUDIT raw command authorised");
                }
                self.run_process(tool, spec).await
            }
            Invocation::MetasploitScript { spec, script_path, contents } => {
                tokio::fs::write(&script_path, contents)
                    .await
                    .map_err(|e| ToolError::Execution {
                        tool,
                        message: format!("failed to write {}: {}", script_path.display(), e),
                        result: None,
                    })?;
                let result = self.run_process(tool, spec).await;
                if let Err(e) = tokio::fs::remove_file(&script_path).await {
                    debug!(path = %script_path.display(), error = %e, "msf script cleanup failed");
                }
                result
            }
            Invocation::Navigate(url) => {
                let start = Instant::now();
                let page = self
                    .browser
                    .navigate(&url, timeout)
                    .await
                    .map_err(|e| browser_error(tool, e))?;
                let stdout = serde_json::to_string_pretty(&page).map_err(|e| ToolError::Execution {
                    tool,
                    message: e.to_string(),
                    result: None,
                })?;
                Ok(ToolResult {
                    tool,
                    command: format!("browser navigate {}", url),
                    stdout,
                    stderr: String::new(),
                    exit_status: 0,
                    duration_ms: start.elapsed().as_secs_f64() * 1000.0,
                })
            }
            Invocation::File(op) => self.run_file_op(tool, op).await,
            Invocation::Screenshot { url, output } => {
                let out = self
                    .browser
                    .screenshot(&url, &output, timeout)
                    .await
                    .map_err(|e| browser_error(tool, e))?;
                Ok(ToolResult {
                    tool,
                    command: format!("browser screenshot {}", url),
                    stdout: serde_json::json!({ "action": "screenshot", "path": output }).to_string(),
                    stderr: out.stderr,
                    exit_status: out.exit_code,
                    duration_ms: out.duration_ms,
                })
            }
        }
    }

    async fn run_file_op(&self, tool: ToolKind, op: FileOp) -> Result<ToolResult, ToolError> {
        let start = Instant::now();
        let failed = |message: String| ToolError::Execution {
            tool,
            message,
            result: None,
        };

        let (command, stdout) = match op {
            FileOp::Save { path, content } => {
                refuse_symlink(&path).await.map_err(failed)?;
                tokio::fs::write(&path, content.as_bytes())
                    .await
                    .map_err(|e| failed(format!("failed to write {}: {}", path.display(), e)))?;
                info!(path = %path.display(), bytes = content.len(), "workspace file saved");
                let out = serde_json::json!({ "action": "save", "path": path, "bytes": content.len() });
                (format!("files save {}", file_label(&path)), out.to_string())
            }
            FileOp::Read { path } => {
                refuse_symlink(&path).await.map_err(failed)?;
                let file = tokio::fs::File::open(&path)
                    .await
                    .map_err(|e| failed(format!("cannot open {}: {}", file_label(&path), e)))?;
                let mut bytes = Vec::new();
                file.take(MAX_WORKSPACE_FILE)
                    .read_to_end(&mut bytes)
                    .await
                    .map_err(|e| failed(format!("cannot read {}: {}", file_label(&path), e)))?;
                (format!("files read {}", file_label(&path)), String::from_utf8_lossy(&bytes).into_owned())
            }
            FileOp::List => {
                let mut entries = tokio::fs::read_dir(&self.policy.workspace_dir)
                    .await
                    .map_err(|e| failed(format!("cannot list workspace: {}", e)))?;
                let mut names = Vec::new();
                while let Some(entry) = entries
                    .next_entry()
                    .await
                    .map_err(|e| failed(format!("cannot list workspace: {}", e)))?
                {
                    names.push(entry.file_name().to_string_lossy().into_owned());
                }
                names.sort();
                let out = serde_json::to_string(&names).map_err(|e| failed(e.to_string()))?;
                ("files list".to_string(), out)
            }
        };

        Ok(ToolResult {
            tool,
            command,
            stdout,
            stderr: String::new(),
            exit_status: 0,
            duration_ms: start.elapsed().as_secs_f64() * 1000.0,
        })
    }

    async fn run_process(&self, tool: ToolKind, spec: CommandSpec) -> Result<ToolResult, ToolError> {
        let command = spec.display();
        info!(command = %command, timeout_secs = spec.timeout.as_secs(), "launching tool");

        let output = self.launcher.run(spec).await.map_err(|e| match e {
            LaunchError::TimedOut { after, .. } => ToolError::Timeout { tool, after },
            other => ToolError::Execution {
                tool,
                message: other.to_string(),
                result: None,
            },
        })?;

        let result = ToolResult {
            tool,
            command,
            stdout: output.stdout,
            stderr: output.stderr,
            exit_status: output.exit_code,
            duration_ms: output.duration_ms,
        };

        if result.exit_status != 0 {
            return Err(ToolError::Execution {
                tool,
                message: format!("exited with status {}", result.exit_status),
                result: Some(Box::new(result)),
            });
        }
        Ok(result)
    }
}

fn browser_error(tool: ToolKind, e: BrowserError) -> ToolError {
    match e {
        BrowserError::Launch(LaunchError::TimedOut { after, .. }) | BrowserError::TimedOut { after, .. } => {
            ToolError::Timeout { tool, after }
        }
        other => ToolError::Execution {
            tool,
            message: other.to_string(),
            result: None,
        },
    }
}

/// Names come from `workspace_file`, so a symlink is the only way out of
/// the workspace
async fn refuse_symlink(path: &Path) -> Result<(), String> {
    match tokio::fs::symlink_metadata(path).await {
        Ok(meta) if meta.file_type().is_symlink() => Err(format!("{} is a symlink", file_label(path))),
        _ => Ok(()),
    }
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Metric labels must come from a bounded set
fn tool_name_label(name: &str) -> &'static str {
    name.parse::<ToolKind>().map(|k| k.as_str()).unwrap_or("unknown")
}

/// Turn tool parameters into a concrete invocation, or reject them
pub(crate) fn build_invocation(tool: ToolKind, params: &Value, policy: &ToolPolicy) -> Result<Invocation, ToolError> {
    let invalid = |message: String| ToolError::InvalidParams { tool, message };
    let workspace = policy.workspace_dir.as_path();
    let timeout = policy.timeout_for(tool);

    match tool {
        ToolKind::Nmap => {
            let target = required_str(params, "target").map_err(invalid)?;
            check_operand(target).map_err(invalid)?;
            let flags = nmap_flags(optional_str(params, "flags").unwrap_or(DEFAULT_NMAP_FLAGS)).map_err(invalid)?;
            let mut spec = CommandSpec::new("nmap", workspace, timeout).args(flags);
            if let Some(requested) = optional_str(params, "output_file") {
                let output = output_path(workspace, Some(requested), || format!("nmap-{}.txt", Uuid::now_v7()));
                spec = spec.arg("-oN").arg(output.display().to_string());
            }
            Ok(Invocation::Process(spec.arg(target)))
        }
        ToolKind::Gobuster => {
            let url = web_url(required_str(params, "url").map_err(invalid)?).map_err(invalid)?;
            let wordlist = optional_str(params, "wordlist").unwrap_or(&policy.default_wordlist);
            check_operand(wordlist).map_err(invalid)?;
            let mut spec = CommandSpec::new("gobuster", workspace, timeout)
                .args(["dir", "-u", url.as_str(), "-w", wordlist]);
            if let Some(ext) = optional_str(params, "extensions") {
                check_operand(ext).map_err(invalid)?;
                spec = spec.args(["-x", ext]);
            }
            Ok(Invocation::Process(spec))
        }
        ToolKind::Sqlmap => {
            let url = web_url(required_str(params, "url").map_err(invalid)?).map_err(invalid)?;
            let mut spec = CommandSpec::new("sqlmap", workspace, timeout).args(["-u", url.as_str()]);
            if let Some(p) = optional_str(params, "params") {
                check_operand(p).map_err(invalid)?;
                spec = spec.args(["-p", p]);
            }
            Ok(Invocation::Process(spec.arg("--batch")))
        }
        ToolKind::Metasploit => {
            let commands = params
                .get("commands")
                .and_then(Value::as_array)
                .ok_or_else(|| invalid("missing 'commands' array".to_string()))?;
            let mut contents = String::new();
            for cmd in commands {
                let line = cmd
                    .as_str()
                    .ok_or_else(|| invalid("commands must be strings".to_string()))?;
                if line.contains('\n') || line.contains('\r') {
                    return Err(invalid("a command may not span multiple lines".to_string()));
                }
                contents.push_str(line);
                contents.push('\n');
            }
            if contents.is_empty() {
                return Err(invalid("'commands' is empty".to_string()));
            }
            contents.push_str("exit\n");

            let script_path = workspace.join(format!("msf-{}.rc", Uuid::now_v7()));
            let spec = CommandSpec::new("msfconsole", workspace, timeout)
                .args(["-q", "-r"])
                .arg(script_path.display().to_string());
            Ok(Invocation::MetasploitScript { spec, script_path, contents })
        }
        ToolKind::Browser => {
            let url = web_url(required_str(params, "url").map_err(invalid)?).map_err(invalid)?;
            match optional_str(params, "action").unwrap_or("navigate") {
                "navigate" => Ok(Invocation::Navigate(url)),
                "screenshot" => {
                    let output = output_path(workspace, optional_str(params, "path"), || {
                        format!("screenshot-{}.png", Uuid::now_v7())
                    });
                    Ok(Invocation::Screenshot { url, output })
                }
                other => Err(invalid(format!("unknown browser action '{}'", other))),
            }
        }
        ToolKind::Files => {
            let op = match required_str(params, "action").map_err(invalid)? {
                "save" => {
                    let name = required_str(params, "filename").map_err(invalid)?;
                    let content = params
                        .get("content")
                        .and_then(Value::as_str)
                        .ok_or_else(|| invalid("missing 'content'".to_string()))?;
                    if content.len() as u64 > MAX_WORKSPACE_FILE {
                        return Err(invalid(format!("content exceeds {} bytes", MAX_WORKSPACE_FILE)));
                    }
                    FileOp::Save {
                        path: workspace_file(workspace, name).map_err(invalid)?,
                        content: content.to_string(),
                    }
                }
                "read" => FileOp::Read {
                    path: workspace_file(workspace, required_str(params, "filename").map_err(invalid)?)
                        .map_err(invalid)?,
                },
                "list" => FileOp::List,
                other => return Err(invalid(format!("unknown files action '{}'", other))),
            };
            Ok(Invocation::File(op))
        }
        ToolKind::Python => {
            let script = workspace_file(workspace, required_str(params, "script").map_err(invalid)?).map_err(invalid)?;
            let args: Vec<String> = match params.get("args") {
                None | Some(Value::Null) => Vec::new(),
                Some(Value::String(line)) => line.split_whitespace().map(str::to_string).collect(),
                Some(Value::Array(items)) => items
                    .iter()
                    .map(|v| v.as_str().map(str::to_string))
                    .collect::<Option<_>>()
                    .ok_or_else(|| invalid("args must be strings".to_string()))?,
                Some(_) => return Err(invalid("args must be a string or an array".to_string())),
            };
            if args.iter().any(|a| a.contains('\0')) {
                return Err(invalid("args may not contain NUL".to_string()));
            }
            // Arguments after the script path belong to the script, not python3
            let mut spec = CommandSpec::new("python3", workspace, timeout)
                .arg(script.display().to_string())
                .args(args);
            spec.stdin = params.get("input").and_then(Value::as_str).map(str::to_string);
            Ok(Invocation::Process(spec))
        }
        ToolKind::Command => {
            let cmd = required_str(params, "cmd").map_err(invalid)?;
            Ok(Invocation::Process(
                CommandSpec::new("sh", workspace, timeout).args(["-c", cmd]),
            ))
        }
    }
}

fn required_str<'a>(params: &'a Value, key: &str) -> Result<&'a str, String> {
    optional_str(params, key).ok_or_else(|| format!("missing '{}'", key))
}

fn optional_str<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Positional operands must not be read as options by the tool
fn check_operand(value: &str) -> Result<(), String> {
    if value.starts_with('-') {
        return Err(format!("'{}' looks like an option, not an operand", value));
    }
    if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(format!("'{}' contains whitespace or control characters", value));
    }
    Ok(())
}

fn web_url(raw: &str) -> Result<Url, String> {
    check_operand(raw)?;
    let url = Url::parse(raw).map_err(|e| format!("invalid URL '{}': {}", raw, e))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(format!("unsupported URL scheme '{}'", other)),
    }
}

/// Output files written by a tool: any directories in the request are
/// dropped, leaving a plain name inside the workspace
fn output_path(workspace: &Path, requested: Option<&str>, fallback: impl FnOnce() -> String) -> PathBuf {
    let name = requested
        .and_then(|p| Path::new(p).file_name())
        .and_then(|n| n.to_str())
        .filter(|n| !n.starts_with('.') && !n.starts_with('-'))
        .map(str::to_string)
        .unwrap_or_else(fallback);
    workspace.join(name)
}

/// Files the model names for reading or running must already be plain names
fn workspace_file(workspace: &Path, name: &str) -> Result<PathBuf, String> {
    let plain = name.len() <= 255
        && !name.starts_with('.')
        && !name.starts_with('-')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
    if !plain {
        return Err(format!("'{}' is not a plain file name in the workspace", name));
    }
    Ok(workspace.join(name))
}

/// Allowlisted nmap flags. Anything that reads or writes files, loads
/// scripts or changes the data directory is refused.
fn nmap_flags(flags: &str) -> Result<Vec<String>, String> {
    let mut out = Vec::new();
    let mut tokens = flags.split_whitespace();

    while let Some(token) = tokens.next() {
        if NMAP_SWITCHES.contains(&token) || is_timing_template(token) {
            out.push(token.to_string());
            continue;
        }
        if token == "-p" {
            let ports = tokens.next().ok_or_else(|| "-p needs a port list".to_string())?;
            check_ports(ports)?;
            out.push("-p".to_string());
            out.push(ports.to_string());
            continue;
        }
        if let Some(ports) = token.strip_prefix("-p") {
            check_ports(ports)?;
            out.push(token.to_string());
            continue;
        }

        let (name, inline) = match token.split_once('=') {
            Some((name, value)) => (name, Some(value)),
            None => (token, None),
        };
        if NMAP_NUMERIC_OPTIONS.contains(&name) {
            let value = match inline {
                Some(value) => value,
                None => tokens.next().ok_or_else(|| format!("{} needs a value", name))?,
            };
            if value.is_empty() || !value.chars().all(|c| c.is_ascii_digit()) {
                return Err(format!("{} expects a number, got '{}'", name, value));
            }
            out.push(name.to_string());
            out.push(value.to_string());
            continue;
        }

        return Err(format!("nmap option '{}' is not allowed", token));
    }
    Ok(out)
}

fn is_timing_template(token: &str) -> bool {
    matches!(token, "-T0" | "-T1" | "-T2" | "-T3" | "-T4" | "-T5")
}

fn check_ports(ports: &str) -> Result<(), String> {
    let valid = !ports.is_empty()
        && ports.len() <= 256
        && ports.chars().all(|c| c.is_ascii_digit() || matches!(c, ',' | '-' | ':' | 'T' | 'U' | 'S'));
    if valid {
        Ok(())
    } else {
        Err(format!("invalid port list '{}'", ports))
    }
}
