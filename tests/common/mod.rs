//! Fakes for the outbound traits, shared by the integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agentvisor::models::{DownloadError, ModelDescriptor, ModelDownloader};
use agentvisor::ollama::{BackendError, ChatMessage, FunctionCall, ModelBackend, ModelReply, Tool, ToolCall};
use agentvisor::resources::{ResourceMonitor, ResourceSnapshot, ResourceUsage};
use agentvisor::tools::{
    BrowserDriver, BrowserError, CommandSpec, LaunchError, PageSummary, ProcessLauncher, ProcessOutput,
};
use agentvisor::{Backends, Playground, PlaygroundConfig};
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Url;
use serde_json::Value;
use tempfile::TempDir;

/// Records every spec and answers with a canned output
#[derive(Default)]
pub struct SpyLauncher {
    pub calls: Mutex<Vec<CommandSpec>>,
    pub exit_code: Mutex<i32>,
    pub timeout: Mutex<bool>,
}

impl SpyLauncher {
    pub fn spawned(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn last(&self) -> Option<CommandSpec> {
        self.calls.lock().last().cloned()
    }
}

#[async_trait]
impl ProcessLauncher for SpyLauncher {
    async fn run(&self, spec: CommandSpec) -> Result<ProcessOutput, LaunchError> {
        self.calls.lock().push(spec.clone());
        if *self.timeout.lock() {
            return Err(LaunchError::TimedOut {
                program: spec.program,
                after: spec.timeout,
            });
        }
        Ok(ProcessOutput {
            stdout: format!("ran {}", spec.display()),
            stderr: String::new(),
            exit_code: *self.exit_code.lock(),
            duration_ms: 1.0,
        })
    }
}

pub struct StubBrowser;

#[async_trait]
impl BrowserDriver for StubBrowser {
    async fn navigate(&self, url: &Url, _timeout: Duration) -> Result<PageSummary, BrowserError> {
        Ok(PageSummary {
            url: url.to_string(),
            status: 200,
            title: "Test page".to_string(),
            links_count: 0,
            forms_count: 0,
            links: Vec::new(),
            forms: Vec::new(),
        })
    }

    async fn screenshot(&self, _url: &Url, _output: &Path, _timeout: Duration) -> Result<ProcessOutput, BrowserError> {
        Ok(ProcessOutput {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: 0,
            duration_ms: 1.0,
        })
    }
}

/// Plays back queued replies; answers "done" once the queue is empty
#[derive(Default)]
pub struct ScriptedBackend {
    pub replies: Mutex<VecDeque<Result<ModelReply, BackendError>>>,
    pub requests: Mutex<Vec<Vec<ChatMessage>>>,
    pub unloaded: Mutex<Vec<String>>,
    pub delay: Mutex<Option<Duration>>,
}

impl ScriptedBackend {
    pub fn push(&self, reply: ModelReply) {
        self.replies.lock().push_back(Ok(reply));
    }

    pub fn push_err(&self, err: BackendError) {
        self.replies.lock().push_back(Err(err));
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    async fn chat(&self, _model: &str, messages: &[ChatMessage], _tools: &[Tool]) -> Result<ModelReply, BackendError> {
        self.requests.lock().push(messages.to_vec());
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.replies.lock().pop_front();
        next.unwrap_or_else(|| Ok(ModelReply::text("done")))
    }

    async fn unload(&self, model: &str) -> Result<(), BackendError> {
        self.unloaded.lock().push(model.to_string());
        Ok(())
    }
}

pub struct FixedMonitor {
    pub snapshot: Mutex<ResourceSnapshot>,
}

impl FixedMonitor {
    pub fn new(ram: Option<(f64, f64)>, vram: Option<(f64, f64)>, disk: Option<(f64, f64)>) -> Self {
        let usage = |u: Option<(f64, f64)>| u.map(|(used_gb, total_gb)| ResourceUsage { used_gb, total_gb });
        Self {
            snapshot: Mutex::new(ResourceSnapshot {
                ram: usage(ram),
                vram: usage(vram),
                disk: usage(disk),
                ..ResourceSnapshot::unknown()
            }),
        }
    }

    /// 32 GB RAM, 16 GB VRAM and 500 GB disk, all nearly free
    pub fn roomy() -> Self {
        Self::new(Some((4.0, 32.0)), Some((1.0, 16.0)), Some((50.0, 500.0)))
    }
}

#[async_trait]
impl ResourceMonitor for FixedMonitor {
    async fn snapshot(&self) -> ResourceSnapshot {
        self.snapshot.lock().clone()
    }
}

/// Counts pulls; each one takes `delay` and succeeds unless `fail` is set
#[derive(Default)]
pub struct StubDownloader {
    pub pulls: AtomicUsize,
    pub delay: Mutex<Duration>,
    pub fail: Mutex<bool>,
}

impl StubDownloader {
    pub fn pulls(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelDownloader for StubDownloader {
    async fn download(&self, model: &str) -> Result<(), DownloadError> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        tokio::time::sleep(delay).await;
        if *self.fail.lock() {
            return Err(DownloadError::Failed {
                model: model.to_string(),
                exit_code: 1,
                stderr: "pull failed".to_string(),
            });
        }
        Ok(())
    }
}

pub fn model(id: &str, ram_gb: f64, vram_gb: f64, downloaded: bool) -> ModelDescriptor {
    ModelDescriptor {
        id: id.to_string(),
        parameters: "7B".to_string(),
        ram_gb,
        vram_gb,
        disk_gb: 4.0,
        description: String::new(),
        downloaded,
    }
}

/// `small` is downloaded, `fresh` is not, `huge` never fits in 16 GB VRAM
pub fn test_config(workspace: &Path) -> PlaygroundConfig {
    PlaygroundConfig {
        workspace_dir: workspace.to_path_buf(),
        models: vec![
            model("small", 4.0, 3.0, true),
            model("fresh", 4.0, 3.0, false),
            model("huge", 8.0, 40.0, true),
        ],
        ..PlaygroundConfig::default()
    }
}

pub struct Harness {
    pub playground: Arc<Playground>,
    pub launcher: Arc<SpyLauncher>,
    pub backend: Arc<ScriptedBackend>,
    pub downloader: Arc<StubDownloader>,
    pub monitor: Arc<FixedMonitor>,
    pub workspace: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(tweak: impl FnOnce(&mut PlaygroundConfig)) -> Self {
        Self::build(FixedMonitor::roomy(), tweak)
    }

    pub fn build(monitor: FixedMonitor, tweak: impl FnOnce(&mut PlaygroundConfig)) -> Self {
        let workspace = tempfile::tempdir().unwrap();
        let mut config = test_config(workspace.path());
        tweak(&mut config);

        let launcher = Arc::new(SpyLauncher::default());
        let backend = Arc::new(ScriptedBackend::default());
        let downloader = Arc::new(StubDownloader::default());
        let monitor = Arc::new(monitor);

        let playground = Playground::with_backends(
            &config,
            Backends {
                launcher: launcher.clone(),
                browser: Arc::new(StubBrowser),
                model: backend.clone(),
                downloader: downloader.clone(),
                monitor: monitor.clone(),
            },
        )
        .unwrap();

        Self {
            playground: Arc::new(playground),
            launcher,
            backend,
            downloader,
            monitor,
            workspace,
        }
    }
}

/// Native tool call reply
pub fn tool_call(name: &str, arguments: Value) -> ModelReply {
    ModelReply {
        content: String::new(),
        tool_calls: vec![ToolCall {
            function: FunctionCall {
                name: name.to_string(),
                arguments,
            },
        }],
        tokens_used: 10,
    }
}
