//! Playground service - the boundary every inbound surface goes through
//!
//! Wires the catalog, monitor, registry, gateway, lifecycle manager and
//! dispatcher together. The HTTP dashboard and the binary only ever talk to
//! a [`Playground`].

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::agent::lifecycle::persist_catalog;
use crate::agent::{
    Admission, AgentInfo, AgentRegistry, AgentStats, BroadcastOutcome, CreateAgentRequest,
    DispatchSettings, Dispatcher, DownloadStatus, LifecycleManager, LifecycleSettings, Requirements,
    SystemResources, TaskResult,
};
use crate::config::{AgentRole, PlaygroundConfig, RoleDefinition};
use crate::error::{CoreError, Result};
use crate::models::{ModelCatalog, ModelDescriptor, ModelDownloader, OllamaPuller};
use crate::ollama::{ChatClient, ModelBackend, OllamaClient};
use crate::resources::{HostMonitor, ResourceMonitor};
use crate::tools::{BrowserDriver, HttpBrowserDriver, ProcessLauncher, TokioProcessLauncher, ToolGateway};

/// Outbound implementations the playground runs against
#[derive(Clone)]
pub struct Backends {
    pub launcher: Arc<dyn ProcessLauncher>,
    pub browser: Arc<dyn BrowserDriver>,
    pub model: Arc<dyn ModelBackend>,
    pub downloader: Arc<dyn ModelDownloader>,
    pub monitor: Arc<dyn ResourceMonitor>,
}

/// A task posted to an agent
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskRequest {
    /// Free-form message; the model may call tools
    Chat {
        content: String,
        #[serde(default)]
        context: BTreeMap<String, Value>,
    },
    /// Run one tool directly, without asking the model
    ToolUse {
        tool: String,
        #[serde(default = "empty_object")]
        params: Value,
    },
    /// Ask the model to analyse a blob of tool output
    Analysis {
        data: String,
        #[serde(default = "default_format")]
        format: String,
    },
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

fn default_format() -> String {
    "text".to_string()
}

impl TaskRequest {
    fn label(&self) -> &'static str {
        match self {
            TaskRequest::Chat { .. } => "chat",
            TaskRequest::ToolUse { .. } => "tool_use",
            TaskRequest::Analysis { .. } => "analysis",
        }
    }
}

/// Catalog entry plus live state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelStatus {
    #[serde(flatten)]
    pub descriptor: ModelDescriptor,
    pub downloading: bool,
    /// Bound to at least one live agent
    pub in_use: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub ollama: &'static str,
    pub active_agents: usize,
    pub models_in_use: usize,
    pub version: &'static str,
}

pub struct Playground {
    catalog: Arc<ModelCatalog>,
    registry: Arc<AgentRegistry>,
    lifecycle: LifecycleManager,
    dispatcher: Dispatcher,
    /// Management API; absent when running against injected backends
    ollama: Option<OllamaClient>,
    catalog_state_file: Option<PathBuf>,
}

impl Playground {
    /// Build against the real host: tokio processes, Ollama, sysinfo
    pub fn from_config(config: &PlaygroundConfig) -> Result<Self> {
        let launcher: Arc<dyn ProcessLauncher> = Arc::new(TokioProcessLauncher::new());
        let backends = Backends {
            browser: Arc::new(HttpBrowserDriver::new(Arc::clone(&launcher), config.chromium_bin.clone())),
            model: Arc::new(ChatClient::new(
                config.ollama.base_url.clone(),
                Duration::from_secs(config.ollama.request_timeout_seconds),
            )),
            downloader: Arc::new(OllamaPuller::new(
                Arc::clone(&launcher),
                config.workspace_dir.clone(),
                Duration::from_secs(config.download_timeout_seconds),
            )),
            monitor: Arc::new(HostMonitor::new(
                config.workspace_dir.clone(),
                config.resource_totals(),
                Duration::from_millis(config.resources.probe_timeout_ms),
            )),
            launcher,
        };

        let mut playground = Self::with_backends(config, backends)?;
        playground.ollama = Some(OllamaClient::new(config.ollama.base_url.clone()));

        if let Some(path) = playground.catalog_state_file.as_deref().filter(|p| p.exists()) {
            match playground.catalog.load(path) {
                Ok(()) => info!(path = %path.display(), "catalog state restored"),
                Err(e) => warn!(path = %path.display(), error = %e, "ignoring unreadable catalog state"),
            }
        }
        Ok(playground)
    }

    /// Build against injected outbound implementations
    pub fn with_backends(config: &PlaygroundConfig, backends: Backends) -> Result<Self> {
        config.validate().map_err(|e| CoreError::InvalidRequest(e.to_string()))?;

        let catalog = Arc::new(ModelCatalog::new(config.models.clone())?);
        let registry = Arc::new(AgentRegistry::new());
        let gateway = Arc::new(ToolGateway::new(
            Arc::clone(&registry),
            backends.launcher,
            backends.browser,
            config.tool_policy(),
        ));

        let lifecycle = LifecycleManager::new(
            LifecycleSettings {
                roles: config.roles.clone(),
                whitelist: config.whitelist(),
                auto_download: config.auto_download,
                vram_total_gb: config.resources.vram_total_gb,
                catalog_state_file: config.catalog_state_file.clone(),
            },
            Arc::clone(&catalog),
            backends.monitor,
            Arc::clone(&registry),
            backends.downloader,
            Arc::clone(&backends.model),
        );

        let dispatcher = Dispatcher::new(
            Arc::clone(&registry),
            gateway,
            backends.model,
            DispatchSettings {
                max_tool_rounds: config.max_tool_rounds,
                history_window: config.history_window,
            },
        );

        Ok(Self {
            catalog,
            registry,
            lifecycle,
            dispatcher,
            ollama: None,
            catalog_state_file: config.catalog_state_file.clone(),
        })
    }

    // ---- agents ----

    pub async fn create_agent(&self, request: CreateAgentRequest) -> Result<AgentInfo> {
        self.lifecycle.create_agent(request).await
    }

    pub async fn delete_agent(&self, id: &str) -> Result<()> {
        self.lifecycle.delete_agent(id).await
    }

    pub fn list_agents(&self) -> Vec<AgentInfo> {
        self.registry.list()
    }

    pub fn get_agent(&self, id: &str) -> Result<AgentInfo> {
        self.registry.info(id)
    }

    pub fn clear_history(&self, id: &str) -> Result<()> {
        self.registry.clear_transcript(id)
    }

    pub fn agent_stats(&self) -> AgentStats {
        self.registry.stats()
    }

    /// Plain chat task
    pub async fn run_task(&self, id: &str, message: &str) -> Result<TaskResult> {
        self.dispatcher.run_task(id, message).await
    }

    pub async fn execute_task(&self, id: &str, task: TaskRequest) -> Result<TaskResult> {
        info!(agent_id = %id, task_type = task.label(), "executing task");
        match task {
            TaskRequest::Chat { content, context } => {
                self.dispatcher.run_task_with_context(id, &content, &context).await
            }
            TaskRequest::ToolUse { tool, params } => self.dispatcher.run_tool(id, &tool, &params).await,
            TaskRequest::Analysis { data, format } => {
                self.dispatcher.run_task(id, &analysis_prompt(&data, &format)).await
            }
        }
    }

    /// Same message to every agent, or only to agents in `roles`
    pub async fn broadcast(&self, message: &str, roles: Option<&[String]>) -> Result<Vec<BroadcastOutcome>> {
        let roles = roles
            .map(|names| {
                names
                    .iter()
                    .map(|n| n.parse::<AgentRole>().map_err(CoreError::InvalidRole))
                    .collect::<Result<Vec<_>>>()
            })
            .transpose()?;
        Ok(self.dispatcher.broadcast(message, roles.as_deref()).await)
    }

    // ---- models ----

    pub fn list_models(&self) -> Vec<ModelStatus> {
        let in_use = self.registry.models_in_use();
        self.catalog
            .list()
            .into_iter()
            .map(|descriptor| ModelStatus {
                downloading: self.catalog.is_downloading(&descriptor.id),
                in_use: in_use.contains(&descriptor.id),
                descriptor,
            })
            .collect()
    }

    pub fn model_status(&self, name: &str) -> Result<ModelStatus> {
        let descriptor = self.catalog.get(name)?;
        Ok(ModelStatus {
            downloading: self.catalog.is_downloading(name),
            in_use: self.registry.models_in_use().contains(name),
            descriptor,
        })
    }

    pub async fn download_model(&self, name: &str) -> Result<DownloadStatus> {
        self.lifecycle.download_model(name).await
    }

    pub async fn request_admission(&self, role: &str, model: &str) -> Result<Admission> {
        self.lifecycle.request_admission(role, model).await
    }

    pub async fn calculate_requirements(&self, models: &[String]) -> Requirements {
        self.lifecycle.calculate_requirements(models).await
    }

    /// Mark models the backend already has as downloaded
    pub async fn sync_catalog(&self) -> usize {
        let Some(client) = &self.ollama else {
            return 0;
        };
        match client.list_local_models().await {
            Ok(names) => {
                let marked = self.catalog.sync_downloaded(names.as_slice());
                info!(local = names.len(), marked, "catalog synced with backend");
                marked
            }
            Err(e) => {
                warn!(error = %e, "could not list local models");
                0
            }
        }
    }

    // ---- system ----

    pub async fn get_resources(&self) -> SystemResources {
        self.lifecycle.resources().await
    }

    pub fn list_roles(&self) -> &BTreeMap<String, RoleDefinition> {
        self.lifecycle.roles()
    }

    pub fn get_role(&self, name: &str) -> Result<&RoleDefinition> {
        self.lifecycle.role(name).map(|(_, definition)| definition)
    }

    pub async fn health(&self) -> HealthReport {
        let ollama = match &self.ollama {
            Some(client) if client.health_check().await => "healthy",
            Some(_) => "unhealthy",
            None => "unknown",
        };
        HealthReport {
            status: "ok",
            ollama,
            active_agents: self.registry.len(),
            models_in_use: self.registry.models_in_use().len(),
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    /// Delete every agent and persist catalog state
    pub async fn shutdown(&self) {
        self.lifecycle.shutdown().await;
        if let Some(path) = self.catalog_state_file.clone() {
            persist_catalog(Arc::clone(&self.catalog), path).await;
        }
    }
}

fn analysis_prompt(data: &str, format: &str) -> String {
    format!(
        "Analyze the following {format} data and provide insights:\n\n{data}\n\n\
         Provide:\n\
         1. Summary of findings\n\
         2. Key points of interest\n\
         3. Potential security implications\n\
         4. Recommended next steps\n"
    )
}
