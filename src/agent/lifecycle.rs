//! Agent Lifecycle Manager - admission control and agent creation/removal
//!
//! Admission is advisory: it compares declared model footprints against a
//! fresh resource snapshot and never reserves anything.
//!
//! ```text
//!   create_agent(role, model)
//!        │
//!        ├─ role configured? ───────────── no ──► InvalidRole
//!        ├─ model in catalog? ──────────── no ──► ModelUnavailable
//!        ├─ used + declared < total? ───── no ──► InsufficientResources
//!        ├─ downloaded? ────────────────── yes ─► record (ready)
//!        └─ auto_download? ─────────────── yes ─► record (initializing) + claim download
//!                                          no ──► ModelUnavailable
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn, Instrument};

use super::record::{AgentInfo, AgentRecord, AgentStatus};
use super::registry::AgentRegistry;
use crate::config::{AgentRole, RoleDefinition};
use crate::error::{CoreError, Result};
use crate::metrics::{ADMISSION_DECISIONS, MODEL_DOWNLOADS};
use crate::models::{DownloadClaim, ModelCatalog, ModelDescriptor, ModelDownloader};
use crate::ollama::ModelBackend;
use crate::resources::{ResourceMonitor, ResourceSnapshot, ResourceUsage};
use crate::tools::{parse_tool_set, ToolSet};

/// Resources checked by admission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Ram,
    Vram,
    Disk,
}

impl ResourceKind {
    pub fn label(self) -> &'static str {
        match self {
            ResourceKind::Ram => "RAM",
            ResourceKind::Vram => "VRAM",
            ResourceKind::Disk => "disk",
        }
    }
}

/// Admission decision for one (role, model) pair
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Admission {
    Admit,
    AdmitWithDownload,
    Deny {
        reason: String,
        exceeded: Vec<ResourceKind>,
    },
}

impl Admission {
    fn label(&self) -> &'static str {
        match self {
            Admission::Admit => "admit",
            Admission::AdmitWithDownload => "admit_with_download",
            Admission::Deny { .. } => "deny",
        }
    }
}

/// Result of an explicit model download request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    AlreadyAvailable,
    Downloaded,
    /// Another request owns the download
    InProgress,
}

/// Where the reported VRAM figure came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VramSource {
    Detected,
    Estimated,
    Unknown,
}

/// Snapshot as shown to operators, with VRAM estimated when undetectable
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemResources {
    #[serde(flatten)]
    pub snapshot: ResourceSnapshot,
    pub vram_source: VramSource,
    pub models_in_use: Vec<String>,
}

/// Aggregate footprint of a set of models against current capacity
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Requirements {
    pub total_ram_gb: f64,
    pub total_vram_gb: f64,
    pub total_disk_gb: f64,
    pub available_ram_gb: Option<f64>,
    pub available_vram_gb: Option<f64>,
    pub available_disk_gb: Option<f64>,
    pub can_allocate: bool,
    pub warnings: Vec<String>,
}

/// Parameters of `create_agent`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CreateAgentRequest {
    pub role: String,
    pub model: String,
    #[serde(default)]
    pub custom_prompt: Option<String>,
    #[serde(default)]
    pub custom_tools: Option<Vec<String>>,
}

/// Static settings for the manager
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub roles: BTreeMap<String, RoleDefinition>,
    pub whitelist: ToolSet,
    pub auto_download: bool,
    /// VRAM capacity assumed when the GPU cannot be queried
    pub vram_total_gb: Option<f64>,
    /// Download state is written here after every successful pull
    pub catalog_state_file: Option<PathBuf>,
}

pub struct LifecycleManager {
    settings: LifecycleSettings,
    catalog: Arc<ModelCatalog>,
    monitor: Arc<dyn ResourceMonitor>,
    registry: Arc<AgentRegistry>,
    downloader: Arc<dyn ModelDownloader>,
    backend: Arc<dyn ModelBackend>,
}

impl LifecycleManager {
    pub fn new(
        settings: LifecycleSettings,
        catalog: Arc<ModelCatalog>,
        monitor: Arc<dyn ResourceMonitor>,
        registry: Arc<AgentRegistry>,
        downloader: Arc<dyn ModelDownloader>,
        backend: Arc<dyn ModelBackend>,
    ) -> Self {
        Self {
            settings,
            catalog,
            monitor,
            registry,
            downloader,
            backend,
        }
    }

    pub fn roles(&self) -> &BTreeMap<String, RoleDefinition> {
        &self.settings.roles
    }

    pub fn role(&self, name: &str) -> Result<(AgentRole, &RoleDefinition)> {
        let role: AgentRole = name
            .parse()
            .map_err(|_| CoreError::InvalidRole(name.to_string()))?;
        let definition = self
            .settings
            .roles
            .get(role.as_str())
            .ok_or_else(|| CoreError::InvalidRole(name.to_string()))?;
        Ok((role, definition))
    }

    /// Decide whether an agent of `role` on `model` may be created now
    pub async fn request_admission(&self, role: &str, model: &str) -> Result<Admission> {
        self.role(role)?;
        let descriptor = self.catalog.get(model)?;
        let snapshot = self.monitor.snapshot().await;

        let admission = self.evaluate(&descriptor, &snapshot);
        let admission = match admission {
            Admission::AdmitWithDownload if !self.settings.auto_download => {
                return Err(CoreError::ModelUnavailable {
                    model: model.to_string(),
                    reason: "not downloaded and auto_download is disabled".to_string(),
                })
            }
            other => other,
        };

        ADMISSION_DECISIONS.with_label_values(&[admission.label()]).inc();
        info!(role = %role, model = %model, decision = admission.label(), "admission decided");
        Ok(admission)
    }

    /// Admission rule over a snapshot. Unknown VRAM is estimated from live
    /// agents; unknown RAM or disk skips that check.
    pub fn evaluate(&self, model: &ModelDescriptor, snapshot: &ResourceSnapshot) -> Admission {
        let mut exceeded = Vec::new();
        let mut reasons = Vec::new();

        let mut check = |kind: ResourceKind, usage: Option<ResourceUsage>, declared: f64| match usage {
            Some(u) if u.used_gb + declared >= u.total_gb => {
                exceeded.push(kind);
                reasons.push(format!(
                    "{}: {:.1} GB used + {:.1} GB required exceeds {:.1} GB",
                    kind.label(), u.used_gb, declared, u.total_gb
                ));
            }
            Some(_) => {}
            None => warn!(resource = kind.label(), model = %model.id, "resource usage unknown, skipping check"),
        };

        check(ResourceKind::Ram, snapshot.ram, model.ram_gb);
        check(ResourceKind::Vram, self.effective_vram(snapshot).0, model.vram_gb);

        let available = self.catalog.is_available(&model.id);
        if !available && model.disk_gb > 0.0 {
            check(ResourceKind::Disk, snapshot.disk, model.disk_gb);
        }

        if !exceeded.is_empty() {
            return Admission::Deny {
                reason: reasons.join("; "),
                exceeded,
            };
        }
        if available {
            Admission::Admit
        } else {
            Admission::AdmitWithDownload
        }
    }

    /// Detected VRAM, or an estimate from the models bound to live agents
    /// against the configured capacity
    fn effective_vram(&self, snapshot: &ResourceSnapshot) -> (Option<ResourceUsage>, VramSource) {
        if let Some(vram) = snapshot.vram {
            return (Some(vram), VramSource::Detected);
        }
        match self.settings.vram_total_gb {
            Some(total_gb) => {
                let used_gb = self
                    .registry
                    .models_in_use()
                    .iter()
                    .filter_map(|m| self.catalog.get(m).ok())
                    .map(|m| m.vram_gb)
                    .sum();
                (Some(ResourceUsage { used_gb, total_gb }), VramSource::Estimated)
            }
            None => (None, VramSource::Unknown),
        }
    }

    pub async fn resources(&self) -> SystemResources {
        let mut snapshot = self.monitor.snapshot().await;
        let (vram, vram_source) = self.effective_vram(&snapshot);
        snapshot.vram = vram;
        SystemResources {
            snapshot,
            vram_source,
            models_in_use: self.registry.models_in_use().into_iter().collect(),
        }
    }

    /// Total footprint of `models` and whether it fits in what is free now
    pub async fn calculate_requirements(&self, models: &[String]) -> Requirements {
        let mut warnings = Vec::new();
        let (mut ram, mut vram, mut disk) = (0.0, 0.0, 0.0);
        for name in models {
            match self.catalog.get(name) {
                Ok(m) => {
                    ram += m.ram_gb;
                    vram += m.vram_gb;
                    disk += m.disk_gb;
                }
                Err(_) => warnings.push(format!("Model '{}' not found in catalog", name)),
            }
        }

        let resources = self.resources().await;
        let available = |u: Option<ResourceUsage>| u.map(|u| u.available_gb());
        let available_ram = available(resources.snapshot.ram);
        let available_vram = available(resources.snapshot.vram);
        let available_disk = available(resources.snapshot.disk);

        let fits = |need: f64, have: Option<f64>| have.map_or(true, |h| need <= h);
        for (label, need, have) in [("RAM", ram, available_ram), ("VRAM", vram, available_vram)] {
            match have {
                Some(h) if need > h * 0.8 => warnings.push(format!(
                    "{} usage will be high ({:.1}GB / {:.1}GB available)",
                    label, need, h
                )),
                None => warnings.push(format!("{} availability unknown", label)),
                _ => {}
            }
        }

        Requirements {
            total_ram_gb: ram,
            total_vram_gb: vram,
            total_disk_gb: disk,
            available_ram_gb: available_ram,
            available_vram_gb: available_vram,
            available_disk_gb: available_disk,
            can_allocate: fits(ram, available_ram) && fits(vram, available_vram) && fits(disk, available_disk),
            warnings,
        }
    }

    /// Admit and register a new agent
    pub async fn create_agent(&self, request: CreateAgentRequest) -> Result<AgentInfo> {
        let span = info_span!("create_agent", role = %request.role, model = %request.model);
        async {
            let (role, definition) = self.role(&request.role)?;
            let tools = self.resolve_tools(definition, request.custom_tools.as_deref())?;
            let prompt = request
                .custom_prompt
                .clone()
                .filter(|p| !p.trim().is_empty())
                .unwrap_or_else(|| definition.system_prompt.clone());

            match self.request_admission(&request.role, &request.model).await? {
                Admission::Deny { reason, .. } => Err(CoreError::InsufficientResources(reason)),
                Admission::Admit => Ok(self.registry.insert(AgentRecord::new(
                    role,
                    &request.model,
                    prompt,
                    tools,
                    AgentStatus::Ready,
                ))),
                Admission::AdmitWithDownload => {
                    let info = self.registry.insert(AgentRecord::new(
                        role,
                        &request.model,
                        prompt,
                        tools,
                        AgentStatus::Initializing,
                    ));
                    self.ensure_download(&request.model, &info.id)?;
                    // Status may have moved on already
                    self.registry.info(&info.id)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Custom tools must be known names inside the whitelist; role defaults
    /// are clipped to it
    fn resolve_tools(&self, role: &RoleDefinition, custom: Option<&[String]>) -> Result<ToolSet> {
        match custom {
            Some(names) => {
                let tools = parse_tool_set(names).map_err(|e| CoreError::Forbidden(e.to_string()))?;
                if let Some(t) = tools.iter().find(|t| !self.settings.whitelist.contains(t)) {
                    return Err(CoreError::Forbidden(format!("tool '{}' is not in the whitelist", t)));
                }
                Ok(tools)
            }
            None => Ok(role
                .allowed_tools
                .iter()
                .copied()
                .filter(|t| self.settings.whitelist.contains(t))
                .collect()),
        }
    }

    /// Make sure a download for `model` is running or done after an agent
    /// was registered as initializing
    fn ensure_download(&self, model: &str, agent_id: &str) -> Result<()> {
        match self.catalog.begin_download(model)? {
            DownloadClaim::Claimed => {
                self.spawn_download(model.to_string());
            }
            DownloadClaim::InProgress => {
                debug!(agent_id = %agent_id, model = %model, "waiting on download already in progress");
            }
            DownloadClaim::AlreadyDownloaded => {
                // Finished between admission and registration
                self.registry.settle_pending(model, true);
            }
        }
        Ok(())
    }

    fn spawn_download(&self, model: String) {
        let catalog = Arc::clone(&self.catalog);
        let registry = Arc::clone(&self.registry);
        let downloader = Arc::clone(&self.downloader);
        let state_file = self.settings.catalog_state_file.clone();
        let span = info_span!("model_download", model = %model);

        tokio::spawn(
            async move {
                let ok = run_download(downloader.as_ref(), &catalog, &model, state_file).await;
                registry.settle_pending(&model, ok);
            }
            .instrument(span),
        );
    }

    /// Explicit download; concurrent requests for the same model share one pull
    pub async fn download_model(&self, model: &str) -> Result<DownloadStatus> {
        match self.catalog.begin_download(model)? {
            DownloadClaim::AlreadyDownloaded => Ok(DownloadStatus::AlreadyAvailable),
            DownloadClaim::InProgress => Ok(DownloadStatus::InProgress),
            DownloadClaim::Claimed => {
                let state_file = self.settings.catalog_state_file.clone();
                let ok = run_download(self.downloader.as_ref(), &self.catalog, model, state_file)
                    .instrument(info_span!("model_download", model = %model))
                    .await;
                self.registry.settle_pending(model, ok);
                if ok {
                    Ok(DownloadStatus::Downloaded)
                } else {
                    Err(CoreError::ModelUnavailable {
                        model: model.to_string(),
                        reason: "download failed".to_string(),
                    })
                }
            }
        }
    }

    /// Remove an agent and unload its model when nothing else uses it
    pub async fn delete_agent(&self, id: &str) -> Result<()> {
        let record = self.registry.delete(id)?;
        if !self.registry.models_in_use().contains(&record.model) {
            match self.backend.unload(&record.model).await {
                Ok(()) => info!(model = %record.model, "model unloaded"),
                Err(e) => warn!(model = %record.model, error = %e, "could not unload model"),
            }
        }
        Ok(())
    }

    /// Delete every agent
    pub async fn shutdown(&self) {
        let ids = self.registry.ids();
        info!(agents = ids.len(), "shutting down all agents");
        for id in ids {
            if let Err(e) = self.delete_agent(&id).await {
                debug!(agent_id = %id, error = %e, "agent already gone during shutdown");
            }
        }
    }
}

async fn run_download(
    downloader: &dyn ModelDownloader,
    catalog: &Arc<ModelCatalog>,
    model: &str,
    state_file: Option<PathBuf>,
) -> bool {
    let ok = match downloader.download(model).await {
        Ok(()) => true,
        Err(e) => {
            warn!(model = %model, error = %e, "model download failed");
            false
        }
    };
    catalog.finish_download(model, ok);
    MODEL_DOWNLOADS
        .with_label_values(&[if ok { "success" } else { "failure" }])
        .inc();

    if let (true, Some(path)) = (ok, state_file) {
        persist_catalog(Arc::clone(catalog), path).await;
    }
    ok
}

/// Write download state; failures are logged, the download still counts
pub(crate) async fn persist_catalog(catalog: Arc<ModelCatalog>, path: PathBuf) {
    let saved = tokio::task::spawn_blocking(move || catalog.save(&path).map_err(|e| (path, e.to_string()))).await;
    match saved {
        Ok(Ok(())) => debug!("catalog state persisted"),
        Ok(Err((path, e))) => warn!(path = %path.display(), error = %e, "could not persist catalog state"),
        Err(e) => warn!(error = %e, "catalog persist task failed"),
    }
}
