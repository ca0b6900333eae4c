//! Configuration for the playground
//!
//! Everything is defaulted, so an empty file (or no file at all) gives a
//! working setup with the built-in model catalog and roles.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::ModelDescriptor;
use crate::resources::ResourceTotals;
use crate::tools::{ToolKind, ToolPolicy, ToolSet};

/// Agent roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    Recon,
    Exploit,
    Analysis,
    Custom,
}

impl AgentRole {
    pub const ALL: [AgentRole; 4] = [
        AgentRole::Recon,
        AgentRole::Exploit,
        AgentRole::Analysis,
        AgentRole::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Recon => "recon",
            AgentRole::Exploit => "exploit",
            AgentRole::Analysis => "analysis",
            AgentRole::Custom => "custom",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AgentRole::ALL
            .iter()
            .copied()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

/// Static role configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleDefinition {
    /// Display name
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub system_prompt: String,
    #[serde(default)]
    pub allowed_tools: Vec<ToolKind>,
    #[serde(default)]
    pub recommended_models: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    #[serde(default = "default_ollama_url")]
    pub base_url: String,
    /// Upper bound on one chat completion
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_url(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

/// Capacity overrides; a configured total replaces the detected one
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    #[serde(default)]
    pub ram_total_gb: Option<f64>,
    #[serde(default = "default_vram_total")]
    pub vram_total_gb: Option<f64>,
    #[serde(default)]
    pub disk_total_gb: Option<f64>,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            ram_total_gb: None,
            vram_total_gb: default_vram_total(),
            disk_total_gb: None,
            probe_timeout_ms: default_probe_timeout(),
        }
    }
}

/// Complete playground configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaygroundConfig {
    #[serde(default = "default_workspace")]
    pub workspace_dir: PathBuf,
    #[serde(default = "default_command_timeout")]
    pub command_timeout_seconds: u64,
    /// Per-tool timeout overrides, keyed by tool name
    #[serde(default)]
    pub tool_timeouts: BTreeMap<String, u64>,
    #[serde(default = "default_whitelist")]
    pub tool_whitelist: Vec<ToolKind>,
    #[serde(default)]
    pub allow_raw_command: bool,
    #[serde(default = "default_true")]
    pub auto_download: bool,
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
    /// Persisted turns sent back to the model with each request
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    #[serde(default = "default_download_timeout")]
    pub download_timeout_seconds: u64,
    #[serde(default)]
    pub catalog_state_file: Option<PathBuf>,
    #[serde(default = "default_chromium")]
    pub chromium_bin: String,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub resources: ResourceConfig,
    #[serde(default = "default_models")]
    pub models: Vec<ModelDescriptor>,
    #[serde(default = "default_roles")]
    pub roles: BTreeMap<String, RoleDefinition>,
}

impl Default for PlaygroundConfig {
    fn default() -> Self {
        Self {
            workspace_dir: default_workspace(),
            command_timeout_seconds: default_command_timeout(),
            tool_timeouts: BTreeMap::new(),
            tool_whitelist: default_whitelist(),
            allow_raw_command: false,
            auto_download: true,
            max_tool_rounds: default_max_tool_rounds(),
            history_window: default_history_window(),
            download_timeout_seconds: default_download_timeout(),
            catalog_state_file: None,
            chromium_bin: default_chromium(),
            server: ServerConfig::default(),
            ollama: OllamaConfig::default(),
            resources: ResourceConfig::default(),
            models: default_models(),
            roles: default_roles(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl PlaygroundConfig {
    /// Load and validate a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parse and validate a TOML string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let whitelist = self.whitelist();

        for key in self.tool_timeouts.keys() {
            key.parse::<ToolKind>()
                .map_err(|e| ConfigError::Invalid(format!("tool_timeouts: {}", e)))?;
        }

        for (key, role) in &self.roles {
            key.parse::<AgentRole>()
                .map_err(|name| ConfigError::Invalid(format!("unknown role '{}'", name)))?;
            if let Some(tool) = role.allowed_tools.iter().find(|t| !whitelist.contains(t)) {
                return Err(ConfigError::Invalid(format!(
                    "role '{}' grants '{}', which is not in tool_whitelist",
                    key, tool
                )));
            }
        }

        if self.max_tool_rounds == 0 {
            return Err(ConfigError::Invalid("max_tool_rounds must be at least 1".to_string()));
        }
        if self.models.iter().any(|m| m.ram_gb < 0.0 || m.vram_gb < 0.0) {
            return Err(ConfigError::Invalid("model resource sizes must be non-negative".to_string()));
        }
        Ok(())
    }

    pub fn whitelist(&self) -> ToolSet {
        self.tool_whitelist.iter().copied().collect()
    }

    pub fn role(&self, role: AgentRole) -> Option<&RoleDefinition> {
        self.roles.get(role.as_str())
    }

    pub fn tool_policy(&self) -> ToolPolicy {
        let timeouts = self
            .tool_timeouts
            .iter()
            .filter_map(|(name, secs)| Some((name.parse::<ToolKind>().ok()?, Duration::from_secs(*secs))))
            .collect();

        ToolPolicy {
            whitelist: self.whitelist(),
            workspace_dir: self.workspace_dir.clone(),
            default_timeout: Duration::from_secs(self.command_timeout_seconds),
            timeouts,
            allow_raw_command: self.allow_raw_command,
            ..ToolPolicy::default()
        }
    }

    pub fn resource_totals(&self) -> ResourceTotals {
        ResourceTotals {
            ram_gb: self.resources.ram_total_gb,
            vram_gb: self.resources.vram_total_gb,
            disk_gb: self.resources.disk_total_gb,
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_request_timeout() -> u64 {
    300
}

fn default_vram_total() -> Option<f64> {
    Some(16.0)
}

fn default_probe_timeout() -> u64 {
    2000
}

fn default_workspace() -> PathBuf {
    PathBuf::from("/tmp/pentest-playground")
}

fn default_command_timeout() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

fn default_max_tool_rounds() -> usize {
    5
}

fn default_history_window() -> usize {
    5
}

fn default_download_timeout() -> u64 {
    3600
}

fn default_chromium() -> String {
    "chromium".to_string()
}

fn default_whitelist() -> Vec<ToolKind> {
    vec![
        ToolKind::Nmap,
        ToolKind::Gobuster,
        ToolKind::Sqlmap,
        ToolKind::Metasploit,
        ToolKind::Browser,
        ToolKind::Files,
    ]
}

fn model(id: &str, parameters: &str, ram_gb: f64, vram_gb: f64, disk_gb: f64, description: &str) -> ModelDescriptor {
    ModelDescriptor {
        id: id.to_string(),
        parameters: parameters.to_string(),
        ram_gb,
        vram_gb,
        disk_gb,
        description: description.to_string(),
        downloaded: false,
    }
}

fn default_models() -> Vec<ModelDescriptor> {
    vec![
        model("llama3.1", "8B", 8.0, 6.0, 4.7, "General purpose model with native tool calling"),
        model("mistral", "7B", 8.0, 5.0, 4.1, "Fast general model"),
        model("qwen2.5-coder", "7B", 8.0, 5.5, 4.7, "Code-focused model, good at payloads and scripts"),
        model("deepseek-r1", "8B", 8.0, 6.0, 4.9, "Reasoning model for analysis"),
        model("phi3", "3.8B", 4.0, 3.0, 2.3, "Small model for constrained hosts"),
    ]
}

fn role(name: &str, description: &str, prompt: &str, tools: &[ToolKind], models: &[&str]) -> RoleDefinition {
    RoleDefinition {
        name: name.to_string(),
        description: description.to_string(),
        system_prompt: prompt.to_string(),
        allowed_tools: tools.to_vec(),
        recommended_models: models.iter().map(|m| m.to_string()).collect(),
    }
}

fn default_roles() -> BTreeMap<String, RoleDefinition> {
    use ToolKind::*;

    let mut roles = BTreeMap::new();
    roles.insert(
        "recon".to_string(),
        role(
            "Reconnaissance",
            "Maps hosts, services and web content",
            "You are a reconnaissance specialist in an authorised lab. Enumerate hosts, open ports, \
             services and web content. Call one tool at a time and summarise what you found.",
            &[Nmap, Gobuster, Browser],
            &["llama3.1", "mistral"],
        ),
    );
    roles.insert(
        "exploit".to_string(),
        role(
            "Exploitation",
            "Validates vulnerabilities found during recon",
            "You are an exploitation specialist in an authorised lab. Validate vulnerabilities with \
             the tools you are given and report evidence for each finding.",
            &[Nmap, Sqlmap, Metasploit, Browser],
            &["qwen2.5-coder", "llama3.1"],
        ),
    );
    roles.insert(
        "analysis".to_string(),
        role(
            "Analysis",
            "Interprets tool output and writes findings",
            "You are a security analyst. Interpret scan output, rank findings by severity and \
             recommend next steps.",
            &[Browser, Files],
            &["deepseek-r1", "llama3.1"],
        ),
    );
    roles.insert(
        "custom".to_string(),
        role(
            "Custom",
            "User-defined prompt and tools",
            "You are a helpful security assistant in an authorised lab.",
            &[Nmap, Gobuster, Sqlmap, Metasploit, Browser],
            &["llama3.1"],
        ),
    );
    roles
}
