//! agentvisor - resource-budgeted LLM agents with mediated tool execution
//!
//! Assigns Ollama-backed agents to pentest roles, admits them against
//! RAM/VRAM budgets, downloads models on demand, and lets each agent run a
//! whitelisted set of external tools through a single gateway.
//!
//! # Modules
//!
//! - `agent` - Agent records, registry, lifecycle manager and task dispatcher
//! - `models` - Model catalog and on-demand downloads
//! - `resources` - RAM/VRAM/disk telemetry for admission control
//! - `tools` - Tool gateway, process launcher and browser driver
//! - `ollama` - Ollama chat backend and management client
//! - `service` - The `Playground` facade used by every inbound surface
//! - `dashboard` - axum HTTP API and status page
//! - `config` - TOML configuration
//! - `metrics` - Prometheus counters and histograms served at `/metrics`
//! - `tracing` - Logging and OpenTelemetry export
//!
//! # Quick Start
//!
//! ```ignore
//! use agentvisor::{CreateAgentRequest, Playground, PlaygroundConfig};
//!
//! let config = PlaygroundConfig::from_file("playground.toml")?;
//! let playground = Playground::from_config(&config)?;
//!
//! let agent = playground
//!     .create_agent(CreateAgentRequest {
//!         role: "recon".into(),
//!         model: "llama3.1".into(),
//!         ..Default::default()
//!     })
//!     .await?;
//! let result = playground.run_task(&agent.id, "Scan 10.0.0.5").await?;
//! ```

pub mod agent;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod metrics;
pub mod models;
pub mod ollama;
pub mod resources;
pub mod service;
pub mod tools;
pub mod tracing;

// Re-export commonly used types at crate root for convenience
pub use agent::{AgentInfo, AgentStatus, CreateAgentRequest, TaskResult};
pub use config::{AgentRole, PlaygroundConfig};
pub use error::{CoreError, ErrorKind};
pub use service::{Backends, Playground, TaskRequest};
pub use tools::ToolKind;
