//! Agents: records, registry, lifecycle and the task loop
//!
//! # Architecture
//!
//! ```text
//! create_agent ──► LifecycleManager ──admission──► ResourceMonitor / ModelCatalog
//!                        │
//!                        ▼
//!                  AgentRegistry ◄──────────── transcript turns
//!                        ▲                            │
//! run_task ──► Dispatcher ──► ModelBackend (/api/chat)│
//!                  │                                  │
//!                  └──► ToolGateway ──► tool process ─┘
//! ```

pub mod directive;
pub mod dispatcher;
pub mod lifecycle;
pub mod record;
pub mod registry;

pub use directive::{decode, Directive};
pub use dispatcher::{BroadcastOutcome, DispatchSettings, Dispatcher, TaskResult, ToolInvocation};
pub use lifecycle::{
    Admission, CreateAgentRequest, DownloadStatus, LifecycleManager, LifecycleSettings,
    Requirements, ResourceKind, SystemResources, VramSource,
};
pub use record::{AgentInfo, AgentRecord, AgentStatus, Turn, TurnRole};
pub use registry::{AgentRegistry, AgentStats, TaskGuard};
