//! External tool execution
//!
//! ```text
//!   dispatcher ──► ToolGateway::invoke ──► ProcessLauncher (nmap, gobuster, ...)
//!                        │
//!                        └──────────────► BrowserDriver (navigate, screenshot)
//! ```
//!
//! The gateway is the only path from model output to a running process.

pub mod browser;
pub mod gateway;
pub mod kind;
pub mod process;

pub use browser::{BrowserDriver, BrowserError, HttpBrowserDriver, PageSummary};
pub use gateway::{ToolError, ToolGateway, ToolPolicy, ToolResult};
pub use kind::{parse_tool_set, ToolKind, ToolSet, UnknownTool};
pub use process::{CommandSpec, LaunchError, ProcessLauncher, ProcessOutput, TokioProcessLauncher};
