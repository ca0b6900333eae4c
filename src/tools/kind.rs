//! The closed set of tools an agent can ever be granted
//!
//! Anything that does not parse into a [`ToolKind`] is not a tool. The
//! gateway, the role configuration and the model-output decoder all go
//! through `ToolKind::from_str`, so a misspelled or invented name is rejected
//! at the edge instead of reaching a process launcher.

use std::collections::BTreeSet;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ollama::{Tool, ToolFunction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    /// Network scanner
    Nmap,
    /// Directory brute-forcer
    Gobuster,
    /// SQL-injection tester
    Sqlmap,
    /// Exploitation framework driver (msfconsole resource scripts)
    Metasploit,
    /// Browser automation (navigate / screenshot)
    Browser,
    /// Save, read and list files in the workspace
    Files,
    /// Run a workspace Python script, gated behind `allow_raw_command`
    Python,
    /// Raw command execution, gated behind `allow_raw_command`
    Command,
}

/// Set of tools granted to an agent
pub type ToolSet = BTreeSet<ToolKind>;

impl ToolKind {
    pub const ALL: [ToolKind; 8] = [
        ToolKind::Nmap,
        ToolKind::Gobuster,
        ToolKind::Sqlmap,
        ToolKind::Metasploit,
        ToolKind::Browser,
        ToolKind::Files,
        ToolKind::Python,
        ToolKind::Command,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKind::Nmap => "nmap",
            ToolKind::Gobuster => "gobuster",
            ToolKind::Sqlmap => "sqlmap",
            ToolKind::Metasploit => "metasploit",
            ToolKind::Browser => "browser",
            ToolKind::Files => "files",
            ToolKind::Python => "python",
            ToolKind::Command => "command",
        }
    }

    /// Tools that execute code chosen by the model; off unless
    /// `allow_raw_command` is set
    pub fn runs_arbitrary_code(&self) -> bool {
        matches!(self, ToolKind::Python | ToolKind::Command)
    }

    /// Timeout used when the configuration has no per-tool override
    pub fn default_timeout(&self, fallback: Duration) -> Duration {
        match self {
            ToolKind::Nmap | ToolKind::Gobuster => Duration::from_secs(600),
            ToolKind::Sqlmap => Duration::from_secs(900),
            ToolKind::Metasploit => Duration::from_secs(1800),
            ToolKind::Browser | ToolKind::Files | ToolKind::Python | ToolKind::Command => fallback,
        }
    }

    /// Tool definition advertised to the model through Ollama's `tools` field
    pub fn definition(&self) -> Tool {
        let (description, parameters) = match self {
            ToolKind::Nmap => (
                "Run an nmap scan against a host or network range.",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "target": { "type": "string", "description": "IP, hostname or CIDR range" },
                        "flags": {
                            "type": "string",
                            "description": "Scan flags, default \"-sV -sC\". Allowed: scan types (-sS -sT -sU -sV -sC ...), -p <ports>, -T0..-T5, -Pn, -O, -A, --top-ports <n>"
                        },
                        "output_file": { "type": "string", "description": "File name in the workspace for normal output" }
                    },
                    "required": ["target"]
                }),
            ),
            ToolKind::Gobuster => (
                "Brute-force directories on a web server with gobuster.",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "url": { "type": "string", "description": "Base URL to enumerate" },
                        "wordlist": { "type": "string", "description": "Path to a wordlist" },
                        "extensions": { "type": "string", "description": "Comma separated extensions, e.g. php,html" }
                    },
                    "required": ["url"]
                }),
            ),
            ToolKind::Sqlmap => (
                "Test a URL for SQL injection with sqlmap in batch mode.",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "url": { "type": "string", "description": "Target URL with parameters" },
                        "params": { "type": "string", "description": "Parameter(s) to test" }
                    },
                    "required": ["url"]
                }),
            ),
            ToolKind::Metasploit => (
                "Run a list of msfconsole commands as a resource script.",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "commands": {
                            "type": "array",
                            "items": { "type": "string" },
                            "description": "msfconsole commands, executed in order"
                        }
                    },
                    "required": ["commands"]
                }),
            ),
            ToolKind::Browser => (
                "Open a web page and report its title, links and forms, or save a screenshot.",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "action": { "type": "string", "enum": ["navigate", "screenshot"] },
                        "url": { "type": "string" },
                        "path": { "type": "string", "description": "Screenshot file name" }
                    },
                    "required": ["url"]
                }),
            ),
            ToolKind::Files => (
                "Save, read or list files in the workspace directory.",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "action": { "type": "string", "enum": ["save", "read", "list"] },
                        "filename": { "type": "string", "description": "Plain file name, no directories" },
                        "content": { "type": "string", "description": "Text to write for save" }
                    },
                    "required": ["action"]
                }),
            ),
            ToolKind::Python => (
                "Run a Python script from the workspace with python3.",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "script": { "type": "string", "description": "Script file name in the workspace" },
                        "args": { "type": "array", "items": { "type": "string" } },
                        "input": { "type": "string", "description": "Text fed to the script's stdin" }
                    },
                    "required": ["script"]
                }),
            ),
            ToolKind::Command => (
                "Run a shell command in the workspace directory.",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "cmd": { "type": "string", "description": "Command line to execute" }
                    },
                    "required": ["cmd"]
                }),
            ),
        };

        Tool {
            tool_type: "function".to_string(),
            function: ToolFunction {
                name: self.as_str().to_string(),
                description: description.to_string(),
                parameters,
            },
        }
    }
}

impl std::fmt::Display for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for names outside the tool enumeration
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown tool '{0}'")]
pub struct UnknownTool(pub String);

impl FromStr for ToolKind {
    type Err = UnknownTool;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ToolKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownTool(s.to_string()))
    }
}

/// Parse a list of tool names into a set, failing on the first unknown name
pub fn parse_tool_set<S: AsRef<str>>(names: &[S]) -> Result<ToolSet, UnknownTool> {
    names.iter().map(|n| n.as_ref().parse()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_is_exact() {
        assert_eq!("nmap".parse::<ToolKind>(), Ok(ToolKind::Nmap));
        assert!("NMAP".parse::<ToolKind>().is_err());
        assert!("nmap; rm -rf /".parse::<ToolKind>().is_err());
        assert!("shell".parse::<ToolKind>().is_err());
    }

    #[test]
    fn test_parse_tool_set_rejects_unknown() {
        let set = parse_tool_set(&["nmap", "browser", "nmap"]).unwrap();
        assert_eq!(set.len(), 2);

        let err = parse_tool_set(&["nmap", "hydra"]).unwrap_err();
        assert_eq!(err, UnknownTool("hydra".to_string()));
    }

    #[test]
    fn test_default_timeouts() {
        let fallback = Duration::from_secs(300);
        assert_eq!(ToolKind::Nmap.default_timeout(fallback), Duration::from_secs(600));
        assert_eq!(ToolKind::Sqlmap.default_timeout(fallback), Duration::from_secs(900));
        assert_eq!(ToolKind::Metasploit.default_timeout(fallback), Duration::from_secs(1800));
        assert_eq!(ToolKind::Command.default_timeout(fallback), fallback);
    }

    #[test]
    fn test_code_running_tools() {
        let gated: Vec<ToolKind> = ToolKind::ALL.into_iter().filter(|k| k.runs_arbitrary_code()).collect();
        assert_eq!(gated, vec![ToolKind::Python, ToolKind::Command]);
    }

    #[test]
    fn test_definition_names_match() {
        for kind in ToolKind::ALL {
            let def = kind.definition();
            assert_eq!(def.tool_type, "function");
            assert_eq!(def.function.name, kind.as_str());
            assert_eq!(def.function.parameters["type"], "object");
        }
    }
}
