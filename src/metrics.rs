//! Prometheus metrics for the playground
//!
//! Registered in the default registry and rendered at `GET /metrics`.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram_vec, Counter,
    CounterVec, Encoder, Gauge, HistogramVec, TextEncoder,
};

lazy_static! {
    // ─────────────────────────────────────────────────────────────────────────────
    // Agent Lifecycle
    // ─────────────────────────────────────────────────────────────────────────────

    /// Agents created since start
    pub static ref AGENTS_CREATED: Counter = register_counter!(
        "agentvisor_agents_created_total",
        "Total agents created"
    ).expect("failed to register AGENTS_CREATED metric");

    /// Agents currently registered
    pub static ref LIVE_AGENTS: Gauge = register_gauge!(
        "agentvisor_agents_live",
        "Number of agents currently registered"
    ).expect("failed to register LIVE_AGENTS metric");

    /// Admission decisions.
    ///
    /// Labels:
    /// - decision: "admit", "admit_with_download" or "deny"
    pub static ref ADMISSION_DECISIONS: CounterVec = register_counter_vec!(
        "agentvisor_admission_decisions_total",
        "Admission decisions by outcome",
        &["decision"]
    ).expect("failed to register ADMISSION_DECISIONS metric");

    /// Model downloads by outcome ("success" or "failure")
    pub static ref MODEL_DOWNLOADS: CounterVec = register_counter_vec!(
        "agentvisor_model_downloads_total",
        "Model downloads by outcome",
        &["outcome"]
    ).expect("failed to register MODEL_DOWNLOADS metric");

    // ─────────────────────────────────────────────────────────────────────────────
    // Tasks and Tools
    // ─────────────────────────────────────────────────────────────────────────────

    /// Finished tasks.
    ///
    /// Labels:
    /// - status: "success", "limit_reached", "busy" or "error"
    pub static ref TASKS: CounterVec = register_counter_vec!(
        "agentvisor_tasks_total",
        "Agent tasks by outcome",
        &["status"]
    ).expect("failed to register TASKS metric");

    /// Tool invocations.
    ///
    /// Labels:
    /// - tool: tool name, "unknown" for names outside the tool set
    /// - outcome: "success", "forbidden", "invalid_params", "timeout" or "error"
    pub static ref TOOL_INVOCATIONS: CounterVec = register_counter_vec!(
        "agentvisor_tool_invocations_total",
        "Tool invocations by tool and outcome",
        &["tool", "outcome"]
    ).expect("failed to register TOOL_INVOCATIONS metric");

    /// Wall-clock time of tool invocations, including rejected ones
    pub static ref TOOL_DURATION: HistogramVec = register_histogram_vec!(
        "agentvisor_tool_duration_seconds",
        "Tool invocation duration",
        &["tool"],
        vec![0.01, 0.1, 0.5, 1.0, 5.0, 30.0, 60.0, 300.0, 900.0, 1800.0]
    ).expect("failed to register TOOL_DURATION metric");

    /// Model backend call latency per model
    pub static ref LLM_CALL_TIME: HistogramVec = register_histogram_vec!(
        "agentvisor_llm_call_seconds",
        "Chat completion latency",
        &["model"],
        vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]
    ).expect("failed to register LLM_CALL_TIME metric");
}

/// Render every registered metric in the Prometheus text format
pub fn render() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}
