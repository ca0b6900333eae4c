//! HTTP API and web dashboard for agentvisor
//!
//! JSON API under `/api`, Prometheus text at `/metrics`, and a small status
//! page at `/` that polls the API.
//!
//! Every core failure is returned as `{"kind": ..., "message": ...}` with a
//! status code picked from its [`ErrorKind`].

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info};

use crate::agent::CreateAgentRequest;
use crate::error::{CoreError, ErrorKind};
use crate::metrics;
use crate::service::{Playground, TaskRequest};
use crate::tools::ToolKind;

/// Shared by every route handler
#[derive(Clone)]
pub struct DashboardState {
    pub playground: Arc<Playground>,
}

/// Error body returned by every failing endpoint
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.kind {
            ErrorKind::InvalidRole | ErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
            ErrorKind::ModelUnavailable | ErrorKind::AgentNotFound => StatusCode::NOT_FOUND,
            ErrorKind::InsufficientResources => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::AgentBusy => StatusCode::CONFLICT,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::ToolCallLimitExceeded => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::BackendUnavailable => StatusCode::BAD_GATEWAY,
            ErrorKind::ExecutionError | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        Self {
            kind: ErrorKind::InvalidRequest,
            message: e.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(kind = %self.kind, message = %self.message, "request failed");
        }
        (status, Json(self)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Deserialize)]
pub struct BroadcastRequest {
    pub message: String,
    #[serde(default)]
    pub roles: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct DownloadRequest {
    pub model_name: String,
}

#[derive(Debug, Deserialize)]
pub struct AdmissionRequest {
    pub role: String,
    pub model: String,
}

/// Role as listed by `GET /api/roles`, without its prompt
#[derive(Debug, Serialize)]
pub struct RoleSummary {
    pub name: String,
    pub description: String,
    pub allowed_tools: Vec<ToolKind>,
    pub recommended_models: Vec<String>,
}

/// Routes for the JSON API, `/metrics` and the status page
pub fn create_router(state: DashboardState) -> Router {
    Router::new()
        .route("/", get(dashboard_page))
        .route("/api", get(api_info))
        .route("/api/health", get(health))
        .route("/api/system/resources", get(system_resources))
        .route("/api/models", get(list_models))
        .route("/api/models/download", post(download_model))
        .route("/api/models/admission", post(request_admission))
        .route("/api/models/calculate-requirements", post(calculate_requirements))
        .route("/api/models/:name/status", get(model_status))
        .route("/api/agents", get(list_agents).post(create_agent))
        .route("/api/agents/stats", get(agent_stats))
        .route("/api/agents/broadcast", post(broadcast))
        .route("/api/agents/:id", get(get_agent).delete(delete_agent))
        .route("/api/agents/:id/task", post(execute_task))
        .route("/api/agents/:id/clear-history", post(clear_history))
        .route("/api/roles", get(list_roles))
        .route("/api/roles/:name", get(get_role))
        .route("/metrics", get(prometheus_metrics))
        .with_state(state)
}

/// Serve the HTML dashboard page
async fn dashboard_page() -> Html<&'static str> {
    Html(DASHBOARD_HTML)
}

async fn api_info() -> impl IntoResponse {
    Json(json!({
        "name": "agentvisor",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "endpoints": {
            "models": "/api/models",
            "agents": "/api/agents",
            "roles": "/api/roles",
            "health": "/api/health",
            "metrics": "/metrics"
        }
    }))
}

async fn health(State(state): State<DashboardState>) -> impl IntoResponse {
    Json(state.playground.health().await)
}

async fn system_resources(State(state): State<DashboardState>) -> impl IntoResponse {
    Json(state.playground.get_resources().await)
}

// ---- models ----

async fn list_models(State(state): State<DashboardState>) -> impl IntoResponse {
    Json(json!({ "models": state.playground.list_models() }))
}

async fn model_status(State(state): State<DashboardState>, Path(name): Path<String>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.playground.model_status(&name)?))
}

async fn download_model(
    State(state): State<DashboardState>,
    payload: Result<Json<DownloadRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = payload?;
    info!(model = %request.model_name, "download requested");
    let status = state.playground.download_model(&request.model_name).await?;
    Ok(Json(json!({ "model": request.model_name, "status": status })))
}

async fn request_admission(
    State(state): State<DashboardState>,
    payload: Result<Json<AdmissionRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = payload?;
    Ok(Json(state.playground.request_admission(&request.role, &request.model).await?))
}

async fn calculate_requirements(
    State(state): State<DashboardState>,
    payload: Result<Json<Vec<String>>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(models) = payload?;
    let requirements = state.playground.calculate_requirements(&models).await;
    Ok(Json(json!({ "requirements": requirements })))
}

// ---- agents ----

async fn list_agents(State(state): State<DashboardState>) -> impl IntoResponse {
    Json(json!({ "agents": state.playground.list_agents() }))
}

async fn create_agent(
    State(state): State<DashboardState>,
    payload: Result<Json<CreateAgentRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = payload?;
    let agent = state.playground.create_agent(request).await?;
    Ok((StatusCode::CREATED, Json(agent)))
}

async fn get_agent(State(state): State<DashboardState>, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.playground.get_agent(&id)?))
}

async fn delete_agent(State(state): State<DashboardState>, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    state.playground.delete_agent(&id).await?;
    Ok(Json(json!({ "success": true, "agent_id": id })))
}

async fn execute_task(
    State(state): State<DashboardState>,
    Path(id): Path<String>,
    payload: Result<Json<TaskRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(task) = payload?;
    Ok(Json(state.playground.execute_task(&id, task).await?))
}

async fn clear_history(State(state): State<DashboardState>, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    state.playground.clear_history(&id)?;
    Ok(Json(json!({ "success": true })))
}

async fn agent_stats(State(state): State<DashboardState>) -> impl IntoResponse {
    Json(state.playground.agent_stats())
}

async fn broadcast(
    State(state): State<DashboardState>,
    payload: Result<Json<BroadcastRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = payload?;
    let results = state
        .playground
        .broadcast(&request.message, request.roles.as_deref())
        .await?;
    Ok(Json(json!({ "results": results })))
}

// ---- roles ----

async fn list_roles(State(state): State<DashboardState>) -> impl IntoResponse {
    let roles: BTreeMap<&String, RoleSummary> = state
        .playground
        .list_roles()
        .iter()
        .map(|(key, role)| {
            (
                key,
                RoleSummary {
                    name: role.name.clone(),
                    description: role.description.clone(),
                    allowed_tools: role.allowed_tools.clone(),
                    recommended_models: role.recommended_models.clone(),
                },
            )
        })
        .collect();
    Json(json!({ "roles": roles }))
}

async fn get_role(State(state): State<DashboardState>, Path(name): Path<String>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.playground.get_role(&name)?.clone()))
}

/// Prometheus text exposition
async fn prometheus_metrics() -> Response {
    match metrics::render() {
        Ok(body) => ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body).into_response(),
        Err(e) => ApiError {
            kind: ErrorKind::Internal,
            message: e.to_string(),
        }
        .into_response(),
    }
}

/// HTML dashboard page
const DASHBOARD_HTML: &str = r#"
<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>agentvisor</title>
    <style>
        * { margin: 0; padding: 0; box-sizing: border-box; }
        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            background: #0a0a0a;
            color: #e0e0e0;
            min-height: 100vh;
            padding: 2rem;
        }
        .header {
            text-align: center;
            margin-bottom: 2rem;
            border-bottom: 1px solid #333;
            padding-bottom: 1rem;
        }
        .header h1 { color: #00ff88; font-size: 2rem; margin-bottom: 0.5rem; }
        .header p { color: #888; }
        .grid {
            display: grid;
            grid-template-columns: repeat(auto-fit, minmax(300px, 1fr));
            gap: 1.5rem;
            max-width: 1200px;
            margin: 0 auto;
        }
        .card {
            background: #1a1a1a;
            border-radius: 12px;
            padding: 1.5rem;
            border: 1px solid #333;
        }
        .card h2 {
            color: #00ff88;
            font-size: 1rem;
            margin-bottom: 1rem;
            text-transform: uppercase;
            letter-spacing: 1px;
        }
        .stat {
            display: flex;
            justify-content: space-between;
            padding: 0.5rem 0;
            border-bottom: 1px solid #222;
        }
        .stat:last-child { border-bottom: none; }
        .stat-label { color: #888; }
        .stat-value { color: #fff; font-weight: bold; }
        .stat-value.good { color: #00ff88; }
        .stat-value.warn { color: #ffaa00; }
        .stat-value.error { color: #ff4444; }
        .refresh-note { text-align: center; color: #666; margin-top: 2rem; font-size: 0.875rem; }
    </style>
</head>
<body>
    <div class="header">
        <h1>agentvisor</h1>
        <p>Pentest Playground Agents</p>
    </div>

    <div class="grid">
        <div class="card"><h2>Resources</h2><div id="resources">Loading...</div></div>
        <div class="card"><h2>Agents</h2><div id="agents">Loading...</div></div>
        <div class="card"><h2>Models</h2><div id="models">Loading...</div></div>
    </div>

    <p class="refresh-note">Auto-refreshes every 2 seconds</p>

    <script>
        const gb = (u) => u ? `${u.used_gb.toFixed(1)} / ${u.total_gb.toFixed(1)} GB` : 'unknown';
        const row = (label, value, cls = '') =>
            `<div class="stat"><span class="stat-label">${label}</span><span class="stat-value ${cls}">${value}</span></div>`;
        const statusClass = { ready: 'good', busy: 'warn', initializing: 'warn', error: 'error' };

        async function fetchData() {
            try {
                const res = await (await fetch('/api/system/resources')).json();
                document.getElementById('resources').innerHTML =
                    row('RAM', gb(res.ram)) +
                    row(`VRAM (${res.vram_source})`, gb(res.vram)) +
                    row('Disk', gb(res.disk));

                const agents = (await (await fetch('/api/agents')).json()).agents;
                document.getElementById('agents').innerHTML = agents.length
                    ? agents.map(a => row(`${a.role} / ${a.model}`, a.status, statusClass[a.status] || '')).join('')
                    : row('Active', 0);

                const models = (await (await fetch('/api/models')).json()).models;
                document.getElementById('models').innerHTML = models.map(m =>
                    row(m.id, m.downloading ? 'downloading' : (m.downloaded ? 'downloaded' : 'missing'),
                        m.downloaded ? 'good' : 'warn')).join('');
            } catch (err) {
                console.error('Error fetching data:', err);
            }
        }

        fetchData();
        setInterval(fetchData, 2000);
    </script>
</body>
</html>
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (CoreError::InvalidRole("x".into()), StatusCode::BAD_REQUEST),
            (CoreError::AgentNotFound("a".into()), StatusCode::NOT_FOUND),
            (CoreError::InsufficientResources("vram".into()), StatusCode::SERVICE_UNAVAILABLE),
            (
                CoreError::AgentBusy {
                    agent_id: "a".into(),
                    reason: "busy".into(),
                },
                StatusCode::CONFLICT,
            ),
            (CoreError::Forbidden("command".into()), StatusCode::FORBIDDEN),
            (CoreError::BackendUnavailable("down".into()), StatusCode::BAD_GATEWAY),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[test]
    fn test_error_body_shape() {
        let body = serde_json::to_value(ApiError::from(CoreError::Forbidden("no".into()))).unwrap();
        assert_eq!(body["kind"], "forbidden");
        assert_eq!(body["message"], "Forbidden: no");
    }
}
