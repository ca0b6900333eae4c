//! Ollama management API: local model listing and health

use std::time::Duration;

use serde::Deserialize;

use super::chat::BackendError;

/// One entry of `/api/tags`
#[derive(Debug, Clone, Deserialize)]
pub struct LocalModel {
    pub name: String,
    #[serde(default)]
    pub size: u64,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<LocalModel>,
}

/// Client for Ollama's non-chat endpoints
#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    client: reqwest::Client,
}

impl OllamaClient {
    /// Management client for the server at `base_url`; a trailing slash is
    /// dropped so endpoint paths can be appended directly
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Names of the models present locally, with the `:tag` suffix removed
    pub async fn list_local_models(&self) -> Result<Vec<String>, BackendError> {
        let endpoint = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&endpoint)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|source| BackendError::Request { endpoint: endpoint.clone(), source })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|source| BackendError::Request { endpoint: endpoint.clone(), source })?;
        if !status.is_success() {
            return Err(BackendError::Status { endpoint, status: status.as_u16(), body: text });
        }

        let tags: TagsResponse = serde_json::from_str(&text)?;
        Ok(strip_tags(tags.models.iter().map(|m| m.name.as_str())))
    }

    /// True when the server answers `/api/tags`
    pub async fn health_check(&self) -> bool {
        let endpoint = format!("{}/api/tags", self.base_url);
        match self
            .client
            .get(&endpoint)
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}

/// `llama3.1:8b` → `llama3.1`, deduplicated in first-seen order
pub fn strip_tags<'a>(names: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for name in names {
        let base = name.split(':').next().unwrap_or(name).to_string();
        if !out.contains(&base) {
            out.push(base);
        }
    }
    out
}
