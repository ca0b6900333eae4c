//! Browser automation backend
//!
//! `navigate` fetches the page over HTTP and extracts the title, links and
//! forms from the HTML. `screenshot` drives headless Chromium through the
//! same [`ProcessLauncher`] the other tools use, so it inherits the timeout
//! and process-group cleanup.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use scraper::{Html, Selector};
use serde::Serialize;
use thiserror::Error;

use super::process::{CommandSpec, LaunchError, ProcessLauncher, ProcessOutput};

/// Maximum number of links reported back to the model
pub const MAX_LINKS: usize = 20;

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36";

/// Page bodies beyond this are not read; the rest of the page is ignored
const MAX_PAGE_BYTES: usize = 2 * 1024 * 1024;

/// Summary of a fetched page
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PageSummary {
    pub url: String,
    pub status: u16,
    pub title: String,
    pub links_count: usize,
    pub forms_count: usize,
    /// First [`MAX_LINKS`] absolute links
    pub links: Vec<String>,
    pub forms: Vec<FormSummary>,
}

/// A form found on the page
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FormSummary {
    pub action: String,
    pub method: String,
    pub inputs: Vec<FormInput>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FormInput {
    pub name: String,
    #[serde(rename = "type")]
    pub input_type: String,
}

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    #[error("navigation to {url} timed out after {}s", .after.as_secs())]
    TimedOut { url: String, after: Duration },

    #[error("HTML extraction failed: {0}")]
    Extraction(String),

    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error("screenshot command exited with {exit_code}: {stderr}")]
    Screenshot { exit_code: i32, stderr: String },
}

/// Outbound interface for browser actions
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn navigate(&self, url: &Url, timeout: Duration) -> Result<PageSummary, BrowserError>;

    /// Save a screenshot of `url` to `output` (already resolved inside the workspace)
    async fn screenshot(
        &self,
        url: &Url,
        output: &Path,
        timeout: Duration,
    ) -> Result<ProcessOutput, BrowserError>;
}

/// reqwest + headless Chromium implementation
pub struct HttpBrowserDriver {
    client: reqwest::Client,
    launcher: Arc<dyn ProcessLauncher>,
    chromium_bin: String,
}

impl HttpBrowserDriver {
    pub fn new(launcher: Arc<dyn ProcessLauncher>, chromium_bin: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            launcher,
            chromium_bin: chromium_bin.into(),
        }
    }
}

/// Read at most `limit` bytes of the body, chunk by chunk
async fn read_capped(mut response: reqwest::Response, limit: usize) -> Result<Vec<u8>, reqwest::Error> {
    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        let room = limit - body.len();
        if chunk.len() >= room {
            body.extend_from_slice(&chunk[..room]);
            break;
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

#[async_trait]
impl BrowserDriver for HttpBrowserDriver {
    async fn navigate(&self, url: &Url, timeout: Duration) -> Result<PageSummary, BrowserError> {
        let nav_err = |e: reqwest::Error| {
            if e.is_timeout() {
                BrowserError::TimedOut { url: url.to_string(), after: timeout }
            } else {
                BrowserError::Navigation {
                    url: url.to_string(),
                    message: e.to_string(),
                }
            }
        };

        let response = self
            .client
            .get(url.clone())
            .timeout(timeout)
            .send()
            .await
            .map_err(nav_err)?;
        let status = response.status().as_u16();
        let final_url = response.url().clone();
        let body = read_capped(response, MAX_PAGE_BYTES).await.map_err(nav_err)?;

        extract_page(&String::from_utf8_lossy(&body), &final_url, status)
    }

    async fn screenshot(
        &self,
        url: &Url,
        output: &Path,
        timeout: Duration,
    ) -> Result<ProcessOutput, BrowserError> {
        let working_dir = output
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(std::env::temp_dir);

        let spec = CommandSpec::new(self.chromium_bin.clone(), working_dir, timeout).args([
            "--headless".to_string(),
            "--disable-gpu".to_string(),
            "--no-sandbox".to_string(),
            "--window-size=1920,1080".to_string(),
            format!("--user-agent={}", USER_AGENT),
            format!("--screenshot={}", output.display()),
            url.to_string(),
        ]);

        let result = self.launcher.run(spec).await?;
        if !result.success() {
            return Err(BrowserError::Screenshot {
                exit_code: result.exit_code,
                stderr: result.stderr,
            });
        }
        Ok(result)
    }
}

/// Pull title, links and forms out of an HTML document
pub fn extract_page(html: &str, base: &Url, status: u16) -> Result<PageSummary, BrowserError> {
    let document = Html::parse_document(html);

    let title_sel = selector("title")?;
    let link_sel = selector("a[href]")?;
    let form_sel = selector("form")?;
    let input_sel = selector("input, select, textarea")?;

    let title = document
        .select(&title_sel)
        .next()
        .map(|t| t.text().collect::<String>().trim().to_string())
        .unwrap_or_default();

    let all_links: Vec<String> = document
        .select(&link_sel)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| base.join(href).ok())
        .map(|u| u.to_string())
        .collect();

    let forms: Vec<FormSummary> = document
        .select(&form_sel)
        .map(|form| {
            let action = form
                .value()
                .attr("action")
                .and_then(|a| base.join(a).ok())
                .map(|u| u.to_string())
                .unwrap_or_else(|| base.to_string());
            let method = form
                .value()
                .attr("method")
                .unwrap_or("get")
                .to_ascii_lowercase();
            let inputs = form
                .select(&input_sel)
                .filter_map(|input| {
                    let name = input.value().attr("name")?;
                    Some(FormInput {
                        name: name.to_string(),
                        input_type: input
                            .value()
                            .attr("type")
                            .unwrap_or(input.value().name())
                            .to_string(),
                    })
                })
                .collect();
            FormSummary { action, method, inputs }
        })
        .collect();

    Ok(PageSummary {
        url: base.to_string(),
        status,
        title,
        links_count: all_links.len(),
        forms_count: forms.len(),
        links: all_links.into_iter().take(MAX_LINKS).collect(),
        forms,
    })
}

fn selector(css: &str) -> Result<Selector, BrowserError> {
    Selector::parse(css).map_err(|e| BrowserError::Extraction(format!("{css}: {e:?}")))
}
