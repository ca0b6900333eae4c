//! Model download backend
//!
//! Pulls run through the same [`ProcessLauncher`] as the tools, so a pull that
//! hangs is killed at `download_timeout_seconds` like any other process.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::tools::{CommandSpec, LaunchError, ProcessLauncher};

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error("ollama pull {model} exited with {exit_code}: {stderr}")]
    Failed {
        model: String,
        exit_code: i32,
        stderr: String,
    },
}

/// Outbound interface for fetching model weights
#[async_trait]
pub trait ModelDownloader: Send + Sync {
    async fn download(&self, model: &str) -> Result<(), DownloadError>;
}

/// `ollama pull <model>`
pub struct OllamaPuller {
    launcher: Arc<dyn ProcessLauncher>,
    working_dir: PathBuf,
    timeout: Duration,
}

impl OllamaPuller {
    pub fn new(launcher: Arc<dyn ProcessLauncher>, working_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            launcher,
            working_dir: working_dir.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ModelDownloader for OllamaPuller {
    async fn download(&self, model: &str) -> Result<(), DownloadError> {
        info!(model = %model, "pulling model");
        let spec = CommandSpec::new("ollama", &self.working_dir, self.timeout).args(["pull", model]);
        let output = self.launcher.run(spec).await?;

        if !output.success() {
            warn!(model = %model, exit_code = output.exit_code, "ollama pull failed");
            return Err(DownloadError::Failed {
                model: model.to_string(),
                exit_code: output.exit_code,
                stderr: output.stderr,
            });
        }
        info!(model = %model, duration_ms = output.duration_ms, "model pulled");
        Ok(())
    }
}
