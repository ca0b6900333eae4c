//! Model catalog
//!
//! Static descriptors come from configuration and never change. The only
//! mutable state is which models are downloaded and which are currently being
//! downloaded; both live under a single lock so that `begin_download` and
//! `is_available` can never disagree about a model.
//!
//! ```text
//!   not downloaded ──begin_download──► downloading ──finish_download(ok)──► downloaded
//!          ▲                                │
//!          └──────finish_download(err)──────┘
//! ```

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Static description of a model and its declared resource footprint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Backend model name, e.g. "llama3.1"
    pub id: String,
    /// Parameter count class, e.g. "8B"
    #[serde(default)]
    pub parameters: String,
    pub ram_gb: f64,
    pub vram_gb: f64,
    #[serde(default)]
    pub disk_gb: f64,
    #[serde(default)]
    pub description: String,
    /// Seeds availability when set in configuration
    #[serde(default)]
    pub downloaded: bool,
}

/// Outcome of trying to claim a model download
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadClaim {
    /// Nothing to do
    AlreadyDownloaded,
    /// The caller owns the download and must call `finish_download`
    Claimed,
    /// Someone else owns it
    InProgress,
}

/// Serializable downloaded-flag state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogAvailability {
    pub downloaded: BTreeSet<String>,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("model '{0}' is not in the catalog")]
    NotFound(String),

    #[error("model '{0}' is listed more than once")]
    Duplicate(String),

    #[error("catalog state I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("catalog state is not valid JSON: {0}")]
    Format(#[from] serde_json::Error),
}

#[derive(Debug, Default)]
struct AvailabilityState {
    downloaded: HashSet<String>,
    downloading: HashSet<String>,
}

/// Catalog of known models
#[derive(Debug)]
pub struct ModelCatalog {
    models: Vec<ModelDescriptor>,
    state: Mutex<AvailabilityState>,
}

impl ModelCatalog {
    /// Build from descriptors in configuration order
    pub fn new(models: Vec<ModelDescriptor>) -> Result<Self, CatalogError> {
        let mut seen = HashSet::new();
        let mut state = AvailabilityState::default();
        for m in &models {
            if !seen.insert(m.id.clone()) {
                return Err(CatalogError::Duplicate(m.id.clone()));
            }
            if m.downloaded {
                state.downloaded.insert(m.id.clone());
            }
        }
        Ok(Self {
            models,
            state: Mutex::new(state),
        })
    }

    /// All descriptors, in configuration order, with current availability
    pub fn list(&self) -> Vec<ModelDescriptor> {
        let state = self.state.lock();
        self.models
            .iter()
            .map(|m| ModelDescriptor {
                downloaded: state.downloaded.contains(&m.id),
                ..m.clone()
            })
            .collect()
    }

    pub fn get(&self, id: &str) -> Result<ModelDescriptor, CatalogError> {
        let model = self.find(id)?;
        Ok(ModelDescriptor {
            downloaded: self.state.lock().downloaded.contains(id),
            ..model.clone()
        })
    }

    /// Downloaded and usable. Unknown models are never available.
    pub fn is_available(&self, id: &str) -> bool {
        self.state.lock().downloaded.contains(id)
    }

    pub fn is_downloading(&self, id: &str) -> bool {
        self.state.lock().downloading.contains(id)
    }

    /// Idempotent
    pub fn mark_downloaded(&self, id: &str) -> Result<(), CatalogError> {
        self.find(id)?;
        let mut state = self.state.lock();
        state.downloading.remove(id);
        if state.downloaded.insert(id.to_string()) {
            info!(model = %id, "model marked downloaded");
        }
        Ok(())
    }

    /// Claim the download of `id`. Exactly one concurrent caller gets `Claimed`.
    pub fn begin_download(&self, id: &str) -> Result<DownloadClaim, CatalogError> {
        self.find(id)?;
        let mut state = self.state.lock();
        if state.downloaded.contains(id) {
            return Ok(DownloadClaim::AlreadyDownloaded);
        }
        if !state.downloading.insert(id.to_string()) {
            return Ok(DownloadClaim::InProgress);
        }
        debug!(model = %id, "download claimed");
        Ok(DownloadClaim::Claimed)
    }

    /// Settle a claim made with `begin_download`
    pub fn finish_download(&self, id: &str, ok: bool) {
        let mut state = self.state.lock();
        state.downloading.remove(id);
        if ok {
            state.downloaded.insert(id.to_string());
        }
    }

    /// Mark models reported by the backend as downloaded; returns how many
    /// catalog entries matched
    pub fn sync_downloaded<S: AsRef<str>>(&self, names: &[S]) -> usize {
        let mut state = self.state.lock();
        let mut matched = 0;
        for name in names {
            let name = name.as_ref();
            if self.models.iter().any(|m| m.id == name) {
                state.downloaded.insert(name.to_string());
                matched += 1;
            }
        }
        matched
    }

    pub fn availability(&self) -> CatalogAvailability {
        CatalogAvailability {
            downloaded: self.state.lock().downloaded.iter().cloned().collect(),
        }
    }

    /// Replace downloaded flags; names outside the catalog are ignored
    pub fn restore(&self, availability: &CatalogAvailability) {
        let mut state = self.state.lock();
        state.downloaded = availability
            .downloaded
            .iter()
            .filter(|name| self.models.iter().any(|m| &m.id == *name))
            .cloned()
            .collect();
    }

    /// Persist availability as JSON
    pub fn save(&self, path: &Path) -> Result<(), CatalogError> {
        let json = serde_json::to_string_pretty(&self.availability())?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| CatalogError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|source| CatalogError::Io { path: tmp.clone(), source })?;
        std::fs::rename(&tmp, path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Restore availability from a file written by `save`
    pub fn load(&self, path: &Path) -> Result<(), CatalogError> {
        let json = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let availability: CatalogAvailability = serde_json::from_str(&json)?;
        self.restore(&availability);
        Ok(())
    }

    fn find(&self, id: &str) -> Result<&ModelDescriptor, CatalogError> {
        self.models
            .iter()
            .find(|m| m.id == id)
            .ok_or_else(|| CatalogError::NotFound(id.to_string()))
    }
}
