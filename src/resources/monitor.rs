//! Host resource telemetry
//!
//! RAM and disk come from `sysinfo`, VRAM from `nvidia-smi`. Each probe runs
//! under the probe timeout; a probe that fails or overruns reports `None`
//! for its resource instead of a guessed number.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sysinfo::{Disks, System};
use tokio::process::Command;
use tracing::{debug, warn};

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Used and total capacity of one resource, in GB
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResourceUsage {
    pub used_gb: f64,
    pub total_gb: f64,
}

impl ResourceUsage {
    pub fn available_gb(&self) -> f64 {
        (self.total_gb - self.used_gb).max(0.0)
    }
}

/// Point-in-time view of host resources; `None` means unknown
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceSnapshot {
    pub ram: Option<ResourceUsage>,
    pub vram: Option<ResourceUsage>,
    pub disk: Option<ResourceUsage>,
    pub taken_at: DateTime<Utc>,
}

impl ResourceSnapshot {
    pub fn unknown() -> Self {
        Self {
            ram: None,
            vram: None,
            disk: None,
            taken_at: Utc::now(),
        }
    }
}

/// Configured capacities that replace detected totals
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceTotals {
    pub ram_gb: Option<f64>,
    pub vram_gb: Option<f64>,
    pub disk_gb: Option<f64>,
}

/// Outbound interface for resource telemetry
#[async_trait]
pub trait ResourceMonitor: Send + Sync {
    async fn snapshot(&self) -> ResourceSnapshot;
}

/// Monitor for the local host
pub struct HostMonitor {
    workspace_dir: PathBuf,
    totals: ResourceTotals,
    probe_timeout: Duration,
}

impl HostMonitor {
    pub fn new(workspace_dir: impl Into<PathBuf>, totals: ResourceTotals, probe_timeout: Duration) -> Self {
        Self {
            workspace_dir: workspace_dir.into(),
            totals,
            probe_timeout,
        }
    }

    async fn probe_host(&self) -> (Option<ResourceUsage>, Option<ResourceUsage>) {
        let workspace = self.workspace_dir.clone();
        let probe = tokio::task::spawn_blocking(move || (read_memory(), read_disk(&workspace)));

        match tokio::time::timeout(self.probe_timeout, probe).await {
            Ok(Ok(usage)) => usage,
            Ok(Err(e)) => {
                warn!(error = %e, "host probe task failed");
                (None, None)
            }
            Err(_) => {
                warn!(timeout_ms = self.probe_timeout.as_millis() as u64, "host probe timed out");
                (None, None)
            }
        }
    }

    async fn probe_vram(&self) -> Option<ResourceUsage> {
        let mut cmd = Command::new("nvidia-smi");
        cmd.args([
            "--query-gpu=memory.used,memory.total",
            "--format=csv,noheader,nounits",
        ])
        .kill_on_drop(true);

        match tokio::time::timeout(self.probe_timeout, cmd.output()).await {
            Ok(Ok(output)) if output.status.success() => {
                parse_nvidia_smi(&String::from_utf8_lossy(&output.stdout))
            }
            Ok(Ok(output)) => {
                debug!(status = ?output.status.code(), "nvidia-smi returned an error");
                None
            }
            Ok(Err(e)) => {
                debug!(error = %e, "nvidia-smi unavailable");
                None
            }
            Err(_) => {
                warn!("nvidia-smi timed out");
                None
            }
        }
    }
}

#[async_trait]
impl ResourceMonitor for HostMonitor {
    async fn snapshot(&self) -> ResourceSnapshot {
        let ((ram, disk), vram) = tokio::join!(self.probe_host(), self.probe_vram());

        ResourceSnapshot {
            ram: with_total(ram, self.totals.ram_gb),
            vram: with_total(vram, self.totals.vram_gb),
            disk: with_total(disk, self.totals.disk_gb),
            taken_at: Utc::now(),
        }
    }
}

fn with_total(usage: Option<ResourceUsage>, total: Option<f64>) -> Option<ResourceUsage> {
    match (usage, total) {
        (Some(u), Some(total_gb)) => Some(ResourceUsage { total_gb, ..u }),
        (usage, _) => usage,
    }
}

fn read_memory() -> Option<ResourceUsage> {
    let mut sys = System::new();
    sys.refresh_memory();
    let total = sys.total_memory();
    if total == 0 {
        return None;
    }
    Some(ResourceUsage {
        used_gb: sys.used_memory() as f64 / BYTES_PER_GB,
        total_gb: total as f64 / BYTES_PER_GB,
    })
}

/// Disk holding `path`: the mount point with the longest matching prefix
fn read_disk(path: &Path) -> Option<ResourceUsage> {
    let disks = Disks::new_with_refreshed_list();
    let disk = disks
        .list()
        .iter()
        .filter(|d| path.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())?;

    let total = disk.total_space();
    if total == 0 {
        return None;
    }
    Some(ResourceUsage {
        used_gb: total.saturating_sub(disk.available_space()) as f64 / BYTES_PER_GB,
        total_gb: total as f64 / BYTES_PER_GB,
    })
}

/// Sum `memory.used, memory.total` (MiB) across GPUs
pub fn parse_nvidia_smi(output: &str) -> Option<ResourceUsage> {
    let mut used = 0.0;
    let mut total = 0.0;
    let mut gpus = 0;

    for line in output.lines().filter(|l| !l.trim().is_empty()) {
        let mut fields = line.split(',').map(str::trim);
        let u: f64 = fields.next()?.parse().ok()?;
        let t: f64 = fields.next()?.parse().ok()?;
        used += u;
        total += t;
        gpus += 1;
    }

    if gpus == 0 || total <= 0.0 {
        return None;
    }
    Some(ResourceUsage {
        used_gb: used / 1024.0,
        total_gb: total / 1024.0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nvidia_smi_sums_gpus() {
        let usage = parse_nvidia_smi("2048, 16384\n1024, 8192\n").unwrap();
        assert_eq!(usage.used_gb, 3.0);
        assert_eq!(usage.total_gb, 24.0);
    }

    #[test]
    fn test_parse_nvidia_smi_garbage_is_unknown() {
        assert!(parse_nvidia_smi("").is_none());
        assert!(parse_nvidia_smi("NVIDIA-SMI has failed").is_none());
    }

    #[test]
    fn test_configured_total_overrides_detected() {
        let detected = Some(ResourceUsage { used_gb: 4.0, total_gb: 24.0 });
        assert_eq!(with_total(detected, Some(16.0)).unwrap().total_gb, 16.0);
        assert_eq!(with_total(detected, None).unwrap().total_gb, 24.0);
        assert!(with_total(None, Some(16.0)).is_none());
    }

    #[test]
    fn test_available_never_negative() {
        let usage = ResourceUsage { used_gb: 20.0, total_gb: 16.0 };
        assert_eq!(usage.available_gb(), 0.0);
    }

    #[tokio::test]
    async fn test_host_snapshot_reports_ram() {
        let monitor = HostMonitor::new(std::env::temp_dir(), ResourceTotals::default(), Duration::from_secs(5));
        let snap = monitor.snapshot().await;
        if let Some(ram) = snap.ram {
            assert!(ram.total_gb > 0.0);
            assert!(ram.used_gb <= ram.total_gb);
        }
    }
}
