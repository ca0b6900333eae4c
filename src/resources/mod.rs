//! Resource telemetry for admission control

pub mod monitor;

pub use monitor::{HostMonitor, ResourceMonitor, ResourceSnapshot, ResourceTotals, ResourceUsage};
