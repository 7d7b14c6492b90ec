//! System resource detection for advisory utilization.
//!
//! Reads CPU load and memory pressure from the host so schedules can
//! report the utilization they were computed under.

use crate::integration::ResourceMonitor;
use crate::task::types::ResourceUtilization;
use anyhow::{Context, Result};
use async_trait::async_trait;

/// Resource monitor backed by the host operating system
#[derive(Debug, Clone)]
pub struct SystemResourceMonitor {
    /// Number of CPU cores used to normalize load averages
    cpu_cores: u32,
}

impl SystemResourceMonitor {
    pub fn new() -> Self {
        Self {
            cpu_cores: detect_cpus(),
        }
    }

    pub fn cpu_cores(&self) -> u32 {
        self.cpu_cores
    }

    #[cfg(target_os = "linux")]
    async fn read_utilization(&self) -> Result<ResourceUtilization> {
        let loadavg = tokio::fs::read_to_string("/proc/loadavg")
            .await
            .context("Failed to read /proc/loadavg")?;
        let meminfo = tokio::fs::read_to_string("/proc/meminfo")
            .await
            .context("Failed to read /proc/meminfo")?;

        Ok(ResourceUtilization {
            cpu_percent: parse_loadavg(&loadavg, self.cpu_cores)
                .context("Failed to parse /proc/loadavg")?,
            mem_percent: parse_meminfo(&meminfo).context("Failed to parse /proc/meminfo")?,
        })
    }

    #[cfg(not(target_os = "linux"))]
    async fn read_utilization(&self) -> Result<ResourceUtilization> {
        anyhow::bail!("Utilization detection is not supported on this platform")
    }
}

impl Default for SystemResourceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceMonitor for SystemResourceMonitor {
    async fn current_utilization(&self) -> Result<ResourceUtilization> {
        self.read_utilization().await
    }
}

/// One-minute load average as a percentage of available cores, capped at 100
pub fn parse_loadavg(content: &str, cpu_cores: u32) -> Option<f64> {
    let one_minute: f64 = content.split_whitespace().next()?.parse().ok()?;
    if !one_minute.is_finite() || one_minute < 0.0 {
        return None;
    }
    Some((one_minute / cpu_cores.max(1) as f64 * 100.0).min(100.0))
}

/// Share of memory in use, from `MemTotal` and `MemAvailable`
pub fn parse_meminfo(content: &str) -> Option<f64> {
    let mut total_kb = None;
    let mut available_kb = None;

    for line in content.lines() {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("MemTotal:") => total_kb = parts.next().and_then(|v| v.parse::<u64>().ok()),
            Some("MemAvailable:") => {
                available_kb = parts.next().and_then(|v| v.parse::<u64>().ok())
            }
            _ => {}
        }
    }

    let total = total_kb.filter(|total| *total > 0)? as f64;
    let available = available_kb? as f64;
    Some(((total - available) / total * 100.0).clamp(0.0, 100.0))
}

fn detect_cpus() -> u32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(4)
}
