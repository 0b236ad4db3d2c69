//! Accelerator detection.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::registry::GpuRequirement;

use super::context::CPU_LABEL;

/// Source of accelerator device names.
#[async_trait]
pub trait HardwareProbe: Send + Sync {
    /// Lists one name per device. An error means "no accelerator".
    async fn device_names(&self) -> Result<Vec<String>, String>;
}

/// Probes NVIDIA GPUs through `nvidia-smi`.
#[derive(Debug, Clone)]
pub struct NvidiaSmiProbe {
    command: String,
}

impl NvidiaSmiProbe {
    pub fn new() -> Self {
        Self {
            command: "nvidia-smi".to_string(),
        }
    }
}

impl Default for NvidiaSmiProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HardwareProbe for NvidiaSmiProbe {
    async fn device_names(&self) -> Result<Vec<String>, String> {
        let output = Command::new(&self.command)
            .args(["--query-gpu=name", "--format=csv,noheader"])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| format!("{} unavailable: {}", self.command, e))?;

        if !output.status.success() {
            return Err(format!(
                "{} exited with {}: {}",
                self.command,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::to_string)
            .collect())
    }
}

/// Collapses device names into "2 A100, 1 T4". Empty input gives "CPU".
///
/// Names are trimmed and inner whitespace is collapsed. Grouping is
/// case-insensitive and keeps the first spelling and first-seen order.
pub fn describe_hardware(names: &[String]) -> String {
    let mut groups: Vec<(String, usize)> = Vec::new();

    for name in names {
        let normalized = name.split_whitespace().collect::<Vec<_>>().join(" ");
        if normalized.is_empty() {
            continue;
        }
        match groups
            .iter_mut()
            .find(|(seen, _)| seen.eq_ignore_ascii_case(&normalized))
        {
            Some((_, count)) => *count += 1,
            None => groups.push((normalized, 1)),
        }
    }

    if groups.is_empty() {
        return CPU_LABEL.to_string();
    }

    groups
        .iter()
        .map(|(name, count)| format!("{} {}", count, name))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Runs `probe` and describes what it found, falling back to "CPU".
pub async fn detect_hardware(probe: &dyn HardwareProbe) -> String {
    let hardware = match probe.device_names().await {
        Ok(names) => describe_hardware(&names),
        Err(e) => {
            debug!("No accelerator detected: {}", e);
            CPU_LABEL.to_string()
        }
    };
    info!("Detected hardware: {}", hardware);
    hardware
}

/// True when an agent that requires a GPU is about to run on `hardware`
/// without one. The launch still proceeds.
pub fn lacks_required_gpu(requirement: GpuRequirement, hardware: &str) -> bool {
    requirement == GpuRequirement::Required && hardware == CPU_LABEL
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProbe(Result<Vec<String>, String>);

    #[async_trait]
    impl HardwareProbe for FixedProbe {
        async fn device_names(&self) -> Result<Vec<String>, String> {
            self.0.clone()
        }
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_describe_groups_in_first_seen_order() {
        let devices = names(&["NVIDIA A100", "Tesla T4", "NVIDIA A100"]);
        assert_eq!(describe_hardware(&devices), "2 NVIDIA A100, 1 Tesla T4");
    }

    #[test]
    fn test_describe_normalizes_names() {
        let devices = names(&["  Tesla   T4 ", "tesla t4", "", "   "]);
        assert_eq!(describe_hardware(&devices), "2 Tesla T4");
    }

    #[test]
    fn test_describe_empty_is_cpu() {
        assert_eq!(describe_hardware(&[]), "CPU");
    }

    #[tokio::test]
    async fn test_detect_falls_back_to_cpu() {
        let failing = FixedProbe(Err("nvidia-smi not found".to_string()));
        assert_eq!(detect_hardware(&failing).await, "CPU");

        let empty = FixedProbe(Ok(Vec::new()));
        assert_eq!(detect_hardware(&empty).await, "CPU");
    }

    #[tokio::test]
    async fn test_detect_reports_devices() {
        let probe = FixedProbe(Ok(names(&["A100", "A100", "T4"])));
        assert_eq!(detect_hardware(&probe).await, "2 A100, 1 T4");
    }

    #[test]
    fn test_lacks_required_gpu() {
        assert!(lacks_required_gpu(GpuRequirement::Required, CPU_LABEL));
        assert!(!lacks_required_gpu(GpuRequirement::Required, "NVIDIA A100-SXM4-80GB"));
        assert!(!lacks_required_gpu(GpuRequirement::Optional, CPU_LABEL));
        assert!(!lacks_required_gpu(GpuRequirement::None, CPU_LABEL));
    }
}
