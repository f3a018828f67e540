//! Host description used for diagnostics.

use serde::{Deserialize, Serialize};
use sysinfo::System;

use super::probe::{run_probe_command, PROBE_TIMEOUT};

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Static facts about the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub platform: String,
    pub architecture: String,
    pub cpu_count: usize,
    pub memory_total_gb: f64,
    /// First GPU reported by `nvidia-smi`, if any
    pub gpu_name: Option<String>,
    pub gpu_memory_mb: u64,
}

impl SystemInfo {
    pub async fn collect() -> Self {
        let mut sys = System::new();
        sys.refresh_memory();

        let (gpu_name, gpu_memory_mb) = match run_probe_command(
            "nvidia-smi",
            &["--query-gpu=name,memory.total", "--format=csv,noheader,nounits"],
            PROBE_TIMEOUT,
        )
        .await
        {
            Ok(output) if output.status.success() => {
                match parse_gpu_query(&String::from_utf8_lossy(&output.stdout)) {
                    Some((name, mb)) => (Some(name), mb),
                    None => (None, 0),
                }
            }
            _ => (None, 0),
        };

        Self {
            platform: std::env::consts::OS.to_string(),
            architecture: std::env::consts::ARCH.to_string(),
            cpu_count: num_cpus::get(),
            memory_total_gb: sys.total_memory() as f64 / BYTES_PER_GB,
            gpu_name,
            gpu_memory_mb,
        }
    }

    pub fn gpu_label(&self) -> &str {
        self.gpu_name.as_deref().unwrap_or("Not available")
    }
}

/// Parse the first line of `name,memory.total` CSV output.
pub(crate) fn parse_gpu_query(stdout: &str) -> Option<(String, u64)> {
    let line = stdout.lines().next()?;
    let mut fields = line.split(',');
    let name = fields.next()?.trim();
    let memory = fields.next()?.trim().parse().ok()?;
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), memory))
}
