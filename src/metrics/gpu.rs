//! GPU utilization readings.
//!
//! GPU telemetry is optional: hosts without a supported tool simply have no
//! [`GpuProbe`], and the corresponding snapshot fields stay at zero.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::backend::probe::{run_probe_command, PROBE_TIMEOUT};
use crate::error::{Error, Result};

/// One reading of the first GPU
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpuReading {
    /// Utilization (0-100)
    pub utilization_percent: f32,
    pub memory_used_gb: f64,
}

#[async_trait]
pub trait GpuProbe: Send + Sync {
    async fn read(&self) -> Result<GpuReading>;
}

/// [`GpuProbe`] that queries `nvidia-smi`.
#[derive(Debug, Clone)]
pub struct NvidiaSmiProbe {
    timeout: Duration,
}

impl Default for NvidiaSmiProbe {
    fn default() -> Self {
        Self {
            timeout: PROBE_TIMEOUT,
        }
    }
}

impl NvidiaSmiProbe {
    /// Returns a probe only if `nvidia-smi` answers right now.
    pub async fn detect() -> Option<Self> {
        let probe = Self::default();
        match probe.read().await {
            Ok(_) => Some(probe),
            Err(e) => {
                debug!("GPU telemetry disabled: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl GpuProbe for NvidiaSmiProbe {
    async fn read(&self) -> Result<GpuReading> {
        let output = run_probe_command(
            "nvidia-smi",
            &[
                "--query-gpu=utilization.gpu,memory.used",
                "--format=csv,noheader,nounits",
            ],
            self.timeout,
        )
        .await?;

        if !output.status.success() {
            return Err(Error::Probe(format!(
                "nvidia-smi exited with {}",
                output.status
            )));
        }

        parse_utilization_query(&String::from_utf8_lossy(&output.stdout))
            .ok_or_else(|| Error::Probe("unexpected nvidia-smi output".into()))
    }
}

/// Parse the first line of `utilization.gpu,memory.used` CSV (percent, MiB).
pub(crate) fn parse_utilization_query(stdout: &str) -> Option<GpuReading> {
    let line = stdout.lines().next()?;
    let mut fields = line.split(',').map(str::trim);
    let utilization: f32 = fields.next()?.parse().ok()?;
    let memory_mb: f64 = fields.next()?.parse().ok()?;
    Some(GpuReading {
        utilization_percent: utilization,
        memory_used_gb: memory_mb / 1024.0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_utilization_query() {
        let reading = parse_utilization_query("37, 2048\n12, 100\n").unwrap();
        assert_eq!(reading.utilization_percent, 37.0);
        assert_eq!(reading.memory_used_gb, 2.0);

        assert!(parse_utilization_query("").is_none());
        assert!(parse_utilization_query("[N/A], 100").is_none());
        assert!(parse_utilization_query("40").is_none());
    }
}
