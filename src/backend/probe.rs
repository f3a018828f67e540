//! External command probes used for accelerator detection.

use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::Backend;
use crate::error::{Error, Result};

/// Time allowed for a single probe command.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Answers whether a backend is usable on this host.
///
/// Implementations must never fail; every problem means "unavailable".
#[async_trait]
pub trait BackendProbe: Send + Sync {
    async fn probe(&self, backend: Backend) -> bool;
}

/// Probe backed by vendor tools and the host operating system.
#[derive(Debug, Clone)]
pub struct HostProbe {
    timeout: Duration,
}

impl Default for HostProbe {
    fn default() -> Self {
        Self {
            timeout: PROBE_TIMEOUT,
        }
    }
}

impl HostProbe {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl BackendProbe for HostProbe {
    async fn probe(&self, backend: Backend) -> bool {
        match backend {
            Backend::Cpu => true,
            Backend::Cuda => match run_probe_command("nvidia-smi", &[], self.timeout).await {
                Ok(output) => output.status.success(),
                Err(e) => {
                    debug!("CUDA probe failed: {}", e);
                    false
                }
            },
            // No vendor-neutral OpenCL tool is guaranteed; the platform decides.
            Backend::OpenCl => cfg!(any(target_os = "linux", target_os = "windows")),
            Backend::Metal => cfg!(target_os = "macos"),
        }
    }
}

/// Run `program` with `args`, killing it if it outlives `timeout`.
pub(crate) async fn run_probe_command(
    program: &str,
    args: &[&str],
    timeout: Duration,
) -> Result<Output> {
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::Probe(format!("failed to spawn {}: {}", program, e)))?;

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(Error::Probe(format!("{} failed: {}", program, e))),
        Err(_) => Err(Error::Probe(format!(
            "{} timed out after {:?}",
            program, timeout
        ))),
    }
}
