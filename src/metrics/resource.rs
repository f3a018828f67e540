//! Host CPU and memory readings.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use sysinfo::System;

use crate::error::{Error, Result};

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// One reading of host utilization
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SystemReading {
    pub cpu_percent: f32,
    pub memory_percent: f32,
    pub memory_used_bytes: u64,
}

impl SystemReading {
    pub fn memory_used_gb(&self) -> f64 {
        self.memory_used_bytes as f64 / BYTES_PER_GB
    }
}

/// Source of host CPU and memory utilization.
#[async_trait]
pub trait SystemProbe: Send + Sync {
    async fn read(&self) -> Result<SystemReading>;
}

/// [`SystemProbe`] backed by `sysinfo`.
///
/// CPU usage is the delta between two refreshes, so the first reading after
/// construction reports roughly zero.
pub struct SysinfoProbe {
    system: Arc<Mutex<System>>,
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoProbe {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        system.refresh_memory();
        Self {
            system: Arc::new(Mutex::new(system)),
        }
    }
}

#[async_trait]
impl SystemProbe for SysinfoProbe {
    async fn read(&self) -> Result<SystemReading> {
        let system = Arc::clone(&self.system);
        // refresh reads /proc synchronously
        tokio::task::spawn_blocking(move || {
            let mut system = system.lock();
            system.refresh_cpu_usage();
            system.refresh_memory();

            let total = system.total_memory();
            if total == 0 {
                return Err(Error::Probe("host memory totals unavailable".into()));
            }
            let used = system.used_memory();

            Ok(SystemReading {
                cpu_percent: system.global_cpu_usage(),
                memory_percent: (used as f64 / total as f64 * 100.0) as f32,
                memory_used_bytes: used,
            })
        })
        .await?
    }
}
