//! Telemetry sampler and request-completion accounting.
//!
//! [`PerformanceMonitor`] owns the [`MetricsStore`]. While running, a
//! background task refreshes host readings once per interval; request
//! workers report starts and completions from any number of tasks at once.
//!
//! ```text
//!   Stopped --start()--> Running --stop()--> Stopped
//! ```
//!
//! Both transitions are idempotent.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::gpu::{GpuProbe, NvidiaSmiProbe};
use super::resource::{SysinfoProbe, SystemProbe};
use super::store::{MetricsStore, PerformanceSnapshot, RESPONSE_LOG_CAPACITY};
use crate::error::Result;

/// Sampler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Period between sampling ticks
    #[serde(with = "duration_secs")]
    pub interval: Duration,
    /// Pause after a failed tick
    #[serde(with = "duration_secs")]
    pub error_backoff: Duration,
    /// Request durations kept for the average
    pub history_size: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            error_backoff: Duration::from_secs(5),
            history_size: RESPONSE_LOG_CAPACITY,
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        if !secs.is_finite() || secs <= 0.0 {
            return Err(serde::de::Error::custom("duration must be positive"));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}

/// Shared state of one sampler, cloned into the background task.
#[derive(Clone)]
struct Sampler {
    store: Arc<MetricsStore>,
    system: Arc<dyn SystemProbe>,
    gpu: Option<Arc<dyn GpuProbe>>,
    started_at: Instant,
}

impl Sampler {
    /// One tick. Probe I/O runs before the store lock is taken; all
    /// updates are then applied together.
    async fn tick(&self) -> Result<()> {
        let system = self.system.read().await;
        let gpu = match &self.gpu {
            Some(probe) => match probe.read().await {
                Ok(reading) => Some(reading),
                Err(e) => {
                    debug!("GPU reading skipped: {}", e);
                    None
                }
            },
            None => None,
        };
        let uptime = self.started_at.elapsed().as_secs_f64();

        self.store.update(|snap, log| {
            if let Ok(reading) = &system {
                snap.cpu_percent = reading.cpu_percent;
                snap.memory_percent = reading.memory_percent;
                snap.memory_used_gb = reading.memory_used_gb();
            }
            if let Some(reading) = gpu {
                snap.gpu_percent = reading.utilization_percent;
                snap.gpu_memory_used_gb = reading.memory_used_gb;
            }
            snap.uptime_s = uptime;
            if let Some(mean) = log.mean() {
                snap.avg_response_time_s = mean;
            }
            log.truncate_to_capacity();
            snap.captured_at = Utc::now();
        });

        system.map(|_| ())
    }

    async fn run(self, interval: Duration, backoff: Duration, cancel: CancellationToken) {
        info!("Starting telemetry sampler with interval: {:?}", interval);

        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.tick().await {
                warn!("Telemetry sampling failed: {}", e);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = time::sleep(backoff) => {}
                }
            }
        }

        debug!("Telemetry sampler stopped");
    }
}

struct RunningTask {
    cancel: CancellationToken,
    _handle: JoinHandle<()>,
}

/// Performance monitor: metrics store plus background sampler.
pub struct PerformanceMonitor {
    sampler: Sampler,
    config: MonitorConfig,
    task: Mutex<Option<RunningTask>>,
}

impl PerformanceMonitor {
    pub fn new(
        system: Arc<dyn SystemProbe>,
        gpu: Option<Arc<dyn GpuProbe>>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            sampler: Sampler {
                store: Arc::new(MetricsStore::with_log_capacity(config.history_size)),
                system,
                gpu,
                started_at: Instant::now(),
            },
            config,
            task: Mutex::new(None),
        }
    }

    /// Monitor using `sysinfo` and, when present, `nvidia-smi`.
    pub async fn with_host_probes(config: MonitorConfig) -> Self {
        let gpu = NvidiaSmiProbe::detect()
            .await
            .map(|p| Arc::new(p) as Arc<dyn GpuProbe>);
        Self::new(Arc::new(SysinfoProbe::new()), gpu, config)
    }

    /// Start the background sampler. Returns `false` if it was already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> bool {
        let mut task = self.task.lock();
        if task.is_some() {
            return false;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(self.sampler.clone().run(
            self.config.interval,
            self.config.error_backoff,
            cancel.clone(),
        ));
        *task = Some(RunningTask {
            cancel,
            _handle: handle,
        });
        true
    }

    /// Stop the background sampler. Returns `false` if it was not running.
    pub fn stop(&self) -> bool {
        match self.task.lock().take() {
            Some(task) => {
                task.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().is_some()
    }

    /// Run a single sampling tick now.
    pub async fn sample_now(&self) -> Result<()> {
        self.sampler.tick().await
    }

    pub fn record_request_start(&self) {
        self.sampler.store.update(|snap, _| {
            snap.active_requests += 1;
            snap.total_requests += 1;
        });
    }

    /// Record a finished request. Throughput is only updated when both the
    /// duration and the unit count are non-zero.
    pub fn record_request_end(&self, duration: Duration, units: u64) {
        let seconds = duration.as_secs_f64();
        self.sampler.store.update(|snap, log| {
            snap.active_requests = snap.active_requests.saturating_sub(1);
            log.push(seconds);
            if seconds > 0.0 && units > 0 {
                snap.tokens_per_second = units as f64 / seconds;
            }
        });
    }

    /// Consistent copy of the current metrics.
    pub fn get_metrics(&self) -> PerformanceSnapshot {
        self.sampler.store.snapshot()
    }

    pub fn store(&self) -> &Arc<MetricsStore> {
        &self.sampler.store
    }

    pub fn has_gpu_probe(&self) -> bool {
        self.sampler.gpu.is_some()
    }
}

impl Drop for PerformanceMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Wall-clock timer for one request.
pub struct PerformanceTimer {
    start: Instant,
    operation: String,
}

impl PerformanceTimer {
    pub fn new(operation: &str) -> Self {
        Self {
            start: Instant::now(),
            operation: operation.to_string(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }
}
