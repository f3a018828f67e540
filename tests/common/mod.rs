//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use localinfer_core::error::Result;
use localinfer_core::metrics::{MonitorConfig, PerformanceMonitor, SystemProbe, SystemReading};
use localinfer_core::runtime::{FragmentStream, GenerationParams, LoadOptions, ModelInfo, ModelRunner};
use localinfer_core::server::{Dispatcher, RunnerPool};
use localinfer_core::session::PromptTemplate;
use parking_lot::Mutex;

/// Counters shared between a [`SlowRunner`] and the test observing it.
#[derive(Default)]
pub struct RunnerStats {
    pub in_flight: AtomicUsize,
    pub peak: AtomicUsize,
    pub started: AtomicUsize,
    pub loads: AtomicUsize,
    pub prompts: Mutex<Vec<String>>,
}

impl RunnerStats {
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

/// Marks one generation as in flight for as long as it lives.
struct InFlight(Arc<RunnerStats>);

impl InFlight {
    fn enter(stats: Arc<RunnerStats>) -> Self {
        let now = stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        stats.peak.fetch_max(now, Ordering::SeqCst);
        Self(stats)
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Runner that sleeps before every fragment.
#[derive(Clone)]
pub struct SlowRunner {
    delay: Duration,
    fragments: usize,
    fail_first: bool,
    always_fail: bool,
    stats: Arc<RunnerStats>,
}

impl SlowRunner {
    pub fn new(delay: Duration, fragments: usize) -> Self {
        Self {
            delay,
            fragments,
            fail_first: false,
            always_fail: false,
            stats: Arc::new(RunnerStats::default()),
        }
    }

    /// First generation fails after its fragments, later ones succeed.
    pub fn failing_first(mut self) -> Self {
        self.fail_first = true;
        self
    }

    pub fn always_failing(mut self) -> Self {
        self.always_fail = true;
        self
    }

    pub fn stats(&self) -> Arc<RunnerStats> {
        Arc::clone(&self.stats)
    }
}

#[async_trait]
impl ModelRunner for SlowRunner {
    async fn load(&mut self, _path: &Path, _options: &LoadOptions) -> anyhow::Result<()> {
        self.stats.loads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn generate(&self, prompt: &str, _params: &GenerationParams) -> FragmentStream {
        let call = self.stats.started.fetch_add(1, Ordering::SeqCst);
        self.stats.prompts.lock().push(prompt.to_string());

        let stats = Arc::clone(&self.stats);
        let fail = self.always_fail || (self.fail_first && call == 0);
        let delay = self.delay;
        let fragments = self.fragments;

        Box::pin(async_stream::try_stream! {
            let _in_flight = InFlight::enter(stats);
            for i in 0..fragments {
                tokio::time::sleep(delay).await;
                yield format!("tok{} ", i);
            }
            if fail {
                Err::<(), _>(anyhow::anyhow!("runner failure"))?;
            }
        })
    }

    fn is_loaded(&self) -> bool {
        true
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            name: "slow-runner".to_string(),
            path: None,
            context_length: 2048,
        }
    }
}

/// System probe with fixed readings.
pub struct StaticProbe;

#[async_trait]
impl SystemProbe for StaticProbe {
    async fn read(&self) -> Result<SystemReading> {
        Ok(SystemReading {
            cpu_percent: 10.0,
            memory_percent: 20.0,
            memory_used_bytes: 1024 * 1024 * 1024,
        })
    }
}

pub fn monitor() -> Arc<PerformanceMonitor> {
    Arc::new(PerformanceMonitor::new(
        Arc::new(StaticProbe),
        None,
        MonitorConfig::default(),
    ))
}

/// Dispatcher over one shared runner.
pub fn dispatcher(runner: SlowRunner, limit: usize) -> Dispatcher {
    Dispatcher::new(
        RunnerPool::shared(Arc::new(runner), limit).unwrap(),
        monitor(),
        PromptTemplate::default(),
        GenerationParams::default(),
    )
}
