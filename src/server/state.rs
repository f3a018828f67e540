//! Chat service state

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::info;

use super::dispatcher::{DispatchStream, Dispatcher, DispatcherState};
use super::runner_pool::RunnerPool;
use crate::backend::{self, Backend, BackendProfile, DetectedBackends};
use crate::config::ServiceConfig;
use crate::error::{Error, Result};
use crate::metrics::{PerformanceMonitor, PerformanceSnapshot};
use crate::runtime::{LoadOptions, ModelInfo, ModelRunner, ProcessRunner};
use crate::session::Session;

/// Shared chat service
#[derive(Clone)]
pub struct ChatService {
    /// Admission control and generation
    dispatcher: Dispatcher,

    /// Conversation used by [`ChatService::submit`]
    session: Session,

    /// Profile the runners were loaded with
    profile: BackendProfile,

    /// Detection result at startup
    detected: Arc<DetectedBackends>,

    /// Loaded model
    model: Arc<ModelInfo>,

    started_at: Instant,
}

impl ChatService {
    /// Detect backends, load the configured model and start admission.
    pub async fn new(config: &ServiceConfig) -> Result<Self> {
        let detected = backend::detect().await;
        let monitor = Arc::new(PerformanceMonitor::with_host_probes(config.monitor.clone()).await);
        Self::with_factory(config, detected, monitor, |_| {
            Box::new(ProcessRunner::new(config.runner.clone())) as Box<dyn ModelRunner>
        })
        .await
    }

    /// Build with a custom runner factory, called once per runner to load.
    pub async fn with_factory<F>(
        config: &ServiceConfig,
        detected: DetectedBackends,
        monitor: Arc<PerformanceMonitor>,
        factory: F,
    ) -> Result<Self>
    where
        F: Fn(Backend) -> Box<dyn ModelRunner>,
    {
        config.validate()?;
        let backend = config.backend_choice()?.resolve(&detected);
        let mut profile = detected.profile(backend);
        if let Some(threads) = config.thread_override() {
            profile.thread_count = threads;
        }
        let options = LoadOptions::from_profile(&profile, config.model.context_length);

        let limit = config.dispatcher.concurrency_limit;
        let runner_count = if config.dispatcher.shared_runner { 1 } else { limit };

        let mut runners: Vec<Arc<dyn ModelRunner>> = Vec::with_capacity(runner_count);
        for _ in 0..runner_count {
            let mut runner = factory(backend);
            runner
                .load(&config.model.path, &options)
                .await
                .map_err(|e| Error::ResourceUnavailable(format!("{:#}", e)))?;
            runners.push(Arc::from(runner));
        }
        let model = runners
            .first()
            .map(|r| r.model_info())
            .unwrap_or_else(ModelInfo::unloaded);

        let pool = if config.dispatcher.shared_runner {
            let runner = runners
                .pop()
                .ok_or_else(|| Error::Internal("no runner loaded".to_string()))?;
            RunnerPool::shared(runner, limit)?
        } else {
            RunnerPool::pooled(runners)?
        };

        info!(
            "Chat service ready: model {} on {} ({} slots)",
            model.name, backend, limit
        );

        Ok(Self {
            dispatcher: Dispatcher::new(
                pool,
                monitor,
                config.prompt.clone(),
                config.generation.clone(),
            ),
            session: Session::new(),
            profile,
            detected: Arc::new(detected),
            model: Arc::new(model),
            started_at: Instant::now(),
        })
    }

    /// Submit against the default session.
    pub fn submit(&self, input: impl Into<String>) -> DispatchStream {
        self.dispatcher.submit(&self.session, input)
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn monitor(&self) -> &Arc<PerformanceMonitor> {
        self.dispatcher.monitor()
    }

    pub fn clear_history(&self) {
        self.session.clear();
        info!("Chat history cleared");
    }

    pub fn profile(&self) -> &BackendProfile {
        &self.profile
    }

    pub fn state(&self) -> DispatcherState {
        self.dispatcher.state()
    }

    pub fn metrics(&self) -> PerformanceSnapshot {
        self.monitor().get_metrics()
    }

    /// Get service statistics
    pub fn stats(&self) -> ChatStats {
        let (user_turns, _) = self.session.turn_counts();
        let totals = self.dispatcher.totals();

        ChatStats {
            uptime_s: self.started_at.elapsed().as_secs_f64(),
            user_turns,
            total_chars: totals.chars,
            avg_chars_per_second: totals.chars_per_second(),
            model_file: self.model.path.clone(),
            backend: self.profile.backend,
            available_backends: self.detected.available(),
            dispatcher: self.state(),
            total_requests: self.metrics().total_requests,
        }
    }
}

/// Service statistics
#[derive(Debug, Clone, Serialize)]
pub struct ChatStats {
    pub uptime_s: f64,
    pub user_turns: usize,
    pub total_chars: u64,
    pub avg_chars_per_second: f64,
    pub model_file: Option<PathBuf>,
    pub backend: Backend,
    pub available_backends: Vec<Backend>,
    pub dispatcher: DispatcherState,
    pub total_requests: u64,
}
