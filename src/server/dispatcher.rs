//! Request dispatcher: admission control in front of the runner pool.
//!
//! Each submission becomes a stream of [`DispatchEvent`]s:
//!
//! ```text
//!   [Queued] Fragment* (Completed | Error)
//! ```
//!
//! `Queued` appears at most once, and only when no slot was free at
//! submission. The slot and the in-flight counter are owned by guards living
//! inside the stream, so every exit path (completion, runner error, the
//! caller dropping the stream) releases them.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::runner_pool::RunnerPool;
use crate::error::{Error, Result};
use crate::metrics::{PerformanceMonitor, PerformanceTimer};
use crate::runtime::GenerationParams;
use crate::session::{PromptTemplate, Session};

/// Events observed by one submission.
#[derive(Debug)]
pub enum DispatchEvent {
    /// No slot was free; the request is waiting for admission
    Queued,
    /// A piece of generated text
    Fragment(String),
    /// Terminal: generation failed
    Error(Error),
    /// Terminal: generation finished normally
    Completed(Completion),
}

impl DispatchEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DispatchEvent::Error(_) | DispatchEvent::Completed(_))
    }
}

pub type DispatchStream = Pin<Box<dyn Stream<Item = DispatchEvent> + Send + 'static>>;

/// Summary of a finished generation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Completion {
    pub response: String,
    pub fragments: u64,
    pub chars: usize,
    pub duration: Duration,
}

impl Completion {
    pub fn chars_per_second(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.chars as f64 / secs
        } else {
            0.0
        }
    }
}

/// Point-in-time admission state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DispatcherState {
    pub concurrency_limit: usize,
    pub active_count: usize,
}

/// Running totals over successful generations
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct GenerationTotals {
    pub completed: u64,
    pub chars: u64,
    pub seconds: f64,
}

impl GenerationTotals {
    pub fn chars_per_second(&self) -> f64 {
        if self.seconds > 0.0 {
            self.chars as f64 / self.seconds
        } else {
            0.0
        }
    }
}

/// Records a zero-duration completion if the request ends without one.
struct CompletionGuard {
    monitor: Arc<PerformanceMonitor>,
    armed: bool,
}

impl CompletionGuard {
    fn start(monitor: Arc<PerformanceMonitor>) -> Self {
        monitor.record_request_start();
        Self {
            monitor,
            armed: true,
        }
    }

    fn finish(mut self, duration: Duration, units: u64) {
        self.armed = false;
        self.monitor.record_request_end(duration, units);
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if self.armed {
            self.monitor.record_request_end(Duration::ZERO, 0);
        }
    }
}

/// Bounded front door to the runner pool.
#[derive(Clone)]
pub struct Dispatcher {
    pool: Arc<RunnerPool>,
    monitor: Arc<PerformanceMonitor>,
    template: Arc<PromptTemplate>,
    params: Arc<GenerationParams>,
    totals: Arc<Mutex<GenerationTotals>>,
}

impl Dispatcher {
    pub fn new(
        pool: RunnerPool,
        monitor: Arc<PerformanceMonitor>,
        template: PromptTemplate,
        params: GenerationParams,
    ) -> Self {
        info!("Dispatcher ready with concurrency limit {}", pool.limit());
        Self {
            pool: Arc::new(pool),
            monitor,
            template: Arc::new(template),
            params: Arc::new(params),
            totals: Arc::new(Mutex::new(GenerationTotals::default())),
        }
    }

    /// Submit `input` against `session`.
    ///
    /// Nothing happens until the stream is polled. Dropping the stream at any
    /// point releases whatever it holds.
    pub fn submit(&self, session: &Session, input: impl Into<String>) -> DispatchStream {
        let this = self.clone();
        let session = session.clone();
        let input = input.into();

        Box::pin(async_stream::stream! {
            let slot = match this.pool.try_acquire() {
                Some(slot) => slot,
                None => {
                    debug!("All {} slots busy, request queued", this.pool.limit());
                    yield DispatchEvent::Queued;
                    match this.pool.acquire().await {
                        Ok(slot) => slot,
                        Err(e) => {
                            yield DispatchEvent::Error(e);
                            return;
                        }
                    }
                }
            };

            let history = session.begin_turn(&input);
            let prompt = this.template.build(&history, &input);
            let completion = CompletionGuard::start(Arc::clone(&this.monitor));
            let timer = PerformanceTimer::new("generate");

            let mut fragments = slot.runner().generate(&prompt, &this.params);
            let mut response = String::new();
            let mut count = 0u64;
            let mut failure = None;

            while let Some(item) = fragments.next().await {
                match item {
                    Ok(fragment) => {
                        count += 1;
                        response.push_str(&fragment);
                        yield DispatchEvent::Fragment(fragment);
                    }
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }
            drop(fragments);

            match failure {
                Some(e) => {
                    warn!("Generation failed after {} fragments: {:#}", count, e);
                    completion.finish(Duration::ZERO, 0);
                    drop(slot);
                    yield DispatchEvent::Error(Error::Generation(format!("{:#}", e)));
                }
                None => {
                    let duration = timer.elapsed();
                    completion.finish(duration, count);
                    drop(slot);
                    session.record_reply(&response);
                    debug!(
                        "{} finished: {} fragments in {:.2}s",
                        timer.operation(),
                        count,
                        duration.as_secs_f64()
                    );
                    let chars = response.chars().count();
                    {
                        let mut totals = this.totals.lock();
                        totals.completed += 1;
                        totals.chars += chars as u64;
                        totals.seconds += duration.as_secs_f64();
                    }
                    yield DispatchEvent::Completed(Completion {
                        response,
                        fragments: count,
                        chars,
                        duration,
                    });
                }
            }
        })
    }

    /// Submit and collect the whole response on a background task.
    pub fn spawn(&self, session: &Session, input: impl Into<String>) -> JoinHandle<Result<Completion>> {
        let mut events = self.submit(session, input);
        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                match event {
                    DispatchEvent::Completed(done) => return Ok(done),
                    DispatchEvent::Error(e) => return Err(e),
                    DispatchEvent::Queued | DispatchEvent::Fragment(_) => {}
                }
            }
            Err(Error::Internal("dispatch stream ended without a result".to_string()))
        })
    }

    pub fn state(&self) -> DispatcherState {
        DispatcherState {
            concurrency_limit: self.pool.limit(),
            active_count: self.pool.active(),
        }
    }

    pub fn totals(&self) -> GenerationTotals {
        *self.totals.lock()
    }

    pub fn monitor(&self) -> &Arc<PerformanceMonitor> {
        &self.monitor
    }

    pub fn params(&self) -> &GenerationParams {
        &self.params
    }
}
