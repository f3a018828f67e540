//! Configuration management for the localinfer service.
//!
//! This module provides configuration handling through multiple sources:
//! 1. Default configuration (embedded in binary)
//! 2. System-wide configuration file (`/etc/localinfer/config.toml`)
//! 3. User-specified configuration file
//! 4. Environment variables (prefixed with `LOCALINFER_`, nested keys
//!    separated by `__`, e.g. `LOCALINFER_DISPATCHER__CONCURRENCY_LIMIT=2`)
//! 5. Command-line arguments
//!
//! Configuration options are loaded in order of precedence, with later sources
//! overriding earlier ones.

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::backend::{BackendChoice, MAX_CPU_THREADS};
use crate::error::{Error, Result};
use crate::metrics::{MonitorConfig, RESPONSE_LOG_CAPACITY};
use crate::runtime::{GenerationParams, ProcessRunnerConfig};
use crate::server::runner_pool::MAX_CONCURRENCY;
use crate::session::PromptTemplate;

/// Command-line arguments
#[derive(Debug, Default, Parser)]
#[clap(version, about)]
pub struct Args {
    /// Configuration file path
    #[clap(short, long)]
    pub config: Option<PathBuf>,

    /// Model weight file
    #[clap(short, long)]
    pub model: Option<PathBuf>,

    /// Backend (auto, cpu, cuda, opencl, metal)
    #[clap(short, long)]
    pub backend: Option<String>,

    /// CPU threads, 0 picks automatically
    #[clap(short, long)]
    pub threads: Option<usize>,

    /// Sampling temperature
    #[clap(long)]
    pub temperature: Option<f32>,

    /// Maximum tokens per response
    #[clap(long)]
    pub max_tokens: Option<usize>,

    /// Simultaneous generations (1-8)
    #[clap(long)]
    pub concurrency: Option<usize>,

    /// Engine binary used by the process runner
    #[clap(long)]
    pub engine: Option<PathBuf>,

    /// Answer one prompt and exit
    #[clap(short, long)]
    pub prompt: Option<String>,

    /// Print detected backends and exit
    #[clap(long)]
    pub list_backends: bool,

    /// Print host information and exit
    #[clap(long)]
    pub system_info: bool,

    /// Do not run the telemetry sampler
    #[clap(long)]
    pub no_monitor: bool,

    /// Enable debug logging
    #[clap(short, long)]
    pub verbose: bool,
}

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Model file and load options
    pub model: ModelConfig,
    /// Requested backend, `auto` or a backend name
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Sampling defaults
    #[serde(default)]
    pub generation: GenerationParams,
    /// Prompt construction
    #[serde(default)]
    pub prompt: PromptTemplate,
    /// Admission control
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    /// Telemetry sampler
    #[serde(default)]
    pub monitor: MonitorConfig,
    /// Engine process
    #[serde(default)]
    pub runner: ProcessRunnerConfig,
    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Weight file
    pub path: PathBuf,
    /// Context window in tokens
    #[serde(default = "default_context_length")]
    pub context_length: usize,
    /// CPU threads; 0 uses the backend profile
    #[serde(default)]
    pub threads: usize,
}

/// Dispatcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Maximum simultaneous generations
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,
    /// Share one runner across all slots instead of loading one per slot
    #[serde(default = "default_shared_runner")]
    pub shared_runner: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: default_concurrency_limit(),
            shared_runner: default_shared_runner(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Write daily rolling log files here instead of stderr
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: None,
        }
    }
}

impl ServiceConfig {
    /// Load configuration from all sources
    pub fn load(args: &Args) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            .add_source(config::File::with_name("/etc/localinfer/config.toml").required(false));

        // Load user config if specified
        if let Some(path) = &args.config {
            builder = builder.add_source(config::File::from(path.as_path()));
        }

        // Add environment variables
        builder = builder.add_source(config::Environment::with_prefix("LOCALINFER").separator("__"));

        let mut config: ServiceConfig = builder.build()?.try_deserialize()?;
        config.apply_args(args);
        config.validate()?;
        Ok(config)
    }

    /// Override with command line args
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(model) = &args.model {
            self.model.path = model.clone();
        }
        if let Some(backend) = &args.backend {
            self.backend = backend.clone();
        }
        if let Some(threads) = args.threads {
            self.model.threads = threads;
        }
        if let Some(temperature) = args.temperature {
            self.generation.temperature = temperature;
        }
        if let Some(max_tokens) = args.max_tokens {
            self.generation.max_tokens = max_tokens;
        }
        if let Some(limit) = args.concurrency {
            self.dispatcher.concurrency_limit = limit;
        }
        if let Some(engine) = &args.engine {
            self.runner.binary = engine.clone();
        }
        if args.verbose {
            self.logging.level = "debug".to_string();
        }
    }

    pub fn validate(&self) -> Result<()> {
        let limit = self.dispatcher.concurrency_limit;
        if !(1..=MAX_CONCURRENCY).contains(&limit) {
            return Err(Error::Config(format!(
                "concurrency limit must be between 1 and {}, got {}",
                MAX_CONCURRENCY, limit
            )));
        }
        let temperature = self.generation.temperature;
        if !(temperature > 0.0 && temperature <= 2.0) {
            return Err(Error::Config(format!(
                "temperature must be in (0, 2], got {}",
                temperature
            )));
        }
        let top_p = self.generation.top_p;
        if !(top_p > 0.0 && top_p <= 1.0) {
            return Err(Error::Config(format!("top_p must be in (0, 1], got {}", top_p)));
        }
        if self.generation.max_tokens == 0 {
            return Err(Error::Config("max_tokens must be positive".to_string()));
        }
        if self.model.context_length == 0 {
            return Err(Error::Config("context_length must be positive".to_string()));
        }
        let history = self.monitor.history_size;
        if !(1..=RESPONSE_LOG_CAPACITY).contains(&history) {
            return Err(Error::Config(format!(
                "monitor history_size must be between 1 and {}, got {}",
                RESPONSE_LOG_CAPACITY, history
            )));
        }
        self.backend_choice()?;
        Ok(())
    }

    pub fn backend_choice(&self) -> Result<BackendChoice> {
        self.backend.parse()
    }

    /// Thread override, if any. Capped like the cpu profile.
    pub fn thread_override(&self) -> Option<usize> {
        match self.model.threads {
            0 => None,
            n => Some(n.min(MAX_CPU_THREADS)),
        }
    }
}

fn default_backend() -> String {
    "auto".to_string()
}

fn default_context_length() -> usize {
    2048
}

fn default_concurrency_limit() -> usize {
    1
}

fn default_shared_runner() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}
