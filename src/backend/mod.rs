//! Hardware backend detection and selection.
//!
//! A model runner is configured once, at construction, for one acceleration
//! backend. This module answers three questions for that moment:
//!
//! 1. Which backends does this host offer? ([`detect`])
//! 2. What runtime parameters suit a given backend? ([`config_for`])
//! 3. Which backend should be used? ([`select_best`], [`BackendChoice::resolve`])
//!
//! Detection shells out to vendor tools under a bounded timeout. A probe that
//! fails for any reason (tool absent, timeout, non-zero exit) reports the
//! backend as unavailable; detection itself never fails.
//!
//! # Example
//!
//! ```rust,no_run
//! use localinfer_core::backend::{self, BackendChoice};
//!
//! # async fn run() -> localinfer_core::error::Result<()> {
//! let detected = backend::detect().await;
//! let choice: BackendChoice = "auto".parse()?;
//! let profile = detected.profile(choice.resolve(&detected));
//! println!("{} with {} threads", profile.backend, profile.thread_count);
//! # Ok(())
//! # }
//! ```

pub mod probe;
pub mod system_info;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

pub use self::probe::{BackendProbe, HostProbe, PROBE_TIMEOUT};
pub use self::system_info::SystemInfo;

/// Upper bound on CPU threads handed to the runner.
pub const MAX_CPU_THREADS: usize = 8;

/// Acceleration backends a runner can target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// CPU only, always available
    Cpu,
    /// NVIDIA CUDA
    Cuda,
    /// OpenCL devices
    #[serde(rename = "opencl")]
    OpenCl,
    /// Apple Metal
    Metal,
}

impl Backend {
    /// Every backend, in display order.
    pub const ALL: [Backend; 4] = [Backend::Cpu, Backend::Cuda, Backend::OpenCl, Backend::Metal];

    /// Automatic selection order; the first available entry wins.
    pub const PREFERENCE: [Backend; 4] =
        [Backend::Cuda, Backend::Metal, Backend::OpenCl, Backend::Cpu];

    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Cpu => "cpu",
            Backend::Cuda => "cuda",
            Backend::OpenCl => "opencl",
            Backend::Metal => "metal",
        }
    }

    pub fn is_gpu(&self) -> bool {
        !matches!(self, Backend::Cpu)
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(Backend::Cpu),
            "cuda" => Ok(Backend::Cuda),
            "opencl" => Ok(Backend::OpenCl),
            "metal" => Ok(Backend::Metal),
            other => Err(Error::Config(format!("unknown backend '{}'", other))),
        }
    }
}

/// Tuned runtime parameters for one backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendProfile {
    pub backend: Backend,
    pub available: bool,
    /// Transformer layers offloaded to the accelerator
    pub gpu_layers: u32,
    /// CPU threads used by the runner
    pub thread_count: usize,
}

impl BackendProfile {
    pub fn with_availability(mut self, available: bool) -> Self {
        self.available = available;
        self
    }
}

/// Tuned profile for a backend.
///
/// Only the CPU profile is reported available here; use
/// [`DetectedBackends::profile`] to combine the tuning with detection.
pub fn config_for(backend: Backend) -> BackendProfile {
    let (gpu_layers, thread_count) = match backend {
        Backend::Cpu => (0, num_cpus::get().min(MAX_CPU_THREADS)),
        Backend::Cuda => (32, 1),
        Backend::OpenCl => (16, 2),
        Backend::Metal => (32, 1),
    };
    BackendProfile {
        backend,
        available: backend == Backend::Cpu,
        gpu_layers,
        thread_count,
    }
}

/// Lookup by name; unknown names get the CPU profile.
pub fn config_for_name(name: &str) -> BackendProfile {
    match name.parse::<Backend>() {
        Ok(backend) => config_for(backend),
        Err(_) => {
            debug!("Unknown backend '{}', using cpu profile", name);
            config_for(Backend::Cpu)
        }
    }
}

/// Availability of each backend on this host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedBackends {
    available: BTreeMap<Backend, bool>,
}

impl Default for DetectedBackends {
    fn default() -> Self {
        Self::cpu_only()
    }
}

impl DetectedBackends {
    /// CPU available, every accelerator unavailable.
    pub fn cpu_only() -> Self {
        let available = Backend::ALL
            .iter()
            .map(|b| (*b, *b == Backend::Cpu))
            .collect();
        Self { available }
    }

    pub fn with(mut self, backend: Backend, available: bool) -> Self {
        self.available.insert(backend, available);
        self
    }

    pub fn is_available(&self, backend: Backend) -> bool {
        self.available.get(&backend).copied().unwrap_or(false)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Backend, bool)> + '_ {
        self.available.iter().map(|(b, a)| (*b, *a))
    }

    /// Backends reported available, in display order.
    pub fn available(&self) -> Vec<Backend> {
        self.iter().filter(|(_, a)| *a).map(|(b, _)| b).collect()
    }

    /// Tuned profile for `backend` with the detected availability.
    pub fn profile(&self, backend: Backend) -> BackendProfile {
        config_for(backend).with_availability(self.is_available(backend))
    }
}

/// Pick the preferred available backend: cuda, then metal, then opencl, then cpu.
pub fn select_best(detected: &DetectedBackends) -> Backend {
    Backend::PREFERENCE
        .iter()
        .copied()
        .find(|b| detected.is_available(*b))
        .unwrap_or(Backend::Cpu)
}

/// Probe every backend with the host probe.
pub async fn detect() -> DetectedBackends {
    detect_with(&HostProbe::default()).await
}

/// Probe every backend with `probe`. CPU is always available.
pub async fn detect_with(probe: &dyn BackendProbe) -> DetectedBackends {
    let mut detected = DetectedBackends::cpu_only();
    for backend in Backend::ALL.iter().copied().filter(Backend::is_gpu) {
        let available = probe.probe(backend).await;
        debug!("Backend {} available: {}", backend, available);
        detected = detected.with(backend, available);
    }
    detected
}

/// Backend requested by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendChoice {
    #[default]
    Auto,
    Explicit(Backend),
}

impl FromStr for BackendChoice {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.trim().eq_ignore_ascii_case("auto") {
            Ok(BackendChoice::Auto)
        } else {
            s.parse().map(BackendChoice::Explicit)
        }
    }
}

impl fmt::Display for BackendChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendChoice::Auto => f.write_str("auto"),
            BackendChoice::Explicit(b) => b.fmt(f),
        }
    }
}

impl BackendChoice {
    /// Resolve against detection. An explicit backend that is not available
    /// falls back to cpu.
    pub fn resolve(&self, detected: &DetectedBackends) -> Backend {
        let backend = match self {
            BackendChoice::Auto => select_best(detected),
            BackendChoice::Explicit(b) if detected.is_available(*b) => *b,
            BackendChoice::Explicit(b) => {
                warn!("Requested backend {} is not available, falling back to cpu", b);
                Backend::Cpu
            }
        };
        info!("Selected backend: {}", backend);
        backend
    }
}
