//! Performance telemetry.
//!
//! - [`store`]: the latest [`PerformanceSnapshot`] and the response-time log
//! - [`performance`]: the [`PerformanceMonitor`] sampler and request accounting
//! - [`resource`]: host CPU/memory probes
//! - [`gpu`]: optional GPU probes

pub mod gpu;
pub mod performance;
pub mod resource;
pub mod store;

pub use self::gpu::{GpuProbe, GpuReading, NvidiaSmiProbe};
pub use self::performance::{MonitorConfig, PerformanceMonitor, PerformanceTimer};
pub use self::resource::{SysinfoProbe, SystemProbe, SystemReading};
pub use self::store::{MetricsStore, PerformanceSnapshot, ResponseTimeLog, RESPONSE_LOG_CAPACITY};
