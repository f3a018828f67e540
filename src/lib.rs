//! Local inference control plane.
//!
//! Admission control, telemetry and backend selection around an external
//! model runner.

pub mod backend;
pub mod config;
pub mod error;
pub mod metrics;
pub mod runtime;
pub mod server;
pub mod session;

// Re-export commonly used types
pub use backend::{Backend, BackendChoice, BackendProfile, DetectedBackends};
pub use config::{Args, ServiceConfig};
pub use error::{Error, Result};
pub use metrics::{PerformanceMonitor, PerformanceSnapshot};
pub use runtime::{GenerationParams, LoadOptions, ModelRunner};
pub use server::{ChatService, DispatchEvent, Dispatcher, DispatcherState};
pub use session::{ConversationTurn, Session};
