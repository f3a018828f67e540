//! Request handling: admission control, runner pooling and service wiring.

pub mod dispatcher;
pub mod runner_pool;
pub mod state;

pub use dispatcher::{Completion, DispatchEvent, DispatchStream, Dispatcher, DispatcherState, GenerationTotals};
pub use runner_pool::{RunnerGuard, RunnerPool, RunnerPoolStats, MAX_CONCURRENCY};
pub use state::{ChatService, ChatStats};
