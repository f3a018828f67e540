//! Model runner abstraction.
//!
//! The native inference engine is an external collaborator. The control plane
//! only needs two capabilities from it: load weights once, then turn a prompt
//! into a finite, lazily produced sequence of text fragments.

use std::path::{Path, PathBuf};
use std::pin::Pin;

use anyhow::Result;
use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::backend::BackendProfile;

pub mod process_runner;
pub mod streaming;

pub use process_runner::{ProcessRunner, ProcessRunnerConfig};
pub use streaming::{Filtered, StopSequenceFilter, Utf8ChunkDecoder};

/// Fragments of one generation, in emission order. Finite and not restartable.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String>> + Send + 'static>>;

/// Inference engine consumed by the dispatcher.
///
/// A runner is not assumed to be reentrant: the dispatcher never drives a
/// single handle from two generations at once unless it was explicitly
/// registered as shared.
#[async_trait]
pub trait ModelRunner: Send + Sync + 'static {
    /// Load weights from `path`
    async fn load(&mut self, path: &Path, options: &LoadOptions) -> Result<()>;

    /// Start generating from `prompt`
    fn generate(&self, prompt: &str, params: &GenerationParams) -> FragmentStream;

    fn is_loaded(&self) -> bool;

    fn model_info(&self) -> ModelInfo;
}

/// Parameters fixed at load time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadOptions {
    pub thread_count: usize,
    pub gpu_layers: u32,
    pub context_length: usize,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            thread_count: 1,
            gpu_layers: 0,
            context_length: 2048,
        }
    }
}

impl LoadOptions {
    pub fn from_profile(profile: &BackendProfile, context_length: usize) -> Self {
        Self {
            thread_count: profile.thread_count,
            gpu_layers: profile.gpu_layers,
            context_length,
        }
    }
}

/// Sampling parameters for one generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: usize,
    pub stop_sequences: Vec<String>,
    pub repeat_penalty: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.9,
            max_tokens: 512,
            stop_sequences: vec![
                "<|im_end|>".to_string(),
                "<|im_start|>".to_string(),
            ],
            repeat_penalty: 1.1,
        }
    }
}

/// Model information structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub path: Option<PathBuf>,
    pub context_length: usize,
}

impl ModelInfo {
    pub fn unloaded() -> Self {
        Self {
            name: "unloaded".to_string(),
            path: None,
            context_length: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{config_for, Backend};

    #[test]
    fn test_load_options_from_profile() {
        let options = LoadOptions::from_profile(&config_for(Backend::Cuda), 4096);
        assert_eq!(options.gpu_layers, 32);
        assert_eq!(options.thread_count, 1);
        assert_eq!(options.context_length, 4096);
    }

    #[test]
    fn test_generation_params_partial_deserialize() {
        let params: GenerationParams =
            serde_json::from_str(r#"{"temperature": 0.2, "max_tokens": 64}"#).unwrap();
        assert_eq!(params.temperature, 0.2);
        assert_eq!(params.max_tokens, 64);
        assert_eq!(params.top_p, 0.9);
        assert_eq!(params.stop_sequences.len(), 2);
    }
}
