//! Runner that drives an external llama.cpp-style command line binary.
//!
//! Each generation spawns one child process with the prompt and sampling
//! parameters as arguments and streams its stdout. The child is killed when
//! the fragment stream is dropped, so abandoning a generation frees the
//! engine immediately. Separate generations use separate processes, which
//! makes one `ProcessRunner` safe to share across slots.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, info};

use super::streaming::{Filtered, StopSequenceFilter, Utf8ChunkDecoder};
use super::{FragmentStream, GenerationParams, LoadOptions, ModelInfo, ModelRunner};

const READ_CHUNK: usize = 256;

/// How to invoke the engine binary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessRunnerConfig {
    /// Engine executable, resolved through `PATH` when relative
    pub binary: PathBuf,
    /// Extra arguments appended before the prompt
    pub extra_args: Vec<String>,
}

impl Default for ProcessRunnerConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("llama-cli"),
            extra_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
struct LoadedModel {
    path: PathBuf,
    options: LoadOptions,
}

/// [`ModelRunner`] over an external engine process.
pub struct ProcessRunner {
    config: ProcessRunnerConfig,
    model: Option<LoadedModel>,
}

impl ProcessRunner {
    pub fn new(config: ProcessRunnerConfig) -> Self {
        Self {
            config,
            model: None,
        }
    }

    /// Command line for one generation.
    pub fn build_args(&self, prompt: &str, params: &GenerationParams) -> Result<Vec<String>> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| anyhow!("model not loaded"))?;

        let mut args = vec![
            "-m".to_string(),
            model.path.display().to_string(),
            "-t".to_string(),
            model.options.thread_count.to_string(),
            "-ngl".to_string(),
            model.options.gpu_layers.to_string(),
            "-c".to_string(),
            model.options.context_length.to_string(),
            "-n".to_string(),
            params.max_tokens.to_string(),
            "--temp".to_string(),
            params.temperature.to_string(),
            "--top-p".to_string(),
            params.top_p.to_string(),
            "--repeat-penalty".to_string(),
            params.repeat_penalty.to_string(),
            "--no-display-prompt".to_string(),
        ];
        args.extend(self.config.extra_args.iter().cloned());
        args.push("-p".to_string());
        args.push(prompt.to_string());
        Ok(args)
    }
}

#[async_trait]
impl ModelRunner for ProcessRunner {
    async fn load(&mut self, path: &Path, options: &LoadOptions) -> Result<()> {
        let metadata = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("model file not found: {}", path.display()))?;
        if !metadata.is_file() {
            bail!("model path is not a file: {}", path.display());
        }
        // Surface an unreadable file now rather than on the first request.
        tokio::fs::File::open(path)
            .await
            .with_context(|| format!("model file not readable: {}", path.display()))?;

        info!(
            "Loading model {} ({} threads, {} gpu layers)",
            path.display(),
            options.thread_count,
            options.gpu_layers
        );
        self.model = Some(LoadedModel {
            path: path.to_path_buf(),
            options: *options,
        });
        Ok(())
    }

    fn generate(&self, prompt: &str, params: &GenerationParams) -> FragmentStream {
        let args = self.build_args(prompt, params);
        let binary = self.config.binary.clone();
        let stops = params.stop_sequences.clone();

        Box::pin(async_stream::try_stream! {
            let args = args?;
            debug!("Spawning {} with {} args", binary.display(), args.len());

            let mut child = Command::new(&binary)
                .args(&args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .spawn()
                .with_context(|| format!("failed to start {}", binary.display()))?;
            let mut stdout = child
                .stdout
                .take()
                .ok_or_else(|| anyhow!("engine stdout unavailable"))?;

            let mut decoder = Utf8ChunkDecoder::new();
            let mut filter = StopSequenceFilter::new(&stops);
            let mut buf = [0u8; READ_CHUNK];

            loop {
                let n = stdout
                    .read(&mut buf)
                    .await
                    .context("failed to read engine output")?;
                let text = if n == 0 { decoder.finish() } else { decoder.push(&buf[..n]) };

                match filter.push(&text) {
                    Filtered::Continue(out) => {
                        if !out.is_empty() {
                            yield out;
                        }
                    }
                    Filtered::Stop(out) => {
                        if !out.is_empty() {
                            yield out;
                        }
                        break;
                    }
                }

                if n == 0 {
                    let rest = filter.finish();
                    if !rest.is_empty() {
                        yield rest;
                    }
                    let status = child.wait().await.context("failed to wait for engine")?;
                    if !status.success() {
                        Err::<(), _>(anyhow!("engine exited with {}", status))?;
                    }
                    break;
                }
            }
        })
    }

    fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    fn model_info(&self) -> ModelInfo {
        match &self.model {
            Some(model) => ModelInfo {
                name: model
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| model.path.display().to_string()),
                path: Some(model.path.clone()),
                context_length: model.options.context_length,
            },
            None => ModelInfo::unloaded(),
        }
    }
}
