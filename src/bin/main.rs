//! localinfer binary.
//!
//! Answers prompts from the command line or stdin against a locally loaded
//! model, with bounded concurrency and host telemetry.

use clap::Parser;
use futures::StreamExt;
use localinfer_core::{
    backend::{self, SystemInfo},
    config::{Args, LoggingConfig, ServiceConfig},
    server::{ChatService, DispatchEvent},
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = ServiceConfig::load(&args)?;
    let _log_guard = init_logging(&config.logging);

    info!("localinfer starting up");

    if args.list_backends {
        let detected = backend::detect().await;
        for (backend, available) in detected.iter() {
            let profile = detected.profile(backend);
            println!(
                "{:<7} {:<12} gpu_layers={:<3} threads={}",
                backend,
                if available { "available" } else { "unavailable" },
                profile.gpu_layers,
                profile.thread_count
            );
        }
        println!("preferred: {}", backend::select_best(&detected));
        return Ok(());
    }

    if args.system_info {
        let info = SystemInfo::collect().await;
        println!("platform:     {}", info.platform);
        println!("architecture: {}", info.architecture);
        println!("cpu count:    {}", info.cpu_count);
        println!("memory:       {:.1} GB", info.memory_total_gb);
        println!("gpu:          {}", info.gpu_label());
        if info.gpu_memory_mb > 0 {
            println!("gpu memory:   {} MB", info.gpu_memory_mb);
        }
        return Ok(());
    }

    let service = ChatService::new(&config).await?;
    if !args.no_monitor {
        service.monitor().start();
    }

    match &args.prompt {
        Some(prompt) => answer(&service, prompt).await?,
        None => {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                let line = tokio::select! {
                    line = lines.next_line() => line?,
                    _ = tokio::signal::ctrl_c() => break,
                };
                let Some(line) = line else { break };
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }
                answer(&service, input).await?;
            }
        }
    }

    service.monitor().stop();
    let stats = service.stats();
    info!(
        "Session finished: {} turns, {} chars, {:.1} chars/s, uptime {:.0}s",
        stats.user_turns, stats.total_chars, stats.avg_chars_per_second, stats.uptime_s
    );
    Ok(())
}

/// Stream one response to stdout.
async fn answer(service: &ChatService, prompt: &str) -> anyhow::Result<()> {
    let mut stdout = tokio::io::stdout();
    let mut events = service.submit(prompt);

    while let Some(event) = events.next().await {
        match event {
            DispatchEvent::Queued => {
                stdout.write_all(b"(waiting for a free slot)\n").await?;
            }
            DispatchEvent::Fragment(text) => {
                stdout.write_all(text.as_bytes()).await?;
            }
            DispatchEvent::Error(e) => {
                warn!("Request failed: {}", e);
                stdout.write_all(format!("\nerror: {}\n", e).as_bytes()).await?;
            }
            DispatchEvent::Completed(done) => {
                let summary = format!(
                    "\n[{} chars | {:.2}s | {:.1} chars/s | {} fragments]\n",
                    done.chars,
                    done.duration.as_secs_f64(),
                    done.chars_per_second(),
                    done.fragments
                );
                stdout.write_all(summary.as_bytes()).await?;
            }
        }
        stdout.flush().await?;
    }
    Ok(())
}

/// Initialize logging. Logs go to stderr, or to daily files when a directory
/// is configured; the returned guard flushes the file writer on drop.
fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("localinfer_core={0},localinfer={0}", config.level)));

    match &config.directory {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "localinfer.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .init();
            None
        }
    }
}
