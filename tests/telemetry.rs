mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use localinfer_core::error::{Error, Result};
use localinfer_core::metrics::{
    MonitorConfig, PerformanceMonitor, SystemProbe, SystemReading, RESPONSE_LOG_CAPACITY,
};

/// Every reading reports the same value for cpu and memory, so a torn
/// snapshot shows up as a mismatch.
struct CountingProbe {
    calls: AtomicU32,
}

#[async_trait]
impl SystemProbe for CountingProbe {
    async fn read(&self) -> Result<SystemReading> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) as f32;
        tokio::task::yield_now().await;
        Ok(SystemReading {
            cpu_percent: n,
            memory_percent: n,
            memory_used_bytes: n as u64,
        })
    }
}

/// Fails every other call.
struct FlakyProbe {
    calls: AtomicU32,
}

#[async_trait]
impl SystemProbe for FlakyProbe {
    async fn read(&self) -> Result<SystemReading> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n % 2 == 0 {
            Err(Error::Probe("sensor offline".into()))
        } else {
            Ok(SystemReading {
                cpu_percent: 42.0,
                memory_percent: 10.0,
                memory_used_bytes: 0,
            })
        }
    }
}

fn fast_config() -> MonitorConfig {
    MonitorConfig {
        interval: Duration::from_millis(5),
        error_backoff: Duration::from_millis(10),
        history_size: RESPONSE_LOG_CAPACITY,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_snapshot_consistent_under_concurrent_ticks() {
    let monitor = Arc::new(PerformanceMonitor::new(
        Arc::new(CountingProbe {
            calls: AtomicU32::new(0),
        }),
        None,
        fast_config(),
    ));
    monitor.start();

    let tickers: Vec<_> = (0..4)
        .map(|_| {
            let monitor = Arc::clone(&monitor);
            tokio::spawn(async move {
                for _ in 0..50 {
                    monitor.sample_now().await.unwrap();
                }
            })
        })
        .collect();
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let monitor = Arc::clone(&monitor);
            tokio::spawn(async move {
                for _ in 0..500 {
                    let m = monitor.get_metrics();
                    assert_eq!(m.cpu_percent, m.memory_percent);
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    for handle in tickers.into_iter().chain(readers) {
        handle.await.unwrap();
    }
    assert!(monitor.stop());
}

#[tokio::test]
async fn test_log_bounded_and_average_of_retained_entries() {
    let monitor = common::monitor();
    for i in 0..250u32 {
        monitor.record_request_start();
        monitor.record_request_end(Duration::from_millis(u64::from(i)), 1);
    }
    monitor.sample_now().await.unwrap();

    let times = monitor.store().response_times();
    assert_eq!(times.len(), RESPONSE_LOG_CAPACITY);
    // entries 150..250 ms are retained
    let expected = (150..250).map(|ms| ms as f64 / 1000.0).sum::<f64>() / 100.0;
    let avg = monitor.get_metrics().avg_response_time_s;
    assert!((avg - expected).abs() < 1e-9, "avg {} expected {}", avg, expected);
    assert_eq!(monitor.get_metrics().active_requests, 0);
    assert_eq!(monitor.get_metrics().total_requests, 250);
}

#[tokio::test]
async fn test_sampler_survives_probe_failures() {
    let probe = Arc::new(FlakyProbe {
        calls: AtomicU32::new(0),
    });
    let monitor = PerformanceMonitor::new(probe.clone(), None, fast_config());
    assert!(monitor.start());

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(monitor.is_running());
    assert!(probe.calls.load(Ordering::SeqCst) >= 3);
    assert_eq!(monitor.get_metrics().cpu_percent, 42.0);
    assert!(monitor.stop());
}

#[tokio::test]
async fn test_get_metrics_does_not_wait_for_tick() {
    let monitor = PerformanceMonitor::new(
        Arc::new(common::StaticProbe),
        None,
        MonitorConfig {
            interval: Duration::from_secs(3600),
            ..MonitorConfig::default()
        },
    );
    monitor.start();
    monitor.record_request_start();

    let read = tokio::time::timeout(Duration::from_millis(50), async { monitor.get_metrics() }).await;
    assert_eq!(read.unwrap().active_requests, 1);
    monitor.stop();
}

#[tokio::test]
async fn test_uptime_advances() {
    let monitor = common::monitor();
    monitor.sample_now().await.unwrap();
    let first = monitor.get_metrics();
    tokio::time::sleep(Duration::from_millis(20)).await;
    monitor.sample_now().await.unwrap();
    let second = monitor.get_metrics();
    assert!(second.uptime_s > first.uptime_s);
    assert!(second.captured_at >= first.captured_at);
}
