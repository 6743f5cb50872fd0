use std::fs;
use std::sync::Arc;
use std::time::Duration;

use procpulse::metrics::{SampleValue, TASK_STATS};
use procpulse::{MetricsConfig, RecordingSink, Registry, RegistryState, Sink, TrackingAllocator};
use tempfile::TempDir;
use tokio::time::sleep;

#[global_allocator]
static GLOBAL: TrackingAllocator = TrackingAllocator;

const CONFIG_JSON: &str = r#"{
    "interval_ms": 100,
    "runtime": { "max_wait_ms": 500, "max_age_secs": 60 },
    "sink": { "namespace": "svc", "tags": ["env:test"] }
}"#;

#[test]
fn tracking_allocator_counts_allocations() {
    let before = TrackingAllocator::stats();
    let buffer = std::hint::black_box(vec![0u8; 64 * 1024]);
    let during = TrackingAllocator::stats();
    drop(buffer);
    let after = TrackingAllocator::stats();

    assert!(during.total_bytes >= before.total_bytes + 64 * 1024);
    assert!(during.allocations > before.allocations);
    assert!(after.deallocations > during.deallocations);
}

#[tokio::test]
async fn configured_registry_reports_namespaced_samples() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("metrics.json");
    fs::write(&path, CONFIG_JSON).expect("write config");
    let config = MetricsConfig::from_json_file(&path).expect("load config");

    let sink = Arc::new(RecordingSink::new());
    let dyn_sink: Arc<dyn Sink> = sink.clone();
    let registry = Arc::new(config.build_registry(Some(dyn_sink)));
    assert_eq!(registry.num_collectors(), 2);

    let handle = registry.spawn();
    sleep(Duration::from_millis(250)).await;
    registry.stop();
    handle.await.expect("loop task");
    assert_eq!(registry.state(), RegistryState::Stopped);

    let alloc = sink
        .last("svc.memstats.alloc_bytes")
        .expect("runtime collector reported");
    assert!(alloc.value.as_f64() > 0.0);
    assert_eq!(alloc.tags, vec!["env:test".to_string()]);

    let tasks = sink
        .last(&format!("svc.{}", TASK_STATS))
        .expect("task count reported");
    assert!(matches!(tasks.value, SampleValue::Gauge(v) if v >= 1.0));
    assert!(sink.names().iter().all(|name| name.starts_with("svc.")));
}

#[tokio::test]
async fn disabled_sink_silences_every_collector() {
    let mut config = MetricsConfig::default();
    config.interval_ms = 20;
    config.sink.enabled = false;

    let sink = Arc::new(RecordingSink::new());
    let dyn_sink: Arc<dyn Sink> = sink.clone();
    let registry = Arc::new(config.build_registry(Some(dyn_sink)));

    let handle = registry.spawn();
    sleep(Duration::from_millis(60)).await;
    registry.stop();
    handle.await.expect("loop task");

    assert!(sink.is_empty());
}

#[tokio::test]
async fn stop_before_start_never_blocks() {
    let registry = Registry::new(Duration::from_millis(10));
    registry.stop();
    registry.collect().await;
    assert_eq!(registry.state(), RegistryState::Stopped);
}
