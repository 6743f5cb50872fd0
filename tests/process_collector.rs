use std::fs;
use std::path::Path;
use std::sync::Arc;

use procpulse::metrics::{
    Collector, ProcessCollector, RecordingSink, SampleValue, Sink, MAX_OPEN_FILE_DESCRIPTOR,
    OPEN_FILE_DESCRIPTOR, PROCESS_VIRTUAL_MEMORY, PROCESS_VIRTUAL_MEMORY_MAX_BYTES,
    RESIDENT_MEMORY,
};
use tempfile::TempDir;

const PID: u32 = 4242;

const STAT: &str = "4242 (worker (v2)) S 1 4242 4242 0 -1 4194560 1500 0 0 0 12 4 0 0 20 0 9 0 12345 209715200 100 18446744073709551615 1 1 0 0 0 0 0 0 0 0 0 0 17 3 0 0 0 0 0\n";

const LIMITS: &str = "Limit                     Soft Limit           Hard Limit           Units
Max cpu time              unlimited            unlimited            seconds
Max open files            4096                 524288               files
Max address space         unlimited            unlimited            bytes
";

struct FakeProc {
    root: TempDir,
}

impl FakeProc {
    fn new() -> Self {
        let root = TempDir::new().expect("temp proc root");
        let dir = root.path().join(PID.to_string());
        fs::create_dir_all(dir.join("fd")).expect("create fd dir");
        fs::write(dir.join("stat"), STAT).expect("write stat");
        fs::write(dir.join("limits"), LIMITS).expect("write limits");
        for fd in 0..3 {
            fs::write(dir.join("fd").join(fd.to_string()), b"").expect("write fd");
        }
        FakeProc { root }
    }

    fn path(&self) -> &Path {
        self.root.path()
    }

    fn remove(&self, entry: &str) {
        fs::remove_file(self.path().join(PID.to_string()).join(entry)).expect("remove entry");
    }
}

fn recording() -> (Arc<RecordingSink>, Option<Arc<dyn Sink>>) {
    let sink = Arc::new(RecordingSink::new());
    let dyn_sink: Arc<dyn Sink> = sink.clone();
    (sink, Some(dyn_sink))
}

fn gauge(sink: &RecordingSink, name: &str) -> f64 {
    match sink.last(name).unwrap_or_else(|| panic!("{} missing", name)).value {
        SampleValue::Gauge(v) => v,
        other => panic!("{} reported as {:?}", name, other),
    }
}

#[tokio::test]
async fn reports_all_process_metrics() {
    let proc = FakeProc::new();
    let (sink, dyn_sink) = recording();
    let collector = ProcessCollector::new(dyn_sink)
        .with_pid(PID)
        .with_proc_root(proc.path());

    collector.collect().await;

    assert_eq!(sink.len(), 5);
    assert_eq!(gauge(&sink, PROCESS_VIRTUAL_MEMORY), 209_715_200.0);
    assert!(gauge(&sink, RESIDENT_MEMORY) >= 100.0 * 4096.0);
    assert_eq!(gauge(&sink, OPEN_FILE_DESCRIPTOR), 3.0);
    assert_eq!(gauge(&sink, MAX_OPEN_FILE_DESCRIPTOR), 4096.0);
    assert_eq!(
        gauge(&sink, PROCESS_VIRTUAL_MEMORY_MAX_BYTES),
        u64::MAX as f64
    );
}

#[tokio::test]
async fn unlimited_open_files_reported_as_max() {
    let proc = FakeProc::new();
    fs::write(
        proc.path().join(PID.to_string()).join("limits"),
        LIMITS.replace(
            "Max open files            4096                 524288",
            "Max open files            unlimited            unlimited",
        ),
    )
    .expect("rewrite limits");
    let (sink, dyn_sink) = recording();
    let collector = ProcessCollector::new(dyn_sink)
        .with_pid(PID)
        .with_proc_root(proc.path());

    collector.collect().await;

    assert_eq!(gauge(&sink, MAX_OPEN_FILE_DESCRIPTOR), u64::MAX as f64);
}

#[tokio::test]
async fn failed_sub_sampler_does_not_stop_siblings() {
    let proc = FakeProc::new();
    proc.remove("limits");
    let (sink, dyn_sink) = recording();
    let collector = ProcessCollector::new(dyn_sink)
        .with_pid(PID)
        .with_proc_root(proc.path());

    collector.collect().await;

    let names = sink.names();
    assert_eq!(names.len(), 3);
    assert!(!names.iter().any(|n| n == MAX_OPEN_FILE_DESCRIPTOR));
    assert_eq!(gauge(&sink, OPEN_FILE_DESCRIPTOR), 3.0);
}

#[tokio::test]
async fn missing_proc_root_performs_no_sink_calls() {
    let proc = FakeProc::new();
    let (sink, dyn_sink) = recording();
    let collector = ProcessCollector::new(dyn_sink)
        .with_pid(PID)
        .with_proc_root(proc.path().join("not-mounted"));

    collector.collect().await;

    assert!(sink.is_empty());
}

#[tokio::test]
async fn unknown_pid_and_zero_pid_are_skipped() {
    let proc = FakeProc::new();
    let (sink, dyn_sink) = recording();

    ProcessCollector::new(dyn_sink.clone())
        .with_pid(0)
        .with_proc_root(proc.path())
        .collect()
        .await;
    ProcessCollector::new(dyn_sink)
        .with_pid(PID + 1)
        .with_proc_root(proc.path())
        .collect()
        .await;

    assert!(sink.is_empty());
}

#[tokio::test]
async fn without_sink_is_a_no_op() {
    let proc = FakeProc::new();
    let collector = ProcessCollector::new(None)
        .with_pid(PID)
        .with_proc_root(proc.path());

    collector.collect().await;
    assert_eq!(collector.name(), "process_collector");
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn reads_own_process_on_linux() {
    let (sink, dyn_sink) = recording();
    let collector = ProcessCollector::new(dyn_sink);

    collector.collect().await;

    assert!(gauge(&sink, RESIDENT_MEMORY) > 0.0);
    assert!(gauge(&sink, OPEN_FILE_DESCRIPTOR) >= 1.0);
}
