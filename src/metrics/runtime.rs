use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::FutureExt;
use log::{debug, error};
use sysinfo::{Pid, System};
use tokio::sync::Mutex;
use tokio::task;
use tokio::time::timeout;

use super::allocator::TrackingAllocator;
use super::collector::{emit_count, emit_gauge, Collector};
use super::proc::{ProcHandle, ProcStatus, DEFAULT_PROC_ROOT};
use super::sink::Sink;
use super::types::{Aggregate, MemMetric, MemSnapshot, MemStats};

pub const RUNTIME_COLLECTOR_NAME: &str = "runtime_collector";

pub const TASK_STATS: &str = "goroutine";
pub const GC_STATS: &str = "gc";
pub const THREAD_STATS: &str = "thread";

pub const DEFAULT_MEM_MAX_WAIT: Duration = Duration::from_secs(1);
pub const DEFAULT_MEM_MAX_AGE: Duration = Duration::from_secs(5 * 60);

// Rust's default stack size for spawned threads.
const THREAD_STACK_BYTES: u64 = 2 * 1024 * 1024;

pub const MEM_METRICS: &[MemMetric] = &[
    MemMetric {
        name: "memstats.alloc_bytes",
        aggregate: Aggregate::Gauge,
        get: |ms| ms.alloc_bytes as f64,
    },
    MemMetric {
        name: "memstats.total_alloc_bytes",
        aggregate: Aggregate::Count,
        get: |ms| ms.total_alloc_bytes as f64,
    },
    MemMetric {
        name: "memstats.sys_bytes",
        aggregate: Aggregate::Gauge,
        get: |ms| ms.sys_bytes as f64,
    },
    MemMetric {
        name: "memstats.heap_alloc",
        aggregate: Aggregate::Gauge,
        get: |ms| ms.heap_alloc as f64,
    },
    MemMetric {
        name: "memstats.heap_idle",
        aggregate: Aggregate::Gauge,
        get: |ms| ms.heap_idle as f64,
    },
    MemMetric {
        name: "memstats.heap_inuse",
        aggregate: Aggregate::Gauge,
        get: |ms| ms.heap_inuse as f64,
    },
    MemMetric {
        name: "memstats.heap_sys_bytes",
        aggregate: Aggregate::Gauge,
        get: |ms| ms.heap_sys_bytes as f64,
    },
    MemMetric {
        name: "memstats.stack_inuse",
        aggregate: Aggregate::Gauge,
        get: |ms| ms.stack_inuse as f64,
    },
    MemMetric {
        name: "memstats.stack_sys_bytes",
        aggregate: Aggregate::Gauge,
        get: |ms| ms.stack_sys_bytes as f64,
    },
    MemMetric {
        name: "memstats.gc_sys_bytes",
        aggregate: Aggregate::Gauge,
        get: |ms| ms.gc_sys_bytes as f64,
    },
    MemMetric {
        name: "memstats.cpu_fraction",
        aggregate: Aggregate::Gauge,
        get: |ms| ms.cpu_fraction,
    },
];

/// Source of memory statistics. Reads may block for a while; they always run
/// on the blocking pool.
pub trait MemStatsReader: Send + Sync + 'static {
    fn read(&self) -> MemStats;
}

impl<F> MemStatsReader for F
where
    F: Fn() -> MemStats + Send + Sync + 'static,
{
    fn read(&self) -> MemStats {
        self()
    }
}

/// Default reader: allocator counters, `sysinfo` process usage and, where
/// available, `<proc>/self/status`.
pub struct ProcessMemReader {
    system: std::sync::Mutex<System>,
    pid: Option<Pid>,
    proc_root: PathBuf,
}

impl ProcessMemReader {
    pub fn new() -> Self {
        ProcessMemReader {
            system: std::sync::Mutex::new(System::new()),
            pid: sysinfo::get_current_pid().ok(),
            proc_root: PathBuf::from(DEFAULT_PROC_ROOT),
        }
    }

    pub fn with_proc_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.proc_root = root.into();
        self
    }

    /// (resident bytes, virtual bytes, cpu fraction)
    fn process_usage(&self) -> (u64, u64, f64) {
        let Some(pid) = self.pid else {
            return (0, 0, 0.0);
        };
        let mut system = self
            .system
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !system.refresh_process(pid) {
            debug!("sysinfo lost track of pid {}", pid);
            return (0, 0, 0.0);
        }
        match system.process(pid) {
            Some(process) => {
                let cpus = num_cpus::get().max(1) as f64;
                let fraction = (process.cpu_usage() as f64 / 100.0 / cpus).clamp(0.0, 1.0);
                (process.memory(), process.virtual_memory(), fraction)
            }
            None => (0, 0, 0.0),
        }
    }

    fn status(&self) -> ProcStatus {
        read_self_status(&self.proc_root).unwrap_or_default()
    }
}

impl Default for ProcessMemReader {
    fn default() -> Self {
        Self::new()
    }
}

impl MemStatsReader for ProcessMemReader {
    fn read(&self) -> MemStats {
        let alloc = TrackingAllocator::stats();
        let (resident, virtual_bytes, cpu_fraction) = self.process_usage();
        let status = self.status();

        let heap_sys = if status.vm_data > 0 {
            status.vm_data
        } else {
            virtual_bytes
        };
        let threads = status.threads.max(1);

        MemStats {
            alloc_bytes: alloc.live_bytes,
            total_alloc_bytes: alloc.total_bytes,
            sys_bytes: resident,
            heap_alloc: alloc.live_bytes,
            heap_idle: heap_sys.saturating_sub(alloc.live_bytes),
            heap_inuse: alloc.live_bytes,
            heap_sys_bytes: heap_sys,
            stack_inuse: status.vm_stack,
            stack_sys_bytes: status.vm_stack + (threads - 1) * THREAD_STACK_BYTES,
            gc_sys_bytes: alloc.freed_bytes(),
            cpu_fraction,
        }
    }
}

fn read_self_status(root: &Path) -> Option<ProcStatus> {
    let handle = ProcHandle::open(root, std::process::id()).ok()?;
    match handle.status() {
        Ok(status) => Some(status),
        Err(err) => {
            debug!("runtime status unavailable: {}", err);
            None
        }
    }
}

/// Reports allocator, task and thread statistics of the running process.
///
/// The memory table is sampled with a bounded wait: a read that takes longer
/// than `max_wait` is answered from the previous snapshot, provided that one
/// is younger than `max_age`. Otherwise the pass waits for the read.
pub struct RuntimeCollector {
    sink: Option<Arc<dyn Sink>>,
    reader: Arc<dyn MemStatsReader>,
    last: Arc<Mutex<Option<MemSnapshot>>>,
    max_wait: Duration,
    max_age: Duration,
    proc_root: PathBuf,
}

impl RuntimeCollector {
    pub fn new(sink: Option<Arc<dyn Sink>>) -> Self {
        RuntimeCollector {
            sink,
            reader: Arc::new(ProcessMemReader::new()),
            last: Arc::new(Mutex::new(None)),
            max_wait: DEFAULT_MEM_MAX_WAIT,
            max_age: DEFAULT_MEM_MAX_AGE,
            proc_root: PathBuf::from(DEFAULT_PROC_ROOT),
        }
    }

    pub fn with_reader<R: MemStatsReader>(mut self, reader: R) -> Self {
        self.reader = Arc::new(reader);
        self
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Root of the proc tree the thread count is read from.
    pub fn with_proc_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.proc_root = root.into();
        self
    }

    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    pub async fn cached_snapshot(&self) -> Option<MemSnapshot> {
        self.last.lock().await.clone()
    }

    #[cfg(test)]
    pub(crate) async fn seed_snapshot(&self, snapshot: MemSnapshot) {
        *self.last.lock().await = Some(snapshot);
    }

    async fn collect_all(&self) {
        let Some(sink) = self.sink.as_deref() else {
            return;
        };

        self.collect_num_of_tasks(sink);
        self.collect_gc(sink);
        self.collect_thread(sink).await;
        self.collect_memory(sink).await;
    }

    fn collect_num_of_tasks(&self, sink: &dyn Sink) {
        let tasks = tokio::runtime::Handle::try_current()
            .map(|handle| handle.metrics().num_alive_tasks())
            .unwrap_or(0);
        emit_gauge(sink, TASK_STATS, tasks as f64);
    }

    fn collect_gc(&self, sink: &dyn Sink) {
        let stats = TrackingAllocator::stats();
        emit_gauge(sink, GC_STATS, stats.deallocations as f64);
    }

    async fn collect_thread(&self, sink: &dyn Sink) {
        let root = self.proc_root.clone();
        let threads = match task::spawn_blocking(move || read_self_status(&root)).await {
            Ok(Some(status)) if status.threads > 0 => status.threads,
            Ok(_) => fallback_thread_count(),
            Err(err) => {
                error!("runtime collector: thread count read aborted: {}", err);
                fallback_thread_count()
            }
        };
        emit_gauge(sink, THREAD_STATS, threads as f64);
    }

    async fn collect_memory(&self, sink: &dyn Sink) {
        let reader = Arc::clone(&self.reader);
        let last = Arc::clone(&self.last);

        // Detached from this pass: it still lands in the cache if we stop waiting.
        let mut read = task::spawn_blocking(move || {
            let snapshot = MemSnapshot::new(reader.read(), Instant::now());
            *last.blocking_lock() = Some(snapshot.clone());
            snapshot
        });

        let result = match timeout(self.max_wait, &mut read).await {
            Ok(joined) => joined,
            Err(_) => {
                let cached = {
                    let guard = self.last.lock().await;
                    guard
                        .as_ref()
                        .filter(|snapshot| snapshot.captured_at.elapsed() < self.max_age)
                        .cloned()
                };
                match cached {
                    Some(snapshot) => {
                        debug!(
                            "memory read exceeded {:?}, using snapshot from {:?} ago",
                            self.max_wait,
                            snapshot.captured_at.elapsed()
                        );
                        Ok(snapshot)
                    }
                    None => read.await,
                }
            }
        };

        match result {
            Ok(snapshot) => self.delegate_mem_collector(sink, &snapshot.stats),
            Err(err) => error!("collect mem: read task failed: {}", err),
        }
    }

    fn delegate_mem_collector(&self, sink: &dyn Sink, stats: &MemStats) {
        for metric in MEM_METRICS {
            let value = (metric.get)(stats);
            match metric.aggregate {
                Aggregate::Gauge => emit_gauge(sink, metric.name, value),
                Aggregate::Count => emit_count(sink, metric.name, value as i64),
            }
        }
    }
}

impl Collector for RuntimeCollector {
    fn name(&self) -> &str {
        RUNTIME_COLLECTOR_NAME
    }

    fn collect(&self) -> BoxFuture<'_, ()> {
        self.collect_all().boxed()
    }
}

fn fallback_thread_count() -> u64 {
    tokio::runtime::Handle::try_current()
        .map(|handle| handle.metrics().num_workers() as u64)
        .unwrap_or(1)
}
