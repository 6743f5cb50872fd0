use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use log::error;
use tokio::task;

use super::collector::{emit_gauge, Collector};
use super::proc::{can_collect_process, ProcHandle, DEFAULT_PROC_ROOT};
use super::sink::Sink;

pub const PROCESS_COLLECTOR_NAME: &str = "process_collector";

pub const OPEN_FILE_DESCRIPTOR: &str = "process.open_file_descriptor";
pub const MAX_OPEN_FILE_DESCRIPTOR: &str = "process.max_file_descriptor";
pub const PROCESS_VIRTUAL_MEMORY: &str = "process.virtual_memory_bytes";
pub const PROCESS_VIRTUAL_MEMORY_MAX_BYTES: &str = "process.virtual_memory_max_bytes";
pub const RESIDENT_MEMORY: &str = "process.resident_memory";

type SubSampler = fn(&ProcHandle, &dyn Sink);

static SUB_SAMPLERS: [(&str, SubSampler); 3] = [
    ("virtual_memory", collect_virtual_memory),
    ("file_descriptors", collect_process_descriptor),
    ("limits", collect_limit),
];

/// Reports OS-level statistics of one process from the proc filesystem.
pub struct ProcessCollector {
    pid: u32,
    sink: Option<Arc<dyn Sink>>,
    proc_root: PathBuf,
}

impl ProcessCollector {
    pub fn new(sink: Option<Arc<dyn Sink>>) -> Self {
        ProcessCollector {
            pid: std::process::id(),
            sink,
            proc_root: PathBuf::from(DEFAULT_PROC_ROOT),
        }
    }

    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    pub fn with_proc_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.proc_root = root.into();
        self
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn proc_root(&self) -> &Path {
        &self.proc_root
    }

    async fn collect_all(&self) {
        if self.pid == 0 || !can_collect_process(&self.proc_root) {
            return;
        }
        let Some(sink) = self.sink.as_ref() else {
            return;
        };

        let proc = match ProcHandle::open(&self.proc_root, self.pid) {
            Ok(proc) => proc,
            Err(err) => {
                error!("process collector: open proc: {}", err);
                return;
            }
        };

        let handles = SUB_SAMPLERS.iter().map(|(label, sampler)| {
            let proc = proc.clone();
            let sink = Arc::clone(sink);
            let sampler = *sampler;
            let label = *label;
            async move {
                if let Err(err) = task::spawn_blocking(move || sampler(&proc, &*sink)).await {
                    error!("process collector: {} sampler aborted: {}", label, err);
                }
            }
        });

        join_all(handles).await;
    }
}

impl Collector for ProcessCollector {
    fn name(&self) -> &str {
        PROCESS_COLLECTOR_NAME
    }

    fn collect(&self) -> BoxFuture<'_, ()> {
        self.collect_all().boxed()
    }
}

fn collect_virtual_memory(proc: &ProcHandle, sink: &dyn Sink) {
    let stat = match proc.stat() {
        Ok(stat) => stat,
        Err(err) => {
            error!("proc stat: {}", err);
            return;
        }
    };

    emit_gauge(sink, PROCESS_VIRTUAL_MEMORY, stat.virtual_memory() as f64);
    emit_gauge(sink, RESIDENT_MEMORY, stat.resident_memory() as f64);
}

fn collect_process_descriptor(proc: &ProcHandle, sink: &dyn Sink) {
    match proc.file_descriptors_len() {
        Ok(fds) => emit_gauge(sink, OPEN_FILE_DESCRIPTOR, fds as f64),
        Err(err) => error!("file descriptor len: {}", err),
    }
}

fn collect_limit(proc: &ProcHandle, sink: &dyn Sink) {
    let limits = match proc.limits() {
        Ok(limits) => limits,
        Err(err) => {
            error!("limits proc: {}", err);
            return;
        }
    };

    emit_gauge(sink, MAX_OPEN_FILE_DESCRIPTOR, limit_value(limits.open_files));
    emit_gauge(
        sink,
        PROCESS_VIRTUAL_MEMORY_MAX_BYTES,
        limit_value(limits.address_space),
    );
}

// unlimited is reported as u64::MAX, the value the kernel stores for RLIM_INFINITY
fn limit_value(limit: Option<u64>) -> f64 {
    limit.unwrap_or(u64::MAX) as f64
}
