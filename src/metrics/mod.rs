mod allocator;
mod collector;
mod proc;
mod process;
mod registry;
mod runtime;
mod sink;
mod types;

pub use allocator::{AllocatorStats, TrackingAllocator};
pub use collector::Collector;
pub use proc::{ProcError, DEFAULT_PROC_ROOT};
pub use process::{
    ProcessCollector, MAX_OPEN_FILE_DESCRIPTOR, OPEN_FILE_DESCRIPTOR, PROCESS_COLLECTOR_NAME,
    PROCESS_VIRTUAL_MEMORY, PROCESS_VIRTUAL_MEMORY_MAX_BYTES, RESIDENT_MEMORY,
};
pub use registry::{Registry, RegistryState, DEFAULT_INTERVAL};
pub use runtime::{
    MemStatsReader, ProcessMemReader, RuntimeCollector, DEFAULT_MEM_MAX_AGE, DEFAULT_MEM_MAX_WAIT,
    GC_STATS, MEM_METRICS, RUNTIME_COLLECTOR_NAME, TASK_STATS, THREAD_STATS,
};
pub use sink::{LogSink, NamespacedSink, RecordingSink, Sample, SampleValue, Sink, SinkError};
pub use types::{Aggregate, MemMetric, MemSnapshot, MemStats};
