mod config;
pub mod metrics;

pub use config::{ConfigError, MetricsConfig, ProcessConfig, RuntimeConfig, SinkConfig};
pub use metrics::{
    Collector, LogSink, NamespacedSink, ProcessCollector, RecordingSink, Registry, RegistryState,
    RuntimeCollector, Sink, SinkError, TrackingAllocator,
};
