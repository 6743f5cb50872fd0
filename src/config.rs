// src/config.rs

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::metrics::{
    NamespacedSink, ProcessCollector, ProcessMemReader, Registry, RuntimeCollector, Sink,
};

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(serde_json::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(path, err) => {
                write!(f, "failed to read config {}: {}", path.display(), err)
            }
            ConfigError::Parse(err) => write!(f, "invalid metrics config: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(_, err) => Some(err),
            ConfigError::Parse(err) => Some(err),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    pub interval_ms: u64,              // Default: 2000
    pub runtime: RuntimeConfig,
    pub process: ProcessConfig,
    pub sink: SinkConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    pub enabled: bool,
    pub max_wait_ms: u64,              // Default: 1000
    pub max_age_secs: u64,             // Default: 300
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProcessConfig {
    pub enabled: bool,
    pub proc_root: PathBuf,            // Default: /proc
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SinkConfig {
    pub enabled: bool,
    pub namespace: String,
    pub tags: Vec<String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        MetricsConfig {
            interval_ms: 2_000,
            runtime: RuntimeConfig::default(),
            process: ProcessConfig::default(),
            sink: SinkConfig::default(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            enabled: true,
            max_wait_ms: 1_000,
            max_age_secs: 300,
        }
    }
}

impl Default for ProcessConfig {
    fn default() -> Self {
        ProcessConfig {
            enabled: true,
            proc_root: PathBuf::from(crate::metrics::DEFAULT_PROC_ROOT),
        }
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        SinkConfig {
            enabled: true,
            namespace: String::new(),
            tags: Vec::new(),
        }
    }
}

impl MetricsConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(raw).map_err(ConfigError::Parse)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_json_str(&raw)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Builds a registry holding the enabled collectors. A disabled sink turns
    /// every collector into a no-op.
    pub fn build_registry(&self, sink: Option<Arc<dyn Sink>>) -> Registry {
        let sink = if self.sink.enabled {
            sink.map(|inner| {
                Arc::new(NamespacedSink::new(
                    inner,
                    &self.sink.namespace,
                    self.sink.tags.clone(),
                )) as Arc<dyn Sink>
            })
        } else {
            None
        };

        let registry = Registry::new(self.interval());

        if self.runtime.enabled {
            registry.register(
                RuntimeCollector::new(sink.clone())
                    .with_reader(
                        ProcessMemReader::new().with_proc_root(self.process.proc_root.clone()),
                    )
                    .with_max_wait(Duration::from_millis(self.runtime.max_wait_ms))
                    .with_max_age(Duration::from_secs(self.runtime.max_age_secs))
                    .with_proc_root(self.process.proc_root.clone()),
            );
        }

        if self.process.enabled {
            registry.register(
                ProcessCollector::new(sink).with_proc_root(self.process.proc_root.clone()),
            );
        }

        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::RecordingSink;

    #[test]
    fn missing_fields_take_defaults() {
        let config =
            MetricsConfig::from_json_str(r#"{"interval_ms": 500, "sink": {"namespace": "api"}}"#)
                .unwrap();
        assert_eq!(config.interval(), Duration::from_millis(500));
        assert_eq!(config.runtime, RuntimeConfig::default());
        assert_eq!(config.sink.namespace, "api");
        assert!(config.sink.enabled);
    }

    #[test]
    fn rejects_malformed_json() {
        let err = MetricsConfig::from_json_str("{ interval_ms: }").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn builds_only_enabled_collectors() {
        let mut config = MetricsConfig::default();
        config.process.enabled = false;
        let sink: Arc<dyn Sink> = Arc::new(RecordingSink::new());
        let registry = config.build_registry(Some(sink));
        assert_eq!(registry.num_collectors(), 1);
        assert_eq!(registry.interval(), Duration::from_secs(2));
    }
}
