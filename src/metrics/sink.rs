use std::fmt;
use std::sync::Mutex;

use log::debug;

#[derive(Debug)]
pub enum SinkError {
    Transport(String),
    Rejected { name: String, reason: String },
    Io(std::io::Error),
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkError::Transport(reason) => write!(f, "sink transport failed: {}", reason),
            SinkError::Rejected { name, reason } => {
                write!(f, "sink rejected {}: {}", name, reason)
            }
            SinkError::Io(err) => write!(f, "sink io error: {}", err),
        }
    }
}

impl std::error::Error for SinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SinkError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SinkError {
    fn from(err: std::io::Error) -> Self {
        SinkError::Io(err)
    }
}

/// Destination for metric samples. Implementations already know how to
/// transmit a sample; collectors only hand them over.
pub trait Sink: Send + Sync {
    fn gauge(&self, name: &str, value: f64, tags: &[String], rate: f64) -> Result<(), SinkError>;

    fn count(&self, name: &str, delta: i64, tags: &[String], rate: f64) -> Result<(), SinkError>;
}

#[derive(Clone, Debug, PartialEq)]
pub enum SampleValue {
    Gauge(f64),
    Count(i64),
}

impl SampleValue {
    pub fn as_f64(&self) -> f64 {
        match self {
            SampleValue::Gauge(v) => *v,
            SampleValue::Count(v) => *v as f64,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    pub name: String,
    pub value: SampleValue,
    pub tags: Vec<String>,
    pub rate: f64,
}

/// Keeps every sample in memory.
#[derive(Default)]
pub struct RecordingSink {
    samples: Mutex<Vec<Sample>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn samples(&self) -> Vec<Sample> {
        self.lock().clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.lock().iter().map(|s| s.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Most recent sample recorded under `name`.
    pub fn last(&self, name: &str) -> Option<Sample> {
        self.lock().iter().rev().find(|s| s.name == name).cloned()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Sample>> {
        self.samples
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn push(&self, name: &str, value: SampleValue, tags: &[String], rate: f64) {
        self.lock().push(Sample {
            name: name.to_string(),
            value,
            tags: tags.to_vec(),
            rate,
        });
    }
}

impl Sink for RecordingSink {
    fn gauge(&self, name: &str, value: f64, tags: &[String], rate: f64) -> Result<(), SinkError> {
        self.push(name, SampleValue::Gauge(value), tags, rate);
        Ok(())
    }

    fn count(&self, name: &str, delta: i64, tags: &[String], rate: f64) -> Result<(), SinkError> {
        self.push(name, SampleValue::Count(delta), tags, rate);
        Ok(())
    }
}

/// Prefixes metric names with a namespace and appends constant tags before
/// forwarding to the wrapped sink.
pub struct NamespacedSink<S> {
    inner: S,
    namespace: String,
    tags: Vec<String>,
}

impl<S: Sink> NamespacedSink<S> {
    pub fn new(inner: S, namespace: &str, tags: Vec<String>) -> Self {
        let namespace = if namespace.is_empty() || namespace.ends_with('.') {
            namespace.to_string()
        } else {
            format!("{}.", namespace)
        };
        NamespacedSink {
            inner,
            namespace,
            tags,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn qualify(&self, name: &str) -> String {
        format!("{}{}", self.namespace, name)
    }

    fn merge_tags(&self, tags: &[String]) -> Vec<String> {
        let mut merged = Vec::with_capacity(tags.len() + self.tags.len());
        merged.extend_from_slice(tags);
        merged.extend(self.tags.iter().cloned());
        merged
    }
}

impl<S: Sink> Sink for NamespacedSink<S> {
    fn gauge(&self, name: &str, value: f64, tags: &[String], rate: f64) -> Result<(), SinkError> {
        self.inner
            .gauge(&self.qualify(name), value, &self.merge_tags(tags), rate)
    }

    fn count(&self, name: &str, delta: i64, tags: &[String], rate: f64) -> Result<(), SinkError> {
        self.inner
            .count(&self.qualify(name), delta, &self.merge_tags(tags), rate)
    }
}

impl<S: Sink + ?Sized> Sink for std::sync::Arc<S> {
    fn gauge(&self, name: &str, value: f64, tags: &[String], rate: f64) -> Result<(), SinkError> {
        (**self).gauge(name, value, tags, rate)
    }

    fn count(&self, name: &str, delta: i64, tags: &[String], rate: f64) -> Result<(), SinkError> {
        (**self).count(name, delta, tags, rate)
    }
}

/// Writes samples to the `log` facade at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl Sink for LogSink {
    fn gauge(&self, name: &str, value: f64, tags: &[String], rate: f64) -> Result<(), SinkError> {
        debug!("gauge {}={} tags={:?} rate={}", name, value, tags, rate);
        Ok(())
    }

    fn count(&self, name: &str, delta: i64, tags: &[String], rate: f64) -> Result<(), SinkError> {
        debug!("count {}={} tags={:?} rate={}", name, delta, tags, rate);
        Ok(())
    }
}
