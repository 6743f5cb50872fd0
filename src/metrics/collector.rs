use futures::future::BoxFuture;
use log::error;

use super::sink::Sink;

pub(crate) const DEFAULT_RATE: f64 = 1.0;

/// A named unit of sampling work driven by the [`Registry`](super::Registry).
///
/// `collect` never reports failure: problems are logged and confined to the
/// single metric or sub-sampler that hit them.
pub trait Collector: Send + Sync {
    fn name(&self) -> &str;

    fn collect(&self) -> BoxFuture<'_, ()>;
}

pub(crate) fn emit_gauge(sink: &dyn Sink, name: &str, value: f64) {
    if let Err(err) = sink.gauge(name, value, &[], DEFAULT_RATE) {
        error!("collect {}: {}", name, err);
    }
}

pub(crate) fn emit_count(sink: &dyn Sink, name: &str, delta: i64) {
    if let Err(err) = sink.count(name, delta, &[], DEFAULT_RATE) {
        error!("collect {}: {}", name, err);
    }
}
