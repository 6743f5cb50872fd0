use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::FutureExt;
use log::{error, info, warn};
use tokio::select;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::collector::Collector;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegistryState {
    Idle,
    Running,
    Stopped,
}

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const STOPPED: u8 = 2;

/// Drives every registered collector on a fixed interval until stopped.
///
/// Collectors are keyed by name; registering a second collector under the
/// same name replaces the first. No ordering between collectors is
/// guaranteed within a tick.
pub struct Registry {
    collectors: DashMap<String, Arc<dyn Collector>>,
    interval: Duration,
    cancel: CancellationToken,
    state: AtomicU8,
}

impl Registry {
    pub fn new(interval: Duration) -> Self {
        let interval = if interval.is_zero() {
            DEFAULT_INTERVAL
        } else {
            interval
        };

        Registry {
            collectors: DashMap::new(),
            interval,
            cancel: CancellationToken::new(),
            state: AtomicU8::new(IDLE),
        }
    }

    pub fn register<C: Collector + 'static>(&self, collector: C) {
        self.register_arc(Arc::new(collector));
    }

    pub fn register_arc(&self, collector: Arc<dyn Collector>) {
        let name = collector.name().to_string();
        if self.collectors.insert(name.clone(), collector).is_some() {
            info!("replaced collector {}", name);
        }
    }

    pub fn num_collectors(&self) -> usize {
        self.collectors.len()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn state(&self) -> RegistryState {
        match self.state.load(Ordering::SeqCst) {
            IDLE => RegistryState::Idle,
            RUNNING => RegistryState::Running,
            _ => RegistryState::Stopped,
        }
    }

    /// Runs the collection loop until [`stop`](Self::stop) is called.
    ///
    /// All collectors run once immediately, then once per interval. A loop
    /// runs at most once per registry.
    pub async fn collect(&self) {
        if let Err(current) =
            self.state
                .compare_exchange(IDLE, RUNNING, Ordering::SeqCst, Ordering::SeqCst)
        {
            if current == RUNNING {
                warn!("collector loop already running");
            } else {
                warn!("registry already stopped");
            }
            return;
        }

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;

        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            self.run_collectors().await;

            select! {
                _ = self.cancel.cancelled() => {
                    break;
                }
                _ = ticker.tick() => {}
            }
        }

        info!("stopping collectors");
        self.state.store(STOPPED, Ordering::SeqCst);
    }

    /// Runs [`collect`](Self::collect) on a new tokio task.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move { registry.collect().await })
    }

    /// Signals the loop to exit after the tick in progress. Never blocks and
    /// may be called any number of times, with or without a running loop.
    pub fn stop(&self) {
        self.cancel.cancel();
        let _ = self
            .state
            .compare_exchange(IDLE, STOPPED, Ordering::SeqCst, Ordering::SeqCst);
    }

    async fn run_collectors(&self) {
        // Clone out of the map so no shard lock is held across an await.
        let collectors: Vec<Arc<dyn Collector>> = self
            .collectors
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        for collector in collectors {
            let outcome = AssertUnwindSafe(collector.collect()).catch_unwind().await;
            if outcome.is_err() {
                error!("collector {} panicked", collector.name());
            }
        }
    }
}
