// Aggregation driver: every interval, run each collector and write its summary points back.
// A collector that errors or panics is logged and skipped; the others and later passes go on.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use futures_util::future::join_all;
use tokio::sync::{oneshot, watch};
use tokio::time::{Duration, Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info, instrument, warn};

use crate::collectors::Collector;
use crate::config::{MIN_INTERVAL, validate_output_fields};
use crate::staleness::Clock;
use crate::store::KvStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// Waiting for the next tick.
    Idle,
    /// A pass is in flight.
    Running,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    Completed,
    /// Collection failed (usually a store transport error); nothing was written.
    CollectFailed(String),
    /// A write failed; the collector's remaining points were abandoned for this pass.
    WriteFailed(String),
    Panicked(String),
}

/// What one collector did during one pass.
#[derive(Debug, Clone)]
pub struct PassReport {
    pub collector: &'static str,
    pub points_collected: usize,
    pub points_written: usize,
    pub outcome: PassOutcome,
}

impl PassReport {
    pub fn is_ok(&self) -> bool {
        self.outcome == PassOutcome::Completed
    }
}

/// Driver timing.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub interval: Duration,
    /// Run the collectors of a pass concurrently. Each collector's writes stay grouped and a
    /// pass always finishes before the next one starts.
    pub concurrent: bool,
}

pub struct Aggregator {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    collectors: Vec<Arc<dyn Collector>>,
    state: watch::Sender<DriverState>,
}

impl Aggregator {
    pub fn new(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>) -> Self {
        let (state, _) = watch::channel(DriverState::Idle);
        Self {
            store,
            clock,
            collectors: Vec::new(),
            state,
        }
    }

    /// Adds a collector after checking its fields against the reserved output keys.
    pub fn register(&mut self, collector: Arc<dyn Collector>) -> anyhow::Result<()> {
        validate_output_fields(
            collector.name(),
            collector.tag_name(),
            &collector.output_fields(),
        )?;
        self.collectors.push(collector);
        Ok(())
    }

    pub fn with_collectors(
        mut self,
        collectors: impl IntoIterator<Item = Arc<dyn Collector>>,
    ) -> anyhow::Result<Self> {
        for collector in collectors {
            self.register(collector)?;
        }
        Ok(self)
    }

    pub fn collector_names(&self) -> Vec<&'static str> {
        self.collectors.iter().map(|c| c.name()).collect()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<DriverState> {
        self.state.subscribe()
    }

    /// Runs every registered collector once and writes the results.
    #[instrument(skip(self), fields(collectors = self.collectors.len()))]
    pub async fn run_one_pass(&self, concurrent: bool) -> Vec<PassReport> {
        self.state.send_replace(DriverState::Running);
        let now = self.clock.now();

        let reports = if concurrent {
            join_all(
                self.collectors
                    .iter()
                    .map(|collector| self.run_collector(collector.as_ref(), now)),
            )
            .await
        } else {
            let mut reports = Vec::with_capacity(self.collectors.len());
            for collector in &self.collectors {
                reports.push(self.run_collector(collector.as_ref(), now).await);
            }
            reports
        };

        let written: usize = reports.iter().map(|r| r.points_written).sum();
        let failed = reports.iter().filter(|r| !r.is_ok()).count();
        info!(
            points_written = written,
            collectors_failed = failed,
            "aggregation pass complete"
        );
        self.state.send_replace(DriverState::Idle);
        reports
    }

    async fn run_collector(&self, collector: &dyn Collector, now: DateTime<Utc>) -> PassReport {
        let name = collector.name();
        let collected = AssertUnwindSafe(collector.collect(self.store.as_ref(), now))
            .catch_unwind()
            .await;

        let points = match collected {
            Ok(Ok(points)) => points,
            Ok(Err(e)) => {
                warn!(collector = name, pass_time = %now, error = %e, "error making summary");
                return PassReport {
                    collector: name,
                    points_collected: 0,
                    points_written: 0,
                    outcome: PassOutcome::CollectFailed(e.to_string()),
                };
            }
            Err(panic) => {
                let message = panic_message(&*panic);
                error!(collector = name, pass_time = %now, panic = %message, "collector panicked");
                return PassReport {
                    collector: name,
                    points_collected: 0,
                    points_written: 0,
                    outcome: PassOutcome::Panicked(message),
                };
            }
        };

        let points_collected = points.len();
        let mut points_written = 0;
        for point in &points {
            let bytes = match point.serialize() {
                Ok(b) => b,
                Err(e) => {
                    warn!(collector = name, path = %point.path, error = %e, "cannot serialize point");
                    continue;
                }
            };
            if let Err(e) = self.store.put(&point.path, bytes).await {
                warn!(
                    collector = name,
                    path = %point.path,
                    error = %e,
                    "write failed; abandoning collector until next pass"
                );
                return PassReport {
                    collector: name,
                    points_collected,
                    points_written,
                    outcome: PassOutcome::WriteFailed(e.to_string()),
                };
            }
            points_written += 1;
        }

        debug!(collector = name, points = points_written, "summary points written");
        PassReport {
            collector: name,
            points_collected,
            points_written,
            outcome: PassOutcome::Completed,
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Spawns the driver loop. The first pass runs one interval after start.
/// The loop stops before the next pass once `shutdown_rx` fires (or its sender is dropped);
/// a pass already in flight is allowed to finish.
pub fn spawn(
    aggregator: Arc<Aggregator>,
    config: WorkerConfig,
    shutdown_rx: oneshot::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        run(aggregator, config, shutdown_rx).await;
    })
}

#[instrument(skip_all, fields(interval_secs = config.interval.as_secs_f64()))]
async fn run(
    aggregator: Arc<Aggregator>,
    config: WorkerConfig,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    // interval_at panics on a zero period.
    let period = config.interval.max(MIN_INTERVAL);
    let mut tick = interval_at(Instant::now() + period, period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown_rx => {
                debug!("aggregator shutting down");
                break;
            }
            _ = tick.tick() => {
                aggregator.run_one_pass(config.concurrent).await;
            }
        }
    }
}
