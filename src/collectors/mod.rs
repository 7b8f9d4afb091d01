// Subsystem collectors: each scans its own region of the store and folds the raw
// fragments into one summary point per device.

mod correlator;
mod digitizer;
mod recorder;

pub use correlator::{CorrelatorCollector, PipelineTarget, Stage, pipeline_targets};
pub use digitizer::DigitizerCollector;
pub use recorder::RecorderCollector;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::config::AppConfig;
use crate::models::{MergeError, MonitorPoint, Tag};
use crate::store::{KvStore, StoreError};

/// Failure that ends a collector's pass. Malformed fragments never get here; they are skipped.
#[derive(Debug, Error)]
pub enum CollectError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Merge(#[from] MergeError),
}

#[async_trait]
pub trait Collector: Send + Sync {
    /// Short name used in logs and pass reports.
    fn name(&self) -> &'static str;

    /// Tag key every point from this collector carries.
    fn tag_name(&self) -> &'static str;

    /// Every field name this collector may emit.
    fn output_fields(&self) -> Vec<String>;

    /// Builds one summary point per device seen this pass. `now` stamps the points and
    /// anchors the staleness checks.
    async fn collect(
        &self,
        store: &dyn KvStore,
        now: DateTime<Utc>,
    ) -> Result<Vec<MonitorPoint>, CollectError>;
}

/// Enabled collectors in pass order: digitizers, recorders, correlator.
pub fn from_config(config: &AppConfig) -> Vec<Arc<dyn Collector>> {
    let mut collectors: Vec<Arc<dyn Collector>> = Vec::new();
    if config.digitizer.enabled {
        collectors.push(Arc::new(DigitizerCollector::new(
            config.digitizer.prefix.clone(),
            Duration::from_secs(config.digitizer.staleness_secs),
        )));
    }
    if config.recorder.enabled {
        collectors.push(Arc::new(RecorderCollector::new(
            config.recorder.prefix.clone(),
            Duration::from_secs(config.recorder.staleness_secs),
        )));
    }
    if config.correlator.enabled {
        let c = &config.correlator;
        collectors.push(Arc::new(CorrelatorCollector::new(
            pipeline_targets(&c.host_prefix, c.hosts, c.pipelines),
            Duration::from_secs(c.staleness_secs),
        )));
    }
    collectors
}

/// Per-pass accumulator: fragments with the same tag merge into one point.
#[derive(Debug, Default)]
pub struct PointSet {
    points: HashMap<Tag, MonitorPoint>,
}

impl PointSet {
    pub fn add(&mut self, fragment: MonitorPoint) -> Result<(), MergeError> {
        match self.points.get_mut(&fragment.tag) {
            Some(existing) => existing.merge_in_place(fragment, true),
            None => {
                self.points.insert(fragment.tag.clone(), fragment);
                Ok(())
            }
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Points ordered by path.
    pub fn into_points(self) -> Vec<MonitorPoint> {
        let mut points: Vec<MonitorPoint> = self.points.into_values().collect();
        points.sort_by(|a, b| a.path.cmp(&b.path));
        points
    }
}

/// Builds the `<field>_recent` companion name.
pub(crate) fn recent_field(field: &str) -> String {
    format!("{field}_recent")
}
