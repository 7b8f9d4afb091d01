// SNAP digitizer (F-engine) fleet: /mon/snap/<NN>/status and the /mon/snap/<NN>/...<NN>
// stats key fold into /mon/snap/summary/<NN>.
// The summary keys live under the scanned prefix, so they must be skipped on read.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use tracing::debug;

use super::{CollectError, Collector, PointSet};
use crate::models::raw::{self, StatsRecord, StatusRecord};
use crate::models::{MonitorPoint, RecordError, Tag};
use crate::staleness::is_recent;
use crate::store::{KvEntry, KvStore};

const TAG_NAME: &str = "snap";
const SUMMARY_SEGMENT: &str = "summary";

const OUTPUT_FIELDS: &[&str] = &[
    "status_ok",
    "status_recent",
    "eth_gbps",
    "eth_recent",
    "overflow_count",
    "clip_count",
];

#[derive(Debug, PartialEq, Eq)]
enum Shape {
    Status,
    Stats,
}

pub struct DigitizerCollector {
    prefix: String,
    window: Duration,
}

impl DigitizerCollector {
    pub fn new(prefix: impl Into<String>, window: Duration) -> Self {
        let mut prefix = prefix.into();
        if !prefix.ends_with('/') {
            prefix.push('/');
        }
        Self { prefix, window }
    }

    pub fn summary_path(&self, snap: &str) -> String {
        format!("{}{SUMMARY_SEGMENT}/{snap}", self.prefix)
    }

    /// Board number and record shape for a raw key, or `None` for keys this collector ignores.
    fn classify<'k>(&self, key: &'k str) -> Option<(&'k str, Shape)> {
        if key.to_ascii_lowercase().ends_with(SUMMARY_SEGMENT) {
            return None;
        }
        let rest = key.strip_prefix(&self.prefix)?;
        let snap = rest.split('/').next()?;
        if snap.is_empty() || !snap.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        if rest.contains('/') && key.to_ascii_lowercase().ends_with("/status") {
            Some((snap, Shape::Status))
        } else if key.ends_with(snap) {
            Some((snap, Shape::Stats))
        } else {
            None
        }
    }

    fn fragment(
        &self,
        entry: &KvEntry,
        snap: &str,
        shape: Shape,
        now: DateTime<Utc>,
    ) -> Result<MonitorPoint, RecordError> {
        let point = MonitorPoint::new_at(self.summary_path(snap), Tag::new(TAG_NAME, snap), now);
        match shape {
            Shape::Status => {
                let record: StatusRecord = raw::decode(&entry.key, &entry.value)?;
                let captured_at = raw::capture_time(&entry.key, &record.timestamp)?;
                Ok(point
                    .with_field("status_ok", record.ok)
                    .with_field("status_recent", is_recent(captured_at, self.window, now)))
            }
            Shape::Stats => {
                let record: StatsRecord = raw::decode(&entry.key, &entry.value)?;
                let captured_at = raw::capture_time(&entry.key, &record.timestamp)?;
                let stats = record.stats.unwrap_or_default();
                let eth = stats.eth.unwrap_or_default();
                let adc = stats.adc.unwrap_or_default();
                Ok(point
                    .with_field("eth_gbps", eth.gbps)
                    .with_field("eth_recent", is_recent(captured_at, self.window, now))
                    .with_field("overflow_count", eth.overflow_count)
                    .with_field("clip_count", adc.clip_count))
            }
        }
    }
}

impl Default for DigitizerCollector {
    fn default() -> Self {
        Self::new("/mon/snap/", crate::staleness::DEFAULT_STALENESS_WINDOW)
    }
}

#[async_trait]
impl Collector for DigitizerCollector {
    fn name(&self) -> &'static str {
        "digitizer"
    }

    fn tag_name(&self) -> &'static str {
        TAG_NAME
    }

    fn output_fields(&self) -> Vec<String> {
        OUTPUT_FIELDS.iter().map(|f| f.to_string()).collect()
    }

    async fn collect(
        &self,
        store: &dyn KvStore,
        now: DateTime<Utc>,
    ) -> Result<Vec<MonitorPoint>, CollectError> {
        let mut points = PointSet::default();
        let mut entries = store.get_prefix(&self.prefix);

        while let Some(entry) = entries.next().await {
            let entry = entry?;
            let Some((snap, shape)) = self.classify(&entry.key) else {
                continue;
            };
            match self.fragment(&entry, snap, shape, now) {
                Ok(fragment) => points.add(fragment)?,
                Err(e) => debug!(error = %e, "skipping digitizer fragment"),
            }
        }

        Ok(points.into_points())
    }
}
