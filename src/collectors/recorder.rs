// Data recorder fleet: /mon/<dr>/bifrost/{pipeline_lag,rx_rate} and /mon/<dr>/summary
// fold into /mon/dr/summary/<dr>.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use regex::Regex;
use tracing::debug;

use super::{CollectError, Collector, PointSet, recent_field};
use crate::models::raw::{self, ValueRecord};
use crate::models::{FieldValue, MonitorPoint, RecordError, Tag};
use crate::store::{KvEntry, KvStore};

const TAG_NAME: &str = "dr";
const SUMMARY_PREFIX: &str = "/mon/dr/summary/";

/// Accepted key suffixes and the field each one feeds.
const SUFFIX_FIELDS: &[(&str, &str)] = &[
    ("/bifrost/pipeline_lag", "recorder_lag"),
    ("/bifrost/rx_rate", "recorder_rate"),
    ("/summary", "recorder_status"),
];

/// What may follow the name stem in a recorder name, e.g. `vs12` in `drvs12`.
static NAME_SUFFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-z]*\d{0,4}$").unwrap());

pub struct RecorderCollector {
    prefix: String,
    /// `prefix` up to and including its last `/`, e.g. `/mon/`.
    parent: String,
    /// Remainder of `prefix` every recorder name starts with, e.g. `dr`.
    stem: String,
    window: Duration,
}

impl RecorderCollector {
    pub fn new(prefix: impl Into<String>, window: Duration) -> Self {
        let prefix = prefix.into();
        let split = prefix.rfind('/').map_or(0, |i| i + 1);
        let (parent, stem) = prefix.split_at(split);
        Self {
            parent: parent.to_string(),
            stem: stem.to_string(),
            prefix,
            window,
        }
    }

    /// Recorder name embedded in a raw key, e.g. `drvs12` in `/mon/drvs12/summary`.
    fn recorder_name<'k>(&self, key: &'k str) -> Option<&'k str> {
        let rest = key.strip_prefix(&self.parent)?;
        let (name, _) = rest.split_once('/')?;
        let suffix = name.strip_prefix(&self.stem)?;
        (!name.is_empty() && NAME_SUFFIX.is_match(suffix)).then_some(name)
    }

    fn fragment(
        &self,
        entry: &KvEntry,
        recorder: &str,
        field: &str,
        now: DateTime<Utc>,
    ) -> Result<MonitorPoint, RecordError> {
        let record: ValueRecord = raw::decode(&entry.key, &entry.value)?;
        let value = FieldValue::from_json(&record.value).ok_or_else(|| RecordError::NotScalar {
            key: entry.key.clone(),
            field: "value",
        })?;
        let captured_at = raw::capture_time(&entry.key, &record.timestamp)?;
        let recent = crate::staleness::is_recent(captured_at, self.window, now);

        Ok(
            MonitorPoint::new_at(summary_path(recorder), Tag::new(TAG_NAME, recorder), now)
                .with_field(field, value)
                .with_field(recent_field(field), recent),
        )
    }
}

impl Default for RecorderCollector {
    fn default() -> Self {
        Self::new("/mon/dr", crate::staleness::DEFAULT_STALENESS_WINDOW)
    }
}

pub fn summary_path(recorder: &str) -> String {
    format!("{SUMMARY_PREFIX}{recorder}")
}

fn field_for(key: &str) -> Option<&'static str> {
    SUFFIX_FIELDS
        .iter()
        .find(|(suffix, _)| key.ends_with(suffix))
        .map(|(_, field)| *field)
}

#[async_trait]
impl Collector for RecorderCollector {
    fn name(&self) -> &'static str {
        "recorder"
    }

    fn tag_name(&self) -> &'static str {
        TAG_NAME
    }

    fn output_fields(&self) -> Vec<String> {
        SUFFIX_FIELDS
            .iter()
            .flat_map(|(_, field)| [field.to_string(), recent_field(field)])
            .collect()
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
            if entry.key.starts_with(SUMMARY_PREFIX) {
                continue;
            }
            let Some(field) = field_for(&entry.key) else {
                continue;
            };
            let Some(recorder) = self.recorder_name(&entry.key) else {
                debug!(key = %entry.key, "no recorder name in key");
                continue;
            };
            match self.fragment(&entry, recorder, field, now) {
                Ok(fragment) => points.add(fragment)?,
                Err(e) => debug!(error = %e, "skipping recorder fragment"),
            }
        }

        Ok(points.into_points())
    }
}
