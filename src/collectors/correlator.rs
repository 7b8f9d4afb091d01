// X-engine (GPU correlator) pipelines. The host x pipeline set is fixed, so each
// pipeline's stage keys are read directly instead of scanned.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use super::{CollectError, Collector, recent_field};
use crate::models::raw::{self, StageRecord};
use crate::models::{MonitorPoint, RecordError, Tag};
use crate::staleness::is_recent;
use crate::store::KvStore;

const TAG_NAME: &str = "pipelinehost";
const SUMMARY_PREFIX: &str = "/mon/x/summary/";
const RUNNING_STATE: &str = "running";

/// Pipeline stages read for every host/pipeline pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Capture,
    Corr,
    Copy,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Capture, Stage::Corr, Stage::Copy];

    /// Block name in the key, e.g. `/mon/corr/x/<host>/pipeline/<p>/Corr/0`.
    pub fn block(self) -> &'static str {
        match self {
            Stage::Capture => "udp_verbs_capture",
            Stage::Corr => "Corr",
            Stage::Copy => "Copy",
        }
    }

    pub fn field_prefix(self) -> &'static str {
        match self {
            Stage::Capture => "capture",
            Stage::Corr => "corr",
            Stage::Copy => "copy",
        }
    }

    fn rate_field(self) -> String {
        format!("{}_rate", self.field_prefix())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineTarget {
    pub host: String,
    pub pipeline: u32,
}

impl PipelineTarget {
    /// `<host>-<pipeline>`, e.g. `lxdlwagpu03-2`.
    pub fn tag_value(&self) -> String {
        format!("{}-{}", self.host, self.pipeline)
    }

    pub fn stage_key(&self, stage: Stage) -> String {
        format!(
            "/mon/corr/x/{}/pipeline/{}/{}/0",
            self.host,
            self.pipeline,
            stage.block()
        )
    }

    pub fn summary_path(&self) -> String {
        format!("{SUMMARY_PREFIX}{}", self.tag_value())
    }
}

/// Cross product of `<host_prefix>01..=hosts` and pipelines `0..pipelines`.
pub fn pipeline_targets(host_prefix: &str, hosts: u32, pipelines: u32) -> Vec<PipelineTarget> {
    (1..=hosts)
        .flat_map(|gpu| {
            (0..pipelines).map(move |pipeline| PipelineTarget {
                host: format!("{host_prefix}{gpu:02}"),
                pipeline,
            })
        })
        .collect()
}

pub struct CorrelatorCollector {
    targets: Vec<PipelineTarget>,
    window: Duration,
}

impl CorrelatorCollector {
    pub fn new(targets: Vec<PipelineTarget>, window: Duration) -> Self {
        Self { targets, window }
    }

    pub fn targets(&self) -> &[PipelineTarget] {
        &self.targets
    }

    /// Reads and decodes one stage. `Ok(None)` when the key is missing or malformed.
    async fn read_stage(
        &self,
        store: &dyn KvStore,
        target: &PipelineTarget,
        stage: Stage,
        now: DateTime<Utc>,
    ) -> Result<Option<(StageRecord, bool)>, CollectError> {
        let key = target.stage_key(stage);
        let Some(bytes) = store.get(&key).await? else {
            debug!(key = %key, "stage key missing");
            return Ok(None);
        };
        match decode_stage(&key, &bytes, self.window, now) {
            Ok(decoded) => Ok(Some(decoded)),
            Err(e) => {
                debug!(error = %e, "skipping malformed stage record");
                Ok(None)
            }
        }
    }
}

fn decode_stage(
    key: &str,
    bytes: &[u8],
    window: Duration,
    now: DateTime<Utc>,
) -> Result<(StageRecord, bool), RecordError> {
    let record: StageRecord = raw::decode(key, bytes)?;
    let captured_at = raw::capture_time(key, &record.time)?;
    Ok((record, is_recent(captured_at, window, now)))
}

impl Default for CorrelatorCollector {
    fn default() -> Self {
        Self::new(
            pipeline_targets("lxdlwagpu", 8, 4),
            crate::staleness::DEFAULT_STALENESS_WINDOW,
        )
    }
}

#[async_trait]
impl Collector for CorrelatorCollector {
    fn name(&self) -> &'static str {
        "correlator"
    }

    fn tag_name(&self) -> &'static str {
        TAG_NAME
    }

    fn output_fields(&self) -> Vec<String> {
        let mut fields: Vec<String> = Stage::ALL
            .iter()
            .flat_map(|stage| [stage.rate_field(), recent_field(stage.field_prefix())])
            .collect();
        fields.push("corr_is_running".to_string());
        fields
    }

    async fn collect(
        &self,
        store: &dyn KvStore,
        now: DateTime<Utc>,
    ) -> Result<Vec<MonitorPoint>, CollectError> {
        let mut points = Vec::with_capacity(self.targets.len());

        'targets: for target in &self.targets {
            let tag = Tag::new(TAG_NAME, target.tag_value());
            let mut point = MonitorPoint::new_at(target.summary_path(), tag, now);

            for stage in Stage::ALL {
                // Every stage must be present for the pipeline to be reported.
                let Some((record, recent)) = self.read_stage(store, target, stage, now).await?
                else {
                    continue 'targets;
                };
                if stage == Stage::Corr {
                    // A stale "running" claim reads as not running.
                    let running = recent
                        && record
                            .state()
                            .is_some_and(|s| s.eq_ignore_ascii_case(RUNNING_STATE));
                    point = point.with_field("corr_is_running", running);
                }
                point = point
                    .with_field(stage.rate_field(), record.gbps)
                    .with_field(recent_field(stage.field_prefix()), recent);
            }

            points.push(point);
        }

        Ok(points)
    }
}
