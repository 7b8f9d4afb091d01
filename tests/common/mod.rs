// Shared test helpers

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use mnc_aggregator::models::{FieldValue, MonitorPoint};
use mnc_aggregator::store::MemoryStore;
use serde_json::json;

pub const NOW: i64 = 1_700_000_000;

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

pub fn now() -> DateTime<Utc> {
    at(NOW)
}

pub async fn seed(store: &MemoryStore, key: &str, value: serde_json::Value) {
    store.insert(key, serde_json::to_vec(&value).unwrap()).await;
}

/// A correlator stage record captured `age_secs` before [`NOW`].
pub fn stage(gbps: f64, state: &str, age_secs: i64) -> serde_json::Value {
    json!({"time": NOW - age_secs, "gbps": gbps, "stats": {"state": state}})
}

pub fn point_for<'a>(points: &'a [MonitorPoint], tag_value: &str) -> &'a MonitorPoint {
    points
        .iter()
        .find(|p| p.tag.value == tag_value)
        .unwrap_or_else(|| panic!("no point tagged {tag_value}"))
}

pub fn bool_field(point: &MonitorPoint, name: &str) -> bool {
    match point.field(name) {
        Some(FieldValue::Bool(b)) => *b,
        other => panic!("{name} is not a bool: {other:?}"),
    }
}
