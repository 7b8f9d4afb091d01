// Raw fragments written by the hardware monitoring agents.
// Agents disagree on timestamp encoding, so everything is normalized to DateTime<Utc> here.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use thiserror::Error;

/// A raw value that could not be decoded; the fragment is skipped.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("invalid JSON in {key}: {source}")]
    Json {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("bad timestamp in {key}: {value}")]
    Timestamp { key: String, value: String },
    #[error("{key}: field `{field}` is not a scalar")]
    NotScalar { key: String, field: &'static str },
}

/// Capture time as the agents encode it: epoch seconds or an ISO-8601 string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    Epoch(f64),
    Iso(String),
}

impl RawTimestamp {
    pub fn to_utc(&self) -> Option<DateTime<Utc>> {
        match self {
            RawTimestamp::Epoch(secs) => {
                if !secs.is_finite() {
                    return None;
                }
                let whole = secs.floor();
                let nanos = ((secs - whole) * 1e9).round() as u32;
                Utc.timestamp_opt(whole as i64, nanos.min(999_999_999)).single()
            }
            RawTimestamp::Iso(s) => parse_iso(s),
        }
    }
}

/// RFC 3339 with offset, or a naive `YYYY-MM-DDTHH:MM:SS[.f]` taken as UTC.
fn parse_iso(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// `{"value": <scalar>, "timestamp": ...}`, used by the recorder agents.
#[derive(Debug, Clone, Deserialize)]
pub struct ValueRecord {
    pub value: serde_json::Value,
    #[serde(alias = "time")]
    pub timestamp: RawTimestamp,
}

/// `{"ok": bool, "timestamp": ...}` from a digitizer's status key.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusRecord {
    pub ok: bool,
    #[serde(alias = "time")]
    pub timestamp: RawTimestamp,
}

/// Digitizer statistics. Every nested block and field may be missing.
#[derive(Debug, Clone, Deserialize)]
pub struct StatsRecord {
    #[serde(alias = "time")]
    pub timestamp: RawTimestamp,
    #[serde(default, deserialize_with = "lenient")]
    pub stats: Option<DigitizerStats>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DigitizerStats {
    #[serde(default, deserialize_with = "lenient")]
    pub eth: Option<EthStats>,
    #[serde(default, deserialize_with = "lenient")]
    pub adc: Option<AdcStats>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EthStats {
    #[serde(default, deserialize_with = "lenient")]
    pub gbps: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    pub overflow_count: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdcStats {
    #[serde(default, deserialize_with = "lenient")]
    pub clip_count: Option<i64>,
}

/// One correlator pipeline stage: `{"time": ..., "gbps": f64, "stats": {"state": "..."}}`.
#[derive(Debug, Clone, Deserialize)]
pub struct StageRecord {
    #[serde(alias = "timestamp")]
    pub time: RawTimestamp,
    pub gbps: f64,
    #[serde(default, deserialize_with = "lenient")]
    pub stats: Option<StageStats>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StageStats {
    #[serde(default, deserialize_with = "lenient")]
    pub state: Option<String>,
}

impl StageRecord {
    pub fn state(&self) -> Option<&str> {
        self.stats.as_ref()?.state.as_deref()
    }
}

/// Optional nested field that reads as `None` when present with the wrong shape.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

/// Decodes `bytes` as `T`, tagging errors with the store key.
pub fn decode<T>(key: &str, bytes: &[u8]) -> Result<T, RecordError>
where
    T: serde::de::DeserializeOwned,
{
    serde_json::from_slice(bytes).map_err(|source| RecordError::Json {
        key: key.to_string(),
        source,
    })
}

pub fn capture_time(key: &str, ts: &RawTimestamp) -> Result<DateTime<Utc>, RecordError> {
    ts.to_utc().ok_or_else(|| RecordError::Timestamp {
        key: key.to_string(),
        value: match ts {
            RawTimestamp::Epoch(secs) => secs.to_string(),
            RawTimestamp::Iso(s) => s.clone(),
        },
    })
}
