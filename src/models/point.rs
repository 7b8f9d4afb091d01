// Summary monitor point: one per device per pass, built by merging fragments.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Output key holding the capture time in every serialized point.
pub const TIME_KEY: &str = "time";

/// Identity dimension carried into the stored record, e.g. `("dr", "dr05")`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag {
    pub name: String,
    pub value: String,
}

impl Tag {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

/// Scalar field value; written as the bare JSON scalar.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl FieldValue {
    /// Converts a decoded JSON value; arrays and objects are not scalars.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        use serde_json::Value;
        match value {
            Value::Null => Some(FieldValue::Null),
            Value::Bool(b) => Some(FieldValue::Bool(*b)),
            Value::Number(n) => n
                .as_i64()
                .map(FieldValue::Int)
                .or_else(|| n.as_f64().map(FieldValue::Float)),
            Value::String(s) => Some(FieldValue::Str(s.clone())),
            Value::Array(_) | Value::Object(_) => None,
        }
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Str(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Str(v)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(FieldValue::Null)
    }
}

/// Merge failures. Both indicate a collector bug, not bad data.
#[derive(Debug, Error, PartialEq)]
pub enum MergeError {
    #[error(
        "cannot merge points with different identity: {left_path} ({left_tag}) vs {right_path} ({right_tag})"
    )]
    IdentityMismatch {
        left_path: String,
        left_tag: Tag,
        right_path: String,
        right_tag: Tag,
    },
    #[error("cannot merge points for {path} captured at different times: {left} vs {right}")]
    TimestampMismatch {
        path: String,
        left: DateTime<Utc>,
        right: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonitorPoint {
    /// Store key the summary is written to.
    pub path: String,
    pub tag: Tag,
    pub timestamp: DateTime<Utc>,
    pub fields: BTreeMap<String, FieldValue>,
}

impl MonitorPoint {
    /// New point stamped with the current wall-clock time.
    pub fn new(path: impl Into<String>, tag: Tag) -> Self {
        Self::new_at(path, tag, Utc::now())
    }

    pub fn new_at(path: impl Into<String>, tag: Tag, timestamp: DateTime<Utc>) -> Self {
        Self {
            path: path.into(),
            tag,
            timestamp,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn with_fields<I, K, V>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<FieldValue>,
    {
        self.fields
            .extend(fields.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    fn check_mergeable(
        &self,
        other: &MonitorPoint,
        overwrite_timestamp: bool,
    ) -> Result<(), MergeError> {
        if self.path != other.path || self.tag != other.tag {
            return Err(MergeError::IdentityMismatch {
                left_path: self.path.clone(),
                left_tag: self.tag.clone(),
                right_path: other.path.clone(),
                right_tag: other.tag.clone(),
            });
        }
        if !overwrite_timestamp && self.timestamp != other.timestamp {
            return Err(MergeError::TimestampMismatch {
                path: self.path.clone(),
                left: self.timestamp,
                right: other.timestamp,
            });
        }
        Ok(())
    }

    /// Unions the fields of both points; `other` wins on key collision.
    ///
    /// With `overwrite_timestamp` the timestamps are not compared and `self`'s
    /// timestamp is kept. Without it, differing timestamps are an error.
    pub fn merge(
        mut self,
        other: MonitorPoint,
        overwrite_timestamp: bool,
    ) -> Result<MonitorPoint, MergeError> {
        self.merge_in_place(other, overwrite_timestamp)?;
        Ok(self)
    }

    /// In-place form of [`MonitorPoint::merge`]. On error `self` is unchanged.
    pub fn merge_in_place(
        &mut self,
        other: MonitorPoint,
        overwrite_timestamp: bool,
    ) -> Result<(), MergeError> {
        self.check_mergeable(&other, overwrite_timestamp)?;
        self.fields.extend(other.fields);
        Ok(())
    }

    /// Flat record: fields, then the tag pair, then `time` as epoch seconds.
    /// Reserved keys are inserted last so a colliding field cannot shadow them.
    pub fn to_record(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut record = serde_json::Map::with_capacity(self.fields.len() + 2);
        for (name, value) in &self.fields {
            record.insert(name.clone(), field_to_json(value));
        }
        record.insert(
            self.tag.name.clone(),
            serde_json::Value::String(self.tag.value.clone()),
        );
        record.insert(TIME_KEY.to_string(), epoch_seconds(self.timestamp).into());
        record
    }

    /// Bytes written to the store under [`MonitorPoint::path`].
    pub fn serialize(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.to_record())
    }
}

fn field_to_json(value: &FieldValue) -> serde_json::Value {
    match value {
        FieldValue::Null => serde_json::Value::Null,
        FieldValue::Bool(b) => (*b).into(),
        FieldValue::Int(i) => (*i).into(),
        // NaN/inf have no JSON form
        FieldValue::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        FieldValue::Str(s) => s.clone().into(),
    }
}

/// Seconds since the Unix epoch with microsecond precision.
pub fn epoch_seconds(ts: DateTime<Utc>) -> f64 {
    ts.timestamp() as f64 + f64::from(ts.timestamp_subsec_micros()) / 1_000_000.0
}
