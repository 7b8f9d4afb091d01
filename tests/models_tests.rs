// MonitorPoint merge rules and output record shape

mod common;

use common::at;
use mnc_aggregator::models::{FieldValue, MergeError, MonitorPoint, Tag};

fn point(path: &str, tag: &str, ts: i64) -> MonitorPoint {
    MonitorPoint::new_at(path, Tag::new("tag", tag), at(ts))
}

#[test]
fn merge_same_identity_and_time_unions_fields() {
    let left = point("/test/", "test", 10)
        .with_field("foo", "bar")
        .with_field("shared", 1i64);
    let right = point("/test/", "test", 10)
        .with_field("bar", "foo")
        .with_field("shared", 2i64);

    let merged = left.merge(right, false).unwrap();
    assert_eq!(merged.fields.len(), 3);
    assert_eq!(merged.field("foo"), Some(&FieldValue::Str("bar".into())));
    assert_eq!(merged.field("bar"), Some(&FieldValue::Str("foo".into())));
    assert_eq!(merged.field("shared"), Some(&FieldValue::Int(2)));
}

#[test]
fn merge_different_path_is_identity_mismatch() {
    for overwrite in [false, true] {
        let err = point("/test/", "test", 10)
            .merge(point("/test2/", "test", 10), overwrite)
            .unwrap_err();
        assert!(matches!(err, MergeError::IdentityMismatch { .. }));
    }
}

#[test]
fn merge_different_tag_is_identity_mismatch() {
    for overwrite in [false, true] {
        let err = point("/test/", "test", 10)
            .merge(point("/test/", "test2", 10), overwrite)
            .unwrap_err();
        assert!(matches!(err, MergeError::IdentityMismatch { .. }));
    }
}

#[test]
fn merge_different_tag_name_is_identity_mismatch() {
    let left = point("/test/", "test", 10);
    let right = MonitorPoint::new_at("/test/", Tag::new("other", "test"), at(10));
    assert!(matches!(
        left.merge(right, true),
        Err(MergeError::IdentityMismatch { .. })
    ));
}

#[test]
fn merge_different_time_without_overwrite_fails() {
    let err = point("/test/", "test", 10)
        .merge(point("/test/", "test", 11), false)
        .unwrap_err();
    assert_eq!(
        err,
        MergeError::TimestampMismatch {
            path: "/test/".into(),
            left: at(10),
            right: at(11),
        }
    );
}

#[test]
fn merge_different_time_with_overwrite_keeps_left_timestamp() {
    let merged = point("/test/", "test", 10)
        .with_field("foo", "bar")
        .merge(point("/test/", "test", 99).with_field("bar", "foo"), true)
        .unwrap();
    assert_eq!(merged.timestamp, at(10));
    assert!(merged.fields.contains_key("foo"));
    assert!(merged.fields.contains_key("bar"));
}

#[test]
fn merge_in_place_leaves_point_untouched_on_error() {
    let mut left = point("/test/", "test", 10).with_field("foo", "bar");
    let before = left.clone();
    assert!(
        left.merge_in_place(point("/test/", "test", 11).with_field("x", 1i64), false)
            .is_err()
    );
    assert_eq!(left, before);
}

#[test]
fn record_is_flat_with_time_and_tag() {
    let p = MonitorPoint::new_at("/mon/dr/summary/dr05", Tag::new("dr", "dr05"), at(1_700_000_000))
        .with_field("recorder_rate", 950.5)
        .with_field("recorder_rate_recent", true)
        .with_field("eth_gbps", Option::<f64>::None);

    let value: serde_json::Value = serde_json::from_slice(&p.serialize().unwrap()).unwrap();
    assert_eq!(
        value,
        serde_json::json!({
            "time": 1_700_000_000.0,
            "dr": "dr05",
            "recorder_rate": 950.5,
            "recorder_rate_recent": true,
            "eth_gbps": null,
        })
    );
}

#[test]
fn reserved_keys_win_over_colliding_fields() {
    let p = MonitorPoint::new_at("/p", Tag::new("dr", "dr05"), at(5))
        .with_field("time", "bogus")
        .with_field("dr", "bogus");
    let record = p.to_record();
    assert_eq!(record["time"], serde_json::json!(5.0));
    assert_eq!(record["dr"], serde_json::json!("dr05"));
}

#[test]
fn new_point_is_stamped_now() {
    let before = chrono::Utc::now();
    let p = MonitorPoint::new("/p", Tag::new("a", "b"));
    assert!(p.timestamp >= before);
    assert!(p.fields.is_empty());
}

#[test]
fn non_finite_float_is_written_as_null() {
    let p = MonitorPoint::new_at("/p", Tag::new("snap", "03"), at(5))
        .with_field("eth_gbps", f64::NAN)
        .with_field("clip_count", f64::INFINITY);
    let value: serde_json::Value = serde_json::from_slice(&p.serialize().unwrap()).unwrap();
    assert_eq!(value["eth_gbps"], serde_json::Value::Null);
    assert_eq!(value["clip_count"], serde_json::Value::Null);
}
