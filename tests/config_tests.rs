// Config loading and validation tests

use std::time::Duration;

use mnc_aggregator::collectors;
use mnc_aggregator::config::{
    AppConfig, MAX_INTERVAL, MIN_INTERVAL, validate_interval, validate_output_fields,
};

const VALID_CONFIG: &str = r#"
[store]
endpoints = ["etcdv3service:2379"]
page_size = 500

[aggregator]
interval_secs = 30
concurrent = true

[recorder]
prefix = "/mon/dr"
staleness_secs = 120

[digitizer]
enabled = false

[correlator]
hosts = 2
pipelines = 4
"#;

#[test]
fn test_config_loads_from_str() {
    let config = AppConfig::load_from_str(VALID_CONFIG).expect("load_from_str");
    assert_eq!(config.store.endpoints, vec!["etcdv3service:2379"]);
    assert_eq!(config.store.page_size, 500);
    assert_eq!(config.store.request_timeout_secs, 10);
    assert_eq!(config.aggregator.interval().unwrap(), Duration::from_secs(30));
    assert!(config.aggregator.concurrent);
    assert!(!config.digitizer.enabled);
    assert_eq!(config.correlator.hosts, 2);
    assert_eq!(config.correlator.host_prefix, "lxdlwagpu");
}

#[test]
fn test_config_empty_uses_defaults() {
    let config = AppConfig::load_from_str("").expect("defaults");
    assert_eq!(config.aggregator.interval_secs, 60.0);
    assert!(!config.aggregator.concurrent);
    assert_eq!(config.store.endpoints, vec!["localhost:2379"]);
    assert_eq!(config.recorder.staleness_secs, 120);
    assert_eq!(config.digitizer.prefix, "/mon/snap/");
    assert_eq!((config.correlator.hosts, config.correlator.pipelines), (8, 4));
}

#[test]
fn test_config_validation_rejects_zero_interval() {
    let bad = VALID_CONFIG.replace("interval_secs = 30", "interval_secs = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("interval_secs"));
}

#[test]
fn test_config_validation_rejects_negative_interval() {
    let bad = VALID_CONFIG.replace("interval_secs = 30", "interval_secs = -5.0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("interval_secs"));
}

#[test]
fn test_config_validation_rejects_huge_interval() {
    let bad = VALID_CONFIG.replace("interval_secs = 30", "interval_secs = 1e300");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("interval_secs"));
    assert!(validate_interval(1e300).is_err());
}

#[test]
fn test_config_validation_rejects_interval_that_rounds_to_zero() {
    let bad = VALID_CONFIG.replace("interval_secs = 30", "interval_secs = 1e-12");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("interval_secs"));
    assert!(validate_interval(0.0001).is_err());
}

#[test]
fn test_interval_bounds_are_inclusive() {
    assert_eq!(validate_interval(0.001).unwrap(), MIN_INTERVAL);
    assert_eq!(
        validate_interval(MAX_INTERVAL.as_secs_f64()).unwrap(),
        MAX_INTERVAL
    );
    assert_eq!(validate_interval(2.5).unwrap(), Duration::from_millis(2500));
}

#[test]
fn test_config_validation_rejects_empty_endpoints() {
    let bad = VALID_CONFIG.replace("endpoints = [\"etcdv3service:2379\"]", "endpoints = []");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("store.endpoints"));
}

#[test]
fn test_config_validation_rejects_page_size_zero() {
    let bad = VALID_CONFIG.replace("page_size = 500", "page_size = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("page_size"));
}

#[test]
fn test_config_validation_rejects_staleness_zero() {
    let bad = VALID_CONFIG.replace("staleness_secs = 120", "staleness_secs = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("recorder.staleness_secs"));
}

#[test]
fn test_config_validation_rejects_empty_prefix() {
    let bad = VALID_CONFIG.replace("prefix = \"/mon/dr\"", "prefix = \"\"");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("recorder.prefix"));
}

#[test]
fn test_config_validation_rejects_zero_pipelines() {
    let bad = VALID_CONFIG.replace("pipelines = 4", "pipelines = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("correlator"));
}

#[test]
fn test_config_validation_rejects_username_without_password() {
    let bad = VALID_CONFIG.replace("page_size = 500", "page_size = 500\nusername = \"mon\"");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("username"));
}

#[test]
fn test_config_validation_rejects_invalid_toml() {
    let err = AppConfig::load_from_str("not valid toml [[[").unwrap_err();
    assert!(!err.to_string().is_empty());
}

#[test]
fn test_config_load_from_explicit_path() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("aggregator.toml");
    std::fs::write(&path, VALID_CONFIG).unwrap();
    let config = AppConfig::load(Some(&path)).expect("load from path");
    assert_eq!(config.aggregator.interval_secs, 30.0);
}

#[test]
fn test_config_missing_explicit_path_is_an_error() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("missing.toml");
    let err = AppConfig::load(Some(&path)).unwrap_err();
    assert!(err.to_string().contains("missing.toml"));
}

#[test]
fn test_collectors_follow_enabled_flags() {
    let config = AppConfig::load_from_str(VALID_CONFIG).unwrap();
    let names: Vec<&str> = collectors::from_config(&config)
        .iter()
        .map(|c| c.name())
        .collect();
    assert_eq!(names, vec!["recorder", "correlator"]);
}

#[test]
fn test_builtin_collectors_pass_output_field_validation() {
    let config = AppConfig::default();
    for collector in collectors::from_config(&config) {
        validate_output_fields(
            collector.name(),
            collector.tag_name(),
            &collector.output_fields(),
        )
        .unwrap();
    }
}

#[test]
fn test_output_field_matching_tag_name_is_rejected() {
    let err = validate_output_fields("c", "dr", &["dr".to_string()]).unwrap_err();
    assert!(err.to_string().contains("dr"));
}
